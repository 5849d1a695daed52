use crate::*;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::TcpListener;

use tandem_core::crypto::{random_bytes, DefaultRendezvousCrypto, PathHash, Role, KEY_LEN};
use tandem_core::wire::encode_join_offer;
use tandem_services::rendezvous::{
    self, direct_tcp_offer, DirectTcpRendezvousConnector, EncryptedRendezvousConnection,
    RendezvousError,
};
use tandem_services::transport::{ChunkedTransport, StreamFrameTransport, TransportError};
use tandem_services::RendezvousConnection;

const PATH_ID: u32 = 7;

type OfferingTask = tokio::task::JoinHandle<Result<(PathHash, Bytes), RendezvousError>>;

/// Listen on loopback and publish an offer for `offer_ak`. The listening
/// side authenticates with `listener_ak`.
async fn offering_device(offer_ak: [u8; KEY_LEN], listener_ak: [u8; KEY_LEN]) -> Result<(String, OfferingTask)> {
    offering_device_behind(offer_ak, listener_ak, None).await
}

/// Like [`offering_device`], with `dead_port` offered ahead of the real one.
async fn offering_device_behind(
    offer_ak: [u8; KEY_LEN],
    listener_ak: [u8; KEY_LEN],
    dead_port: Option<u16>,
) -> Result<(String, OfferingTask)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let local = listener.local_addr()?;
    let mut offer = direct_tcp_offer(&offer_ak, &local.ip().to_string(), local.port(), PATH_ID);
    if let (Some(port), Some(server)) = (
        dead_port,
        offer
            .rendezvous_init
            .as_mut()
            .and_then(|init| init.direct_tcp_server.as_mut()),
    ) {
        server.ports.insert(0, u32::from(port));
    }
    let offer = encode_join_offer(&offer);

    let config = test_config();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.map_err(TransportError::from)?;
        let transport = ChunkedTransport::new(
            StreamFrameTransport::new(stream, config.rendezvous.max_frame_bytes),
            &config.chunking,
        );
        let crypto = DefaultRendezvousCrypto::new(Role::Initiator, listener_ak, PATH_ID);
        let mut conn = EncryptedRendezvousConnection::new(Box::new(transport), Box::new(crypto));

        let path_hash = rendezvous::initiate(&mut conn, false).await?;
        // Echo one message under transport keys.
        let message = conn.receive().await?;
        conn.send(message.clone()).await?;
        conn.close().await;
        Ok::<_, RendezvousError>((path_hash, message))
    });
    Ok((offer, task))
}

fn connector() -> DirectTcpRendezvousConnector {
    let config = test_config();
    DirectTcpRendezvousConnector {
        max_frame_bytes: config.rendezvous.max_frame_bytes,
        chunking: config.chunking,
    }
}

/// Two devices link over loopback TCP and agree on the path hash, then
/// exchange a multi-chunk message under transport keys.
#[tokio::test]
async fn test_link_over_tcp_loopback() {
    let ak: [u8; KEY_LEN] = random_bytes();
    let (offer, offering) = offering_device(ak, ak).await.unwrap();

    let (mut conn, path_hash) = within("link", rendezvous::connect(&offer, true, &connector()))
        .await
        .expect("link should succeed");

    let payload = Bytes::from((0..4096u32).map(|i| i as u8).collect::<Vec<_>>());
    conn.send(payload.clone()).await.unwrap();
    let echoed = within("echo", conn.receive()).await.unwrap();
    assert_eq!(echoed, payload);
    conn.close().await;

    let (their_hash, received) = within("offering device", offering)
        .await
        .unwrap()
        .expect("offering side should succeed");
    assert_eq!(their_hash, path_hash, "both sides derive the same path hash");
    assert_eq!(received, payload);
}

/// The offering device answers with a different authentication key: the
/// handshake must fail on both sides.
#[tokio::test]
async fn test_link_with_wrong_key_fails() {
    let (offer, offering) = offering_device([0x11; KEY_LEN], [0x22; KEY_LEN]).await.unwrap();

    let result = within("link", rendezvous::connect(&offer, true, &connector())).await;
    assert!(result.is_err(), "responder must not authenticate");

    let their = within("offering device", offering).await.unwrap();
    assert!(
        matches!(their, Err(RendezvousError::Crypto(_))),
        "offering side should fail to decrypt the hello"
    );
}

#[tokio::test]
async fn test_link_rejects_garbage_offer() {
    let result = rendezvous::connect("not-an-offer!", true, &connector()).await;
    assert!(matches!(result, Err(RendezvousError::UnableToParseData(_))));
}

/// The first offered port is dead; the link goes through the second.
#[tokio::test]
async fn test_link_skips_unreachable_port() {
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let ak: [u8; KEY_LEN] = random_bytes();
    let (offer, offering) = offering_device_behind(ak, ak, Some(dead_port)).await.unwrap();

    let (mut conn, path_hash) = within("link", rendezvous::connect(&offer, true, &connector()))
        .await
        .expect("link should use the second port");
    conn.send(Bytes::from_static(b"ping")).await.unwrap();
    assert_eq!(within("echo", conn.receive()).await.unwrap(), Bytes::from_static(b"ping"));
    conn.close().await;

    let (their_hash, _) = within("offering device", offering).await.unwrap().unwrap();
    assert_eq!(their_hash, path_hash);
}

/// Nobody listens on the offered port.
#[tokio::test]
async fn test_link_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let offer = encode_join_offer(&direct_tcp_offer(&[0x33; KEY_LEN], "127.0.0.1", port, PATH_ID));
    let result = within("link", rendezvous::connect(&offer, true, &connector())).await;
    assert!(matches!(result, Err(RendezvousError::Transport(_))));
}
