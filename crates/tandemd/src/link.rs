//! Device linking over a direct TCP rendezvous path.
//!
//! `offer` plays the initiator: it listens, prints the join offer and answers
//! the handshake. `link` consumes an offer and drives the handshake from the
//! responder side. Both print the path hash, which the user compares on the
//! two devices.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;

use tandem_core::crypto::{random_bytes, DefaultRendezvousCrypto, Role, KEY_LEN};
use tandem_core::wire::encode_join_offer;
use tandem_core::TandemConfig;
use tandem_services::rendezvous::{
    self, direct_tcp_offer, DirectTcpRendezvousConnector, EncryptedRendezvousConnection,
};
use tandem_services::transport::{ChunkedTransport, StreamFrameTransport};
use tandem_services::RendezvousConnection;

/// Offers carry a single path.
const PATH_ID: u32 = 1;

pub async fn cmd_offer(config: &TandemConfig, bind: SocketAddr) -> Result<()> {
    if bind.ip().is_unspecified() {
        bail!("--bind needs an address the other device can reach, not {}", bind.ip());
    }
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to listen on {bind}"))?;
    let local = listener.local_addr()?;

    let ak: [u8; KEY_LEN] = random_bytes();
    let offer = direct_tcp_offer(&ak, &local.ip().to_string(), local.port(), PATH_ID);
    println!("{}", encode_join_offer(&offer));
    tracing::info!(addr = %local, "waiting for the other device");

    let (stream, peer) = tokio::select! {
        accepted = listener.accept() => accepted.context("accept failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            return Ok(());
        }
    };
    stream.set_nodelay(true)?;
    tracing::info!(%peer, "rendezvous path opened");

    let transport = ChunkedTransport::new(
        StreamFrameTransport::new(stream, config.rendezvous.max_frame_bytes),
        &config.chunking,
    );
    let crypto = DefaultRendezvousCrypto::new(Role::Initiator, ak, PATH_ID);
    let mut conn = EncryptedRendezvousConnection::new(Box::new(transport), Box::new(crypto));

    // The linking device nominates unless configured otherwise.
    let nominator = !config.rendezvous.nominator;
    let result = tokio::time::timeout(
        config.rendezvous.handshake_timeout(),
        rendezvous::initiate(&mut conn, nominator),
    )
    .await;
    conn.close().await;

    let path_hash = result
        .context("handshake timed out")?
        .context("handshake failed")?;
    println!("path hash: {}", hex::encode(path_hash));
    Ok(())
}

pub async fn cmd_link(config: &TandemConfig, offer: &str) -> Result<()> {
    let connector = DirectTcpRendezvousConnector {
        max_frame_bytes: config.rendezvous.max_frame_bytes,
        chunking: config.chunking.clone(),
    };
    let (mut conn, path_hash) = tokio::time::timeout(
        config.rendezvous.handshake_timeout(),
        rendezvous::connect(offer, config.rendezvous.nominator, &connector),
    )
    .await
    .context("handshake timed out")?
    .context("handshake failed")?;
    conn.close().await;

    println!("path hash: {}", hex::encode(path_hash));
    Ok(())
}
