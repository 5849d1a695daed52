//! Rendezvous protocol. Authenticates a path between two devices and
//! switches it to transport keys.
//!
//! The responder device (RRD) consumes an offer published by the initiator
//! device (RID) and drives the handshake:
//!
//! ```text
//!   RRD                                  RID
//!    │ ── Hello(challenge, etk) ───────▶ │
//!    │ ◀── AuthHello(response, challenge, etk)
//!    │ ── Auth(response) ──────────────▶ │
//!    │ ── Nominate ────────────────────▶ │   (whichever side nominates)
//!    │        switch to transport keys   │
//! ```
//!
//! All messages travel encrypted by [`RendezvousCrypto`] under the
//! authentication keys. No timeouts here; wrap calls in
//! `tokio::time::timeout`.

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;

use tandem_core::config::ChunkingConfig;
use tandem_core::crypto::{
    random_bytes, CryptoError, DefaultRendezvousCrypto, EphemeralKeypair, PathHash,
    RendezvousCrypto, Role, CHALLENGE_LEN, KEY_LEN,
};
use tandem_core::wire::{
    decode, decode_join_offer, encode, Auth, AuthHello, DeviceGroupJoinRequestOrOffer,
    DirectTcpServer, Hello, IpAddress, Nominate, NetworkCost, RendezvousInit, RendezvousVersion,
    WireError,
};

use crate::transport::{ChunkedTransport, FrameTransport, TcpFrameTransport, TransportError};

// ── Connection ────────────────────────────────────────────────────────────────

/// An authenticated, encrypted rendezvous path.
#[async_trait]
pub trait RendezvousConnection: Send {
    async fn send(&mut self, payload: Bytes) -> Result<(), RendezvousError>;

    async fn receive(&mut self) -> Result<Bytes, RendezvousError>;

    /// Switch to transport keys. Fails if called twice.
    fn switch_to_transport_keys(
        &mut self,
        local: &EphemeralKeypair,
        remote_etk: &[u8],
    ) -> Result<PathHash, RendezvousError>;

    async fn close(&mut self);
}

/// Frame transport plus rendezvous crypto.
pub struct EncryptedRendezvousConnection {
    transport: Box<dyn FrameTransport>,
    crypto: Box<dyn RendezvousCrypto>,
}

impl EncryptedRendezvousConnection {
    pub fn new(transport: Box<dyn FrameTransport>, crypto: Box<dyn RendezvousCrypto>) -> Self {
        Self { transport, crypto }
    }
}

#[async_trait]
impl RendezvousConnection for EncryptedRendezvousConnection {
    async fn send(&mut self, payload: Bytes) -> Result<(), RendezvousError> {
        let ciphertext = self.crypto.encrypt(&payload)?;
        self.transport.send(Bytes::from(ciphertext)).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, RendezvousError> {
        let frame = self.transport.receive().await?;
        let plaintext = self.crypto.decrypt(&frame)?;
        Ok(Bytes::from(plaintext))
    }

    fn switch_to_transport_keys(
        &mut self,
        local: &EphemeralKeypair,
        remote_etk: &[u8],
    ) -> Result<PathHash, RendezvousError> {
        Ok(self.crypto.switch_to_transport_keys(local, remote_etk)?)
    }

    async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "rendezvous transport close failed");
        }
    }
}

async fn send_message<M: Message>(
    conn: &mut dyn RendezvousConnection,
    message: &M,
) -> Result<(), RendezvousError> {
    conn.send(encode(message)).await
}

async fn receive_message<M: Message + Default>(
    conn: &mut dyn RendezvousConnection,
) -> Result<M, RendezvousError> {
    let payload = conn.receive().await?;
    decode(&payload).map_err(RendezvousError::UnableToDeserializeData)
}

// ── Connectors ────────────────────────────────────────────────────────────────

/// Opens the path described by a [`RendezvousInit`].
#[async_trait]
pub trait RendezvousConnector: Send + Sync {
    async fn connect(
        &self,
        init: &RendezvousInit,
    ) -> Result<Box<dyn RendezvousConnection>, RendezvousError>;
}

/// Connects to the first address of the offer's direct TCP server.
pub struct DirectTcpRendezvousConnector {
    pub max_frame_bytes: usize,
    pub chunking: ChunkingConfig,
}

#[async_trait]
impl RendezvousConnector for DirectTcpRendezvousConnector {
    async fn connect(
        &self,
        init: &RendezvousInit,
    ) -> Result<Box<dyn RendezvousConnection>, RendezvousError> {
        let server = init
            .direct_tcp_server
            .as_ref()
            .ok_or(RendezvousError::UnsupportedPath)?;

        // Every address with every port, in offer order. First to connect wins.
        let mut last_error = RendezvousError::UnsupportedPath;
        for address in &server.ip_addresses {
            for port in server.ports.iter().filter_map(|p| u16::try_from(*p).ok()) {
                let addr = format_addr(&address.ip, port);
                tracing::info!(addr, path_id = address.path_id, "connecting rendezvous path");
                let tcp = match TcpFrameTransport::connect(&addr, self.max_frame_bytes).await {
                    Ok(tcp) => tcp,
                    Err(e) => {
                        tracing::warn!(addr, error = %e, "rendezvous path unreachable");
                        last_error = e.into();
                        continue;
                    }
                };
                let transport = ChunkedTransport::new(tcp, &self.chunking);
                let crypto =
                    DefaultRendezvousCrypto::from_slice(Role::Responder, &init.ak, address.path_id)?;
                return Ok(Box::new(EncryptedRendezvousConnection::new(
                    Box::new(transport),
                    Box::new(crypto),
                )));
            }
        }
        Err(last_error)
    }
}

fn format_addr(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{ip}]:{port}")
    } else {
        format!("{ip}:{port}")
    }
}

// ── Offer ─────────────────────────────────────────────────────────────────────

/// A request to join reachable over one direct TCP address.
pub fn direct_tcp_offer(
    ak: &[u8; KEY_LEN],
    ip: &str,
    port: u16,
    path_id: u32,
) -> DeviceGroupJoinRequestOrOffer {
    DeviceGroupJoinRequestOrOffer::request_to_join(RendezvousInit {
        version: RendezvousVersion::V10 as i32,
        ak: ak.to_vec(),
        relayed_web_socket: None,
        direct_tcp_server: Some(DirectTcpServer {
            ports: vec![u32::from(port)],
            ip_addresses: vec![IpAddress {
                path_id,
                network_cost: NetworkCost::Unknown as i32,
                ip: ip.to_string(),
            }],
        }),
    })
}

/// Decode an offer and check it is one we can act on.
pub fn parse_and_validate(offer: &str) -> Result<RendezvousInit, RendezvousError> {
    let offer = decode_join_offer(offer).map_err(RendezvousError::UnableToParseData)?;
    if offer.version != tandem_core::wire::DeviceGroupJoinVersion::V10 as i32 {
        return Err(RendezvousError::InvalidVersion(offer.version));
    }
    let init = offer
        .rendezvous_init
        .clone()
        .ok_or(RendezvousError::InvalidProtocolMessage("offer without rendezvous init"))?;
    if init.version != RendezvousVersion::V10 as i32 {
        return Err(RendezvousError::InvalidVersion(init.version));
    }
    if init.ak.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(init.ak.len()).into());
    }
    if !offer.is_request_to_join() {
        return Err(RendezvousError::InvalidProtocolMessage("offer is not a request to join"));
    }
    let path_ids = init.path_ids();
    if path_ids.is_empty() {
        return Err(RendezvousError::UnsupportedPath);
    }
    let mut seen = HashSet::with_capacity(path_ids.len());
    if !path_ids.iter().all(|id| seen.insert(*id)) {
        return Err(RendezvousError::InvalidProtocolMessage("duplicate path id"));
    }
    Ok(init)
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Responder side: consume `offer`, open its path and authenticate.
///
/// Returns the live connection and the path hash to compare out of band.
pub async fn connect(
    offer: &str,
    is_nominator: bool,
    connector: &dyn RendezvousConnector,
) -> Result<(Box<dyn RendezvousConnection>, PathHash), RendezvousError> {
    let init = parse_and_validate(offer)?;
    let mut conn = connector.connect(&init).await?;
    match respond(conn.as_mut(), is_nominator).await {
        Ok(path_hash) => Ok((conn, path_hash)),
        Err(e) => {
            conn.close().await;
            Err(e)
        }
    }
}

/// Responder handshake over an already open connection.
pub async fn respond(
    conn: &mut dyn RendezvousConnection,
    is_nominator: bool,
) -> Result<PathHash, RendezvousError> {
    let etk = EphemeralKeypair::generate();
    let challenge: [u8; CHALLENGE_LEN] = random_bytes();

    send_message(
        conn,
        &Hello {
            challenge: challenge.to_vec(),
            etk: etk.public.to_vec(),
        },
    )
    .await?;

    let auth_hello: AuthHello = receive_message(conn).await?;
    if auth_hello.response != challenge {
        return Err(RendezvousError::ChallengeMismatch);
    }
    if auth_hello.challenge.len() != CHALLENGE_LEN {
        return Err(RendezvousError::InvalidProtocolMessage("challenge length"));
    }

    send_message(
        conn,
        &Auth {
            response: auth_hello.challenge,
        },
    )
    .await?;
    tracing::debug!("rendezvous path authenticated");

    nominate_and_switch(conn, is_nominator, &etk, &auth_hello.etk).await
}

/// Initiator side: answer the responder's handshake.
pub async fn initiate(
    conn: &mut dyn RendezvousConnection,
    is_nominator: bool,
) -> Result<PathHash, RendezvousError> {
    let hello: Hello = receive_message(conn).await?;
    if hello.challenge.len() != CHALLENGE_LEN {
        return Err(RendezvousError::InvalidProtocolMessage("challenge length"));
    }

    let etk = EphemeralKeypair::generate();
    let challenge: [u8; CHALLENGE_LEN] = random_bytes();
    send_message(
        conn,
        &AuthHello {
            response: hello.challenge,
            challenge: challenge.to_vec(),
            etk: etk.public.to_vec(),
        },
    )
    .await?;

    let auth: Auth = receive_message(conn).await?;
    if auth.response != challenge {
        return Err(RendezvousError::ChallengeMismatch);
    }
    tracing::debug!("rendezvous path authenticated");

    nominate_and_switch(conn, is_nominator, &etk, &hello.etk).await
}

async fn nominate_and_switch(
    conn: &mut dyn RendezvousConnection,
    is_nominator: bool,
    etk: &EphemeralKeypair,
    remote_etk: &[u8],
) -> Result<PathHash, RendezvousError> {
    if is_nominator {
        send_message(conn, &Nominate {}).await?;
    } else {
        let _: Nominate = receive_message(conn).await?;
    }
    let path_hash = conn.switch_to_transport_keys(etk, remote_etk)?;
    tracing::info!(
        nominator = is_nominator,
        path_hash = hex::encode(path_hash),
        "rendezvous path nominated"
    );
    Ok(path_hash)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    #[error("unable to parse offer: {0}")]
    UnableToParseData(#[source] WireError),
    #[error("unable to deserialize handshake message: {0}")]
    UnableToDeserializeData(#[source] WireError),
    #[error("unsupported version {0}")]
    InvalidVersion(i32),
    #[error("invalid protocol message: {0}")]
    InvalidProtocolMessage(&'static str),
    #[error("challenge response does not match")]
    ChallengeMismatch,
    #[error("offer contains no supported path")]
    UnsupportedPath,
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
