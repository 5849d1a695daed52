//! Tandem wire format: protobuf messages of the rendezvous protocol and the
//! device join offer that bootstraps it.
//!
//! These types ARE the protocol. Field tags and enum values are part of the
//! wire format and must never be renumbered. Message structs are written by
//! hand with prost derives, so no build script or protoc is involved.
//!
//! Payloads stay opaque `Vec<u8>` at this layer. Use [`encode`] and
//! [`decode`] at the envelope boundary; decoding never panics and reports a
//! [`WireError`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use prost::Message;
use thiserror::Error;

// ── Envelope helpers ──────────────────────────────────────────────────────────

/// Serialize a message.
pub fn encode<M: Message>(message: &M) -> Bytes {
    Bytes::from(message.encode_to_vec())
}

/// Deserialize a message.
pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M, WireError> {
    M::decode(bytes).map_err(WireError::Decode)
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// RRD → RID. First handshake message.
#[derive(Clone, PartialEq, Message)]
pub struct Hello {
    /// Random challenge the RID must echo.
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
    /// RRD's ephemeral transport public key.
    #[prost(bytes = "vec", tag = "2")]
    pub etk: Vec<u8>,
}

/// RID → RRD. Answers the Hello and poses the RID's own challenge.
#[derive(Clone, PartialEq, Message)]
pub struct AuthHello {
    #[prost(bytes = "vec", tag = "1")]
    pub response: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub challenge: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub etk: Vec<u8>,
}

/// RRD → RID. Answers the RID's challenge.
#[derive(Clone, PartialEq, Message)]
pub struct Auth {
    #[prost(bytes = "vec", tag = "1")]
    pub response: Vec<u8>,
}

/// Either side. Selects the path it is sent on.
#[derive(Clone, PartialEq, Message)]
pub struct Nominate {}

// ── Rendezvous init ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RendezvousVersion {
    V10 = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum NetworkCost {
    Unknown = 0,
    Unmetered = 1,
    Metered = 2,
}

/// Relayed WebSocket path.
#[derive(Clone, PartialEq, Message)]
pub struct RelayedWebSocket {
    #[prost(uint32, tag = "1")]
    pub path_id: u32,
    #[prost(enumeration = "NetworkCost", tag = "2")]
    pub network_cost: i32,
    #[prost(string, tag = "3")]
    pub url: String,
}

/// One address of a direct TCP server.
#[derive(Clone, PartialEq, Message)]
pub struct IpAddress {
    #[prost(uint32, tag = "1")]
    pub path_id: u32,
    #[prost(enumeration = "NetworkCost", tag = "2")]
    pub network_cost: i32,
    #[prost(string, tag = "3")]
    pub ip: String,
}

/// Direct TCP server path(s) offered by the RID.
#[derive(Clone, PartialEq, Message)]
pub struct DirectTcpServer {
    #[prost(uint32, repeated, tag = "1")]
    pub ports: Vec<u32>,
    #[prost(message, repeated, tag = "2")]
    pub ip_addresses: Vec<IpAddress>,
}

/// Everything the RRD needs to reach the RID and authenticate.
#[derive(Clone, PartialEq, Message)]
pub struct RendezvousInit {
    #[prost(enumeration = "RendezvousVersion", tag = "1")]
    pub version: i32,
    /// Authentication key (AK), 32 bytes.
    #[prost(bytes = "vec", tag = "2")]
    pub ak: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub relayed_web_socket: Option<RelayedWebSocket>,
    #[prost(message, optional, tag = "4")]
    pub direct_tcp_server: Option<DirectTcpServer>,
}

impl RendezvousInit {
    /// Every path id offered, in declaration order.
    pub fn path_ids(&self) -> Vec<u32> {
        let relayed = self.relayed_web_socket.iter().map(|r| r.path_id);
        let direct = self
            .direct_tcp_server
            .iter()
            .flat_map(|d| d.ip_addresses.iter().map(|a| a.path_id));
        relayed.chain(direct).collect()
    }
}

// ── Device join offer ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DeviceGroupJoinVersion {
    V10 = 0,
}

#[derive(Clone, Copy, PartialEq, Message)]
pub struct Unit {}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum JoinVariantType {
    #[prost(message, tag = "1")]
    RequestToJoin(Unit),
    #[prost(message, tag = "2")]
    OfferToJoin(Unit),
}

#[derive(Clone, PartialEq, Message)]
pub struct JoinVariant {
    #[prost(oneof = "JoinVariantType", tags = "1, 2")]
    pub r#type: Option<JoinVariantType>,
}

/// The payload of a device-linking QR code or link.
#[derive(Clone, PartialEq, Message)]
pub struct DeviceGroupJoinRequestOrOffer {
    #[prost(enumeration = "DeviceGroupJoinVersion", tag = "1")]
    pub version: i32,
    #[prost(message, optional, tag = "2")]
    pub variant: Option<JoinVariant>,
    #[prost(message, optional, tag = "3")]
    pub rendezvous_init: Option<RendezvousInit>,
}

impl DeviceGroupJoinRequestOrOffer {
    /// A request to join carrying `init`.
    pub fn request_to_join(init: RendezvousInit) -> Self {
        Self {
            version: DeviceGroupJoinVersion::V10 as i32,
            variant: Some(JoinVariant {
                r#type: Some(JoinVariantType::RequestToJoin(Unit {})),
            }),
            rendezvous_init: Some(init),
        }
    }

    pub fn is_request_to_join(&self) -> bool {
        matches!(
            self.variant.as_ref().and_then(|v| v.r#type.as_ref()),
            Some(JoinVariantType::RequestToJoin(_))
        )
    }
}

/// URL-safe base64 (unpadded) of the serialized offer.
pub fn encode_join_offer(offer: &DeviceGroupJoinRequestOrOffer) -> String {
    URL_SAFE_NO_PAD.encode(offer.encode_to_vec())
}

/// Inverse of [`encode_join_offer`]. Trailing `=` padding is tolerated.
pub fn decode_join_offer(text: &str) -> Result<DeviceGroupJoinRequestOrOffer, WireError> {
    let raw = URL_SAFE_NO_PAD
        .decode(text.trim().trim_end_matches('='))
        .map_err(WireError::Base64)?;
    decode(&raw)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid base64: {0}")]
    Base64(base64::DecodeError),
    #[error("protobuf decode failed: {0}")]
    Decode(prost::DecodeError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn init() -> RendezvousInit {
        RendezvousInit {
            version: RendezvousVersion::V10 as i32,
            ak: vec![0x01; 32],
            relayed_web_socket: Some(RelayedWebSocket {
                path_id: 1,
                network_cost: NetworkCost::Unknown as i32,
                url: "wss://rendezvous.example/abc".into(),
            }),
            direct_tcp_server: Some(DirectTcpServer {
                ports: vec![9400],
                ip_addresses: vec![IpAddress {
                    path_id: 2,
                    network_cost: NetworkCost::Unmetered as i32,
                    ip: "127.0.0.1".into(),
                }],
            }),
        }
    }

    #[test]
    fn hello_field_layout() {
        let hello = Hello {
            challenge: vec![0xAA; 2],
            etk: vec![0xBB],
        };
        // tag 1 len 2, tag 2 len 1
        assert_eq!(encode(&hello).as_ref(), &[0x0A, 2, 0xAA, 0xAA, 0x12, 1, 0xBB]);
    }

    #[test]
    fn nominate_encodes_empty() {
        assert!(encode(&Nominate {}).is_empty());
        let _: Nominate = decode(&[]).unwrap();
    }

    #[test]
    fn decode_reports_garbage() {
        let result: Result<AuthHello, _> = decode(&[0x0A, 0x05, 0x01]);
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[test]
    fn path_ids_cover_all_paths() {
        assert_eq!(init().path_ids(), vec![1, 2]);
    }

    #[test]
    fn join_offer_text_roundtrip() {
        let offer = DeviceGroupJoinRequestOrOffer::request_to_join(init());
        let text = encode_join_offer(&offer);
        assert!(!text.contains('+') && !text.contains('/') && !text.contains('='));
        let back = decode_join_offer(&text).unwrap();
        assert!(back.is_request_to_join());
        assert_eq!(back, offer);
    }

    #[test]
    fn join_offer_tolerates_padding() {
        let offer = DeviceGroupJoinRequestOrOffer::request_to_join(init());
        let padded = format!("{}==", encode_join_offer(&offer));
        assert_eq!(decode_join_offer(&padded).unwrap(), offer);
    }

    #[test]
    fn join_offer_rejects_bad_base64() {
        assert!(matches!(
            decode_join_offer("not*base64"),
            Err(WireError::Base64(_))
        ));
    }
}
