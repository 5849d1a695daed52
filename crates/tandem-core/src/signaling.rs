//! Group call signaling messages.
//!
//! Three layers, all protobuf:
//!   - SFU HTTP bodies (peek and join, request and response)
//!   - SFU data channel envelopes (`SfuToParticipant`, `ParticipantToSfu`)
//!   - participant-to-participant messages carried sealed inside a
//!     [`Relay`] (`P2pMessage`)
//!
//! Same rules as [`crate::wire`]: tags are the protocol, decode with
//! [`crate::wire::decode`].

use prost::Message;

// ── SFU HTTP ──────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct PeekRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub call_id: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct JoinRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub call_id: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub protocol_version: u32,
}

/// Body of a successful peek.
#[derive(Clone, PartialEq, Message)]
pub struct PeekResponse {
    /// Unix millis.
    #[prost(uint64, tag = "1")]
    pub started_at: u64,
    #[prost(uint32, tag = "2")]
    pub max_participants: u32,
    /// [`CallStateSnapshot`] sealed with GCSK, if any participant stored one.
    #[prost(bytes = "vec", optional, tag = "3")]
    pub encrypted_call_state: Option<Vec<u8>>,
}

/// Body of a successful join.
#[derive(Clone, PartialEq, Message)]
pub struct JoinResponse {
    #[prost(uint64, tag = "1")]
    pub started_at: u64,
    /// Id the SFU assigned to us for this call.
    #[prost(uint32, tag = "2")]
    pub participant_id: u32,
    #[prost(string, repeated, tag = "3")]
    pub addresses: Vec<String>,
    #[prost(string, tag = "4")]
    pub ice_username_fragment: String,
    #[prost(string, tag = "5")]
    pub ice_password: String,
    #[prost(bytes = "vec", tag = "6")]
    pub dtls_fingerprint: Vec<u8>,
}

// ── SFU envelopes ─────────────────────────────────────────────────────────────

/// Opaque participant-to-participant message forwarded by the SFU.
#[derive(Clone, PartialEq, Message)]
pub struct Relay {
    #[prost(uint32, tag = "1")]
    pub sender: u32,
    #[prost(uint32, tag = "2")]
    pub receiver: u32,
    /// Sealed [`P2pMessage`], nonce first.
    #[prost(bytes = "vec", tag = "3")]
    pub message_and_nonce: Vec<u8>,
}

/// First message from the SFU once the peer connection is up.
#[derive(Clone, PartialEq, Message)]
pub struct SfuHello {
    #[prost(uint32, repeated, tag = "1")]
    pub participant_ids: Vec<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ParticipantJoined {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ParticipantLeft {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum SfuToParticipantContent {
    #[prost(message, tag = "1")]
    Relay(Relay),
    #[prost(message, tag = "2")]
    Hello(SfuHello),
    #[prost(message, tag = "3")]
    ParticipantJoined(ParticipantJoined),
    #[prost(message, tag = "4")]
    ParticipantLeft(ParticipantLeft),
}

#[derive(Clone, PartialEq, Message)]
pub struct SfuToParticipant {
    #[prost(oneof = "SfuToParticipantContent", tags = "1, 2, 3, 4")]
    pub content: Option<SfuToParticipantContent>,
}

impl SfuToParticipant {
    pub fn new(content: SfuToParticipantContent) -> Self {
        Self {
            content: Some(content),
        }
    }
}

/// Stores the sealed call state at the SFU for peekers.
#[derive(Clone, PartialEq, Message)]
pub struct UpdateCallState {
    #[prost(bytes = "vec", tag = "1")]
    pub encrypted_call_state: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CameraResolution {
    Low = 0,
    High = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestParticipantCamera {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
    #[prost(enumeration = "CameraResolution", tag = "2")]
    pub resolution: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct DiscardParticipantCamera {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ParticipantToSfuContent {
    #[prost(message, tag = "1")]
    Relay(Relay),
    #[prost(message, tag = "2")]
    UpdateCallState(UpdateCallState),
    #[prost(message, tag = "3")]
    RequestParticipantCamera(RequestParticipantCamera),
    #[prost(message, tag = "4")]
    DiscardParticipantCamera(DiscardParticipantCamera),
}

#[derive(Clone, PartialEq, Message)]
pub struct ParticipantToSfu {
    #[prost(oneof = "ParticipantToSfuContent", tags = "1, 2, 3, 4")]
    pub content: Option<ParticipantToSfuContent>,
}

impl ParticipantToSfu {
    pub fn new(content: ParticipantToSfuContent) -> Self {
        Self {
            content: Some(content),
        }
    }
}

// ── Call state ────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct CallParticipant {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,
    #[prost(string, tag = "2")]
    pub identity: String,
    #[prost(string, tag = "3")]
    pub nickname: String,
}

/// Plaintext of the sealed call state kept at the SFU.
#[derive(Clone, PartialEq, Message)]
pub struct CallStateSnapshot {
    #[prost(uint32, tag = "1")]
    pub state_created_by: u32,
    /// Unix millis.
    #[prost(uint64, tag = "2")]
    pub state_created_at: u64,
    #[prost(message, repeated, tag = "3")]
    pub participants: Vec<CallParticipant>,
}

// ── Participant to participant ────────────────────────────────────────────────

/// Sealed with GCHK. Announces identity and the ephemeral participant key.
#[derive(Clone, PartialEq, Message)]
pub struct HandshakeHello {
    #[prost(string, tag = "1")]
    pub identity: String,
    #[prost(string, tag = "2")]
    pub nickname: String,
    /// Participant call key (X25519 public).
    #[prost(bytes = "vec", tag = "3")]
    pub pck: Vec<u8>,
    /// Participant call cookie.
    #[prost(bytes = "vec", tag = "4")]
    pub pcck: Vec<u8>,
}

/// A media key as distributed to other participants.
#[derive(Clone, PartialEq, Message)]
pub struct MediaKey {
    #[prost(uint32, tag = "1")]
    pub epoch: u32,
    #[prost(uint32, tag = "2")]
    pub ratchet_counter: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub pcmk: Vec<u8>,
}

/// Sealed with GCNHAK. Proves possession of the pairwise key by echoing the
/// receiver's PCK and cookie, and hands over our media key.
#[derive(Clone, PartialEq, Message)]
pub struct HandshakeAuth {
    #[prost(bytes = "vec", tag = "1")]
    pub pck: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub pcck: Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    pub media_keys: Vec<MediaKey>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CaptureState {
    #[prost(bool, tag = "1")]
    pub microphone_on: bool,
    #[prost(bool, tag = "2")]
    pub camera_on: bool,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum P2pContent {
    #[prost(message, tag = "1")]
    Hello(HandshakeHello),
    #[prost(message, tag = "2")]
    Auth(HandshakeAuth),
    #[prost(message, tag = "3")]
    CaptureState(CaptureState),
    #[prost(message, tag = "4")]
    Rekey(MediaKey),
}

#[derive(Clone, PartialEq, Message)]
pub struct P2pMessage {
    #[prost(oneof = "P2pContent", tags = "1, 2, 3, 4")]
    pub content: Option<P2pContent>,
}

impl P2pMessage {
    pub fn new(content: P2pContent) -> Self {
        Self {
            content: Some(content),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
