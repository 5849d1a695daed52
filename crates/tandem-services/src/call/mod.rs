//! Group calls. One actor task per call drives a [`CallState`] machine
//! against the SFU.
//!
//! ```text
//!   Joining ──▶ Connecting ──▶ Connected ──▶ Ending ──▶ Ended
//!      │             │             └────────────────────▲ │
//!      └─────────────┴──────────────────────────────────┘ (404, failure, empty roster)
//! ```

pub mod actor;
pub mod context;
pub mod http;
pub mod peer;
pub mod registry;
pub mod sfu;
pub mod state;

pub use actor::{GroupCallActor, GroupCallHandle};
pub use context::GroupCallContext;
pub use registry::{new_call_registry, GroupCallRegistry};
pub use state::{CallEnvironment, CallState, CallStateKind};

use tandem_core::crypto::CryptoError;
use tandem_core::wire::WireError;

use self::http::HttpError;

/// SFU-assigned participant id, unique within one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(pub u32);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who we are in calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub identity: String,
    pub nickname: String,
}

/// Commands from the UI to a running call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    /// The media connection is up; start the participant handshakes.
    ConnectedConfirmed,
    Leave,
    MuteAudio,
    UnmuteAudio,
    MuteVideo,
    UnmuteVideo,
    SwitchCamera,
    SubscribeVideo(ParticipantId),
    UnsubscribeVideo(ParticipantId),
}

/// Events from a running call to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallUpdate {
    StateChanged(CallStateKind),
    ParticipantJoined {
        id: ParticipantId,
        identity: String,
        nickname: String,
    },
    ParticipantLeft(ParticipantId),
    CaptureStateChanged {
        id: ParticipantId,
        microphone_on: bool,
        camera_on: bool,
    },
    AudioMuted(bool),
    VideoMuted(bool),
    CameraSwitched,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum GroupCallError {
    #[error("SFU answered with status {0}")]
    UnexpectedStatus(u16),
    #[error("http: {0}")]
    Http(#[from] HttpError),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("bad message: {0}")]
    BadMessage(&'static str),
    #[error("peer connection: {0}")]
    PeerConnection(String),
    #[error("signaling stream closed")]
    StreamClosed,
    #[error("timed out")]
    Timeout,
    #[error("call has ended")]
    CallEnded,
}
