//! tandem-services: frame transports, the rendezvous handshake and group
//! call connections. Everything that needs a tokio runtime lives here.

pub mod call;
pub mod rendezvous;
pub mod transport;

pub use call::{
    new_call_registry, CallAction, CallUpdate, GroupCallActor, GroupCallError, GroupCallHandle,
    GroupCallRegistry, LocalIdentity, ParticipantId,
};
pub use rendezvous::{RendezvousConnection, RendezvousConnector, RendezvousError};
pub use transport::{ChunkedTransport, FrameTransport, TcpFrameTransport, TransportError};
