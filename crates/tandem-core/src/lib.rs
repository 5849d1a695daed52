//! tandem-core: wire format, key schedules and chunking.
//! All other Tandem crates depend on this one.

pub mod call_keys;
pub mod chunk;
pub mod config;
pub mod crypto;
pub mod signaling;
pub mod unchunker;
pub mod wire;

pub use chunk::{Chunk, ChunkError, Chunker};
pub use config::TandemConfig;
pub use crypto::{DefaultRendezvousCrypto, EphemeralKeypair, PathHash, RendezvousCrypto, Role};
pub use unchunker::{MessageSink, Unchunker};
