//! Receiving half of the chunking protocol.
//!
//! Chunks of several messages may arrive interleaved and out of order. Each
//! message id gets its own [`ChunkCollector`]; once every serial up to the
//! end-of-message chunk is present the collector is merged and the message
//! is handed to the [`MessageSink`].
//!
//! Partial messages whose sender went away are never completed. Call
//! [`Unchunker::gc`] periodically to bound memory.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use crate::chunk::{Chunk, ChunkError};

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Receives every reassembled message, in completion order.
///
/// Called while the unchunker's map lock is held. Implementations must not
/// call back into the same [`Unchunker`].
pub trait MessageSink: Send + Sync {
    fn message_complete(&self, message: Bytes);
}

impl<F> MessageSink for F
where
    F: Fn(Bytes) + Send + Sync,
{
    fn message_complete(&self, message: Bytes) {
        self(message)
    }
}

// ── Collector ─────────────────────────────────────────────────────────────────

/// Accumulates the chunks of one message.
#[derive(Debug)]
pub struct ChunkCollector {
    id: u32,
    chunks: Vec<Chunk>,
    end_arrived: bool,
    message_length: usize,
    last_update: Instant,
}

impl ChunkCollector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            chunks: Vec::new(),
            end_arrived: false,
            message_length: 0,
            last_update: Instant::now(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn add_chunk(&mut self, chunk: Chunk) -> Result<(), ChunkError> {
        if chunk.id != self.id {
            return Err(ChunkError::InconsistentMessageId {
                expected: self.id,
                actual: chunk.id,
            });
        }
        self.last_update = Instant::now();
        if self.contains(chunk.serial) {
            return Ok(());
        }
        if self.end_arrived {
            if chunk.end_of_message || chunk.serial as usize >= self.message_length {
                tracing::debug!(id = self.id, serial = chunk.serial, "ignoring chunk past end of message");
                return Ok(());
            }
        } else if chunk.end_of_message {
            self.end_arrived = true;
            self.message_length = chunk.serial as usize + 1;
            let length = self.message_length;
            let before = self.chunks.len();
            self.chunks.retain(|c| (c.serial as usize) < length);
            if self.chunks.len() < before {
                tracing::debug!(
                    id = self.id,
                    dropped = before - self.chunks.len(),
                    "dropping chunks past end of message"
                );
            }
        }
        self.chunks.push(chunk);
        Ok(())
    }

    pub fn contains(&self, serial: u32) -> bool {
        self.chunks.iter().any(|c| c.serial == serial)
    }

    /// True once the end chunk arrived and every serial before it is present.
    /// Serials are unique and below the end serial, so counting suffices.
    pub fn is_complete(&self) -> bool {
        self.end_arrived && self.chunks.len() == self.message_length
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.last_update.elapsed() > max_age
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Sort by serial and concatenate the payloads.
    pub fn merge(&mut self) -> Result<Bytes, ChunkError> {
        if !self.is_complete() {
            return Err(ChunkError::MessageNotYetComplete { id: self.id });
        }
        self.chunks.sort_by_key(|c| c.serial);
        let total = self.chunks.iter().map(|c| c.data.len()).sum();
        let mut out = BytesMut::with_capacity(total);
        for chunk in &self.chunks {
            out.put_slice(&chunk.data);
        }
        Ok(out.freeze())
    }

    /// Wire bytes of every buffered chunk, in arrival order.
    pub fn serialize(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().map(|c| c.serialize().to_vec()).collect()
    }
}

// ── Unchunker ─────────────────────────────────────────────────────────────────

/// Reassembles chunked messages.
///
/// The id → collector map sits behind a single mutex; `add_chunk`, `gc` and
/// `serialize` each run as one critical section and may be called from any
/// thread.
pub struct Unchunker {
    collectors: Mutex<HashMap<u32, ChunkCollector>>,
    sink: Box<dyn MessageSink>,
}

impl Unchunker {
    pub fn new(sink: impl MessageSink + 'static) -> Self {
        Self {
            collectors: Mutex::new(HashMap::new()),
            sink: Box::new(sink),
        }
    }

    /// Feed one chunk in wire format.
    pub fn add_chunk(&self, bytes: &[u8]) -> Result<(), ChunkError> {
        let chunk = Chunk::parse(bytes)?;
        let mut collectors = self.lock();

        // Single-chunk message: deliver without a collector.
        if chunk.serial == 0 && chunk.end_of_message {
            if collectors.remove(&chunk.id).is_some() {
                tracing::debug!(id = chunk.id, "dropping partial collector replaced by single-chunk message");
            }
            self.sink.message_complete(chunk.data);
            return Ok(());
        }

        let id = chunk.id;
        let collector = collectors
            .entry(id)
            .or_insert_with(|| ChunkCollector::new(id));
        if collector.contains(chunk.serial) {
            tracing::trace!(id, serial = chunk.serial, "ignoring repeated chunk");
            return Ok(());
        }
        collector.add_chunk(chunk)?;

        if collector.is_complete() {
            let message = collector.merge()?;
            collectors.remove(&id);
            tracing::trace!(id, len = message.len(), "message reassembled");
            self.sink.message_complete(message);
        }
        Ok(())
    }

    /// Drop collectors idle for longer than `max_age`. Returns the number of
    /// chunks discarded.
    pub fn gc(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        self.lock().retain(|id, collector| {
            let stale = collector.is_older_than(max_age);
            if stale {
                removed += collector.chunk_count();
                tracing::warn!(id, chunks = collector.chunk_count(), "removing stale partial message");
            }
            !stale
        });
        removed
    }

    /// Wire bytes of every buffered chunk across all partial messages.
    pub fn serialize(&self) -> Vec<Vec<u8>> {
        self.lock()
            .values()
            .flat_map(ChunkCollector::serialize)
            .collect()
    }

    /// Number of messages currently partially received.
    pub fn pending_messages(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, ChunkCollector>> {
        self.collectors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
