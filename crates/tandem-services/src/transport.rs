//! Frame transports.
//!
//! A [`FrameTransport`] moves whole frames. [`StreamFrameTransport`] frames a
//! byte stream with a 4-byte big-endian length, [`ChunkedTransport`] carries
//! messages of any size over a transport with a frame size limit.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tandem_core::chunk::{ChunkError, Chunker};
use tandem_core::config::ChunkingConfig;
use tandem_core::unchunker::Unchunker;

/// Anything that moves discrete frames between two endpoints.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Wait for the next frame. [`TransportError::Closed`] once the peer is gone.
    async fn receive(&mut self) -> Result<Bytes, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

// ── Length-prefixed stream ────────────────────────────────────────────────────

const LENGTH_PREFIX: usize = 4;

/// Frames over any byte stream: `len: u32 BE || frame`.
pub struct StreamFrameTransport<S> {
    stream: S,
    max_frame_bytes: usize,
}

pub type TcpFrameTransport = StreamFrameTransport<TcpStream>;

impl<S> StreamFrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, max_frame_bytes: usize) -> Self {
        Self {
            stream,
            max_frame_bytes: max_frame_bytes.min(u32::MAX as usize),
        }
    }
}

impl TcpFrameTransport {
    pub async fn connect(addr: &str, max_frame_bytes: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr, "tcp frame transport connected");
        Ok(Self::new(stream, max_frame_bytes))
    }
}

#[async_trait]
impl<S> FrameTransport for StreamFrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame_bytes,
            });
        }
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + frame.len());
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(&frame);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        let mut len = [0u8; LENGTH_PREFIX];
        match self.stream.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Closed)
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len) as usize;
        if len > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }
        let mut frame = vec![0u8; len];
        self.stream.read_exact(&mut frame).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                e.into()
            }
        })?;
        Ok(Bytes::from(frame))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// One end of an in-process frame pipe.
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Two connected in-memory transports.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryTransport {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

// ── Chunked ───────────────────────────────────────────────────────────────────

/// Messages of any size over a frame transport whose frames are limited to
/// `chunk_size` bytes.
///
/// Partial messages older than the configured max age are dropped, checked
/// on receive whenever the GC interval has elapsed.
pub struct ChunkedTransport<T> {
    inner: T,
    chunk_size: usize,
    next_id: u32,
    unchunker: Unchunker,
    complete: mpsc::UnboundedReceiver<Bytes>,
    gc_interval: Duration,
    gc_max_age: Duration,
    last_gc: Instant,
}

impl<T: FrameTransport> ChunkedTransport<T> {
    pub fn new(inner: T, config: &ChunkingConfig) -> Self {
        let (tx, complete) = mpsc::unbounded_channel();
        let unchunker = Unchunker::new(move |message: Bytes| {
            // Receiver lives as long as the transport.
            let _ = tx.send(message);
        });
        Self {
            inner,
            chunk_size: config.chunk_size,
            next_id: 0,
            unchunker,
            complete,
            gc_interval: config.gc_interval(),
            gc_max_age: config.gc_max_age(),
            last_gc: Instant::now(),
        }
    }

    /// Messages still being reassembled.
    pub fn pending_messages(&self) -> usize {
        self.unchunker.pending_messages()
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn maybe_gc(&mut self) {
        if self.last_gc.elapsed() < self.gc_interval {
            return;
        }
        self.last_gc = Instant::now();
        let dropped = self.unchunker.gc(self.gc_max_age);
        if dropped > 0 {
            tracing::warn!(dropped, "dropped stale partial messages");
        }
    }
}

#[async_trait]
impl<T: FrameTransport> FrameTransport for ChunkedTransport<T> {
    async fn send(&mut self, message: Bytes) -> Result<(), TransportError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let chunker = Chunker::new(id, message, self.chunk_size)?;
        tracing::trace!(id, chunks = chunker.len(), "sending chunked message");
        for chunk in chunker {
            self.inner.send(chunk).await?;
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        loop {
            if let Ok(message) = self.complete.try_recv() {
                return Ok(message);
            }
            self.maybe_gc();
            let frame = self.inner.receive().await?;
            self.unchunker.add_chunk(&frame)?;
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("chunking failed: {0}")]
    Chunk(#[from] ChunkError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
