//! Chunk wire format and the sending half of the chunking protocol.
//!
//! A message too large for one transport frame is split into chunks. Every
//! chunk carries a fixed 9-byte header followed by raw payload bytes:
//!
//!   byte 0      options bitmask (bit 0 = end of message, bits 1-7 reserved)
//!   bytes 1-4   message id, big-endian u32
//!   bytes 5-8   serial, big-endian u32, zero-based per message
//!
//! The total chunk size is chosen by the caller and includes the header.
//! Reassembly lives in [`crate::unchunker`].

use std::iter::FusedIterator;

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use thiserror::Error;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Header ────────────────────────────────────────────────────────────────────

/// Header length in bytes.
pub const HEADER_LEN: usize = 9;

/// Options bit marking the final chunk of a message.
pub const OPTION_END_OF_MESSAGE: u8 = 0x01;

/// Options bits that must be zero on the wire.
pub const OPTIONS_RESERVED_MASK: u8 = !OPTION_END_OF_MESSAGE;

/// On-wire chunk header.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    pub options: u8,
    pub id: U32<BigEndian>,
    pub serial: U32<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkHeader, [u8; HEADER_LEN]);

impl ChunkHeader {
    pub fn new(end_of_message: bool, id: u32, serial: u32) -> Self {
        Self {
            options: if end_of_message { OPTION_END_OF_MESSAGE } else { 0 },
            id: U32::new(id),
            serial: U32::new(serial),
        }
    }

    pub fn end_of_message(&self) -> bool {
        self.options & OPTION_END_OF_MESSAGE != 0
    }
}

// ── Chunk ─────────────────────────────────────────────────────────────────────

/// One parsed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub end_of_message: bool,
    pub id: u32,
    pub serial: u32,
    pub data: Bytes,
}

impl Chunk {
    /// Parse a chunk from wire bytes. The payload is copied.
    pub fn parse(bytes: &[u8]) -> Result<Self, ChunkError> {
        Self::from_bytes(Bytes::copy_from_slice(bytes))
    }

    /// Parse a chunk, slicing the payload out of `bytes` without copying.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, ChunkError> {
        if bytes.len() < HEADER_LEN {
            return Err(ChunkError::ChunkTooSmall { len: bytes.len() });
        }
        let header = ChunkHeader::read_from_prefix(&bytes[..HEADER_LEN])
            .ok_or(ChunkError::ChunkTooSmall { len: bytes.len() })?;
        if header.options & OPTIONS_RESERVED_MASK != 0 {
            return Err(ChunkError::ReservedOptions(header.options));
        }
        Ok(Self {
            end_of_message: header.end_of_message(),
            id: header.id.get(),
            serial: header.serial.get(),
            data: bytes.slice(HEADER_LEN..),
        })
    }

    pub fn header(&self) -> ChunkHeader {
        ChunkHeader::new(self.end_of_message, self.id, self.serial)
    }

    /// Encode back into wire format.
    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN + self.data.len());
        out.put_slice(self.header().as_bytes());
        out.put_slice(&self.data);
        out.freeze()
    }
}

// ── Chunker ───────────────────────────────────────────────────────────────────

/// Splits one message into framed chunks.
///
/// A `Chunker` is a single-use iterator: once the last chunk (the one with
/// the end-of-message bit) has been produced it yields nothing more. Build a
/// new one per message.
///
/// ```
/// use tandem_core::chunk::Chunker;
/// let chunks: Vec<_> = Chunker::new(7, &b"hello world"[..], 13).unwrap().collect();
/// assert_eq!(chunks.len(), 3);
/// assert_eq!(chunks[0].len(), 13);
/// ```
#[derive(Debug)]
pub struct Chunker {
    id: u32,
    data: Bytes,
    payload_size: usize,
    offset: usize,
    serial: u32,
}

impl Chunker {
    /// `chunk_size` is the total framed size of each chunk, header included.
    pub fn new(id: u32, data: impl Into<Bytes>, chunk_size: usize) -> Result<Self, ChunkError> {
        if chunk_size < HEADER_LEN + 1 {
            return Err(ChunkError::ChunkSizeTooSmall { chunk_size });
        }
        let data = data.into();
        if data.is_empty() {
            return Err(ChunkError::DataEmpty);
        }
        Ok(Self {
            id,
            data,
            payload_size: chunk_size - HEADER_LEN,
            offset: 0,
            serial: 0,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Chunks not yet produced.
    pub fn remaining_chunks(&self) -> usize {
        (self.data.len() - self.offset).div_ceil(self.payload_size)
    }
}

impl Iterator for Chunker {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.offset >= self.data.len() {
            return None;
        }
        let remaining = self.data.len() - self.offset;
        let take = remaining.min(self.payload_size);
        let end_of_message = take == remaining;

        let header = ChunkHeader::new(end_of_message, self.id, self.serial);
        let mut out = BytesMut::with_capacity(HEADER_LEN + take);
        out.put_slice(header.as_bytes());
        out.put_slice(&self.data[self.offset..self.offset + take]);

        self.offset += take;
        self.serial = self.serial.wrapping_add(1);
        Some(out.freeze())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining_chunks();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunker {}
impl FusedIterator for Chunker {}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk too small: {len} bytes, header alone is {HEADER_LEN}")]
    ChunkTooSmall { len: usize },
    #[error("reserved option bits set: {0:#04x}")]
    ReservedOptions(u8),
    #[error("chunk size {chunk_size} leaves no room for payload")]
    ChunkSizeTooSmall { chunk_size: usize },
    #[error("cannot chunk an empty message")]
    DataEmpty,
    #[error("chunk for message {actual} added to collector of message {expected}")]
    InconsistentMessageId { expected: u32, actual: u32 },
    #[error("message {id} is not yet complete")]
    MessageNotYetComplete { id: u32 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
