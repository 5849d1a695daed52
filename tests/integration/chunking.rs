use crate::*;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use tandem_core::chunk::HEADER_LEN;
use tandem_core::{Chunker, Unchunker};
use tandem_services::transport::{memory_pair, ChunkedTransport, FrameTransport};

fn collecting_unchunker() -> (Unchunker, Arc<Mutex<Vec<Bytes>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let unchunker = Unchunker::new(move |message: Bytes| sink.lock().unwrap().push(message));
    (unchunker, received)
}

/// Several messages chunked, interleaved and shuffled still come out whole.
#[test]
fn test_interleaved_messages_reassemble() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x7a4d);
    let messages: Vec<Bytes> = (0..5u8)
        .map(|i| Bytes::from(vec![i; 100 + usize::from(i) * 37]))
        .collect();

    let mut frames: Vec<Bytes> = messages
        .iter()
        .enumerate()
        .flat_map(|(id, m)| Chunker::new(id as u32, m.clone(), HEADER_LEN + 7).unwrap())
        .collect();
    frames.shuffle(&mut rng);

    let (unchunker, received) = collecting_unchunker();
    for frame in &frames {
        unchunker.add_chunk(frame).unwrap();
    }

    let mut got = received.lock().unwrap().clone();
    got.sort_by_key(|m| m[0]);
    assert_eq!(got, messages);
    assert_eq!(unchunker.pending_messages(), 0);
}

/// A chunked transport over an in-memory frame pair, chunk size far below
/// the message size.
#[tokio::test]
async fn test_chunked_transport_carries_large_message() {
    let (a, b) = memory_pair();
    let mut a = ChunkedTransport::new(a, &small_chunks());
    let mut b = ChunkedTransport::new(b, &small_chunks());

    let message = Bytes::from(vec![0xa5; 64 * 1024]);
    a.send(message.clone()).await.unwrap();
    a.send(Bytes::from_static(b"tail")).await.unwrap();

    assert_eq!(within("large message", b.receive()).await.unwrap(), message);
    assert_eq!(within("tail", b.receive()).await.unwrap(), Bytes::from_static(b"tail"));
    assert_eq!(b.pending_messages(), 0);
}

/// A message missing its last chunk stays pending; the serialized chunks
/// can be fed to a fresh unchunker.
#[test]
fn test_partial_message_survives_serialization() {
    let frames: Vec<Bytes> = Chunker::new(9, vec![3u8; 50], HEADER_LEN + 10).unwrap().collect();
    let (first, last) = frames.split_at(frames.len() - 1);

    let (unchunker, _) = collecting_unchunker();
    for frame in first {
        unchunker.add_chunk(frame).unwrap();
    }
    assert_eq!(unchunker.pending_messages(), 1);

    let (restored, received) = collecting_unchunker();
    for frame in unchunker.serialize() {
        restored.add_chunk(&frame).unwrap();
    }
    restored.add_chunk(&last[0]).unwrap();
    assert_eq!(received.lock().unwrap().as_slice(), &[Bytes::from(vec![3u8; 50])]);
}
