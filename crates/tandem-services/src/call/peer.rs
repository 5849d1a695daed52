//! Peer connection seam: the media/data connection to the SFU.
//!
//! Incoming data channel messages arrive on a [`MessageStream`]. A receive
//! parked on the stream does not observe task cancellation by itself, so
//! every stream can be woken with an empty [`PeerConnectionMessage`]: the
//! sentinel. Whoever cancels a call pushes one through a [`MessageWaker`],
//! which holds the channel weakly so the stream still ends when the last
//! real sender goes away.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use tandem_core::signaling::JoinResponse;

use super::GroupCallError;

/// One SFU data channel message. Empty data is the wake-up sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnectionMessage {
    pub data: Bytes,
}

impl PeerConnectionMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn sentinel() -> Self {
        Self { data: Bytes::new() }
    }

    pub fn is_sentinel(&self) -> bool {
        self.data.is_empty()
    }
}

/// Producer half of a [`MessageStream`].
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<PeerConnectionMessage>,
}

impl MessageSender {
    /// Returns false once the stream is gone.
    pub fn send(&self, message: PeerConnectionMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Push the sentinel so a parked receive returns.
    pub fn wake(&self) -> bool {
        self.send(PeerConnectionMessage::sentinel())
    }
}

/// Weak handle that can push the sentinel into a [`MessageStream`] without
/// keeping it open.
#[derive(Debug, Clone)]
pub struct MessageWaker {
    tx: mpsc::WeakUnboundedSender<PeerConnectionMessage>,
}

impl MessageWaker {
    /// Returns false if the stream already ended; a receive on it returns
    /// immediately then.
    pub fn wake(&self) -> bool {
        self.tx
            .upgrade()
            .is_some_and(|tx| tx.send(PeerConnectionMessage::sentinel()).is_ok())
    }
}

/// Ordered incoming messages of one peer connection.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<PeerConnectionMessage>,
    waker: mpsc::WeakUnboundedSender<PeerConnectionMessage>,
}

pub fn message_channel() -> (MessageSender, MessageStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = MessageStream {
        rx,
        waker: tx.downgrade(),
    };
    (MessageSender { tx }, stream)
}

impl MessageStream {
    /// Next message, `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<PeerConnectionMessage> {
        self.rx.recv().await
    }

    pub fn waker(&self) -> MessageWaker {
        MessageWaker {
            tx: self.waker.clone(),
        }
    }
}

/// Operations a call needs from its peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    /// Send an encoded `ParticipantToSfu` envelope on the data channel.
    async fn send(&mut self, envelope: Bytes) -> Result<(), GroupCallError>;

    async fn set_audio_capture(&mut self, enabled: bool) -> Result<(), GroupCallError>;

    async fn set_video_capture(&mut self, enabled: bool) -> Result<(), GroupCallError>;

    async fn switch_camera(&mut self) -> Result<(), GroupCallError>;

    async fn close(&mut self);
}

/// Establishes the peer connection described by a join response.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        join: &JoinResponse,
    ) -> Result<(Box<dyn PeerConnection>, MessageStream), GroupCallError>;
}
