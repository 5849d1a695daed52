//! Group call connection state machine.
//!
//! Each state consumes itself in `next()` and returns the following
//! [`CallState`]. Suspension happens only at I/O: the SFU join request, the
//! peer connection setup and the signaling stream. While `Connected`, every
//! wake-up is turned into a [`CallEvent`] and fed through [`step`], which does
//! no I/O and can be driven directly from tests.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tandem_core::call_keys::GroupCallBaseState;
use tandem_core::config::CallsConfig;
use tandem_core::signaling::{JoinResponse, SfuToParticipant, SfuToParticipantContent};
use tandem_core::wire::decode;

use super::context::{Effect, GroupCallContext};
use super::http::HttpClient;
use super::peer::{MessageStream, MessageWaker, PeerConnection, PeerConnectionMessage, PeerConnector};
use super::{sfu, CallAction, CallUpdate, GroupCallError, LocalIdentity, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStateKind {
    Joining,
    Connecting,
    Connected,
    Ending,
    Ended,
}

impl std::fmt::Display for CallStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Joining => "joining",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ending => "ending",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The SFU no longer knows the call.
    NotFound,
    /// The user left.
    Left,
    Cancelled,
    /// The signaling stream ended underneath us.
    StreamClosed,
    Failed,
}

/// Everything a call needs from the outside, owned by the driving task.
pub struct CallEnvironment {
    pub http: Arc<dyn HttpClient>,
    pub connector: Arc<dyn PeerConnector>,
    pub actions: mpsc::Receiver<CallAction>,
    pub cancel: CancellationToken,
    pub updates: broadcast::Sender<CallUpdate>,
    pub settings: CallsConfig,
}

// ── Connection ────────────────────────────────────────────────────────────────

/// The peer connection and its incoming message stream.
pub struct ConnectionContext {
    peer: Box<dyn PeerConnection>,
    stream: MessageStream,
}

impl ConnectionContext {
    pub fn new(peer: Box<dyn PeerConnection>, stream: MessageStream) -> Self {
        Self { peer, stream }
    }

    /// Pushes the wake-up sentinel into our stream.
    pub fn waker(&self) -> MessageWaker {
        self.stream.waker()
    }

    /// Wait for the SFU hello. Anything else before it is dropped.
    async fn await_sfu_hello(&mut self) -> Result<Vec<ParticipantId>, GroupCallError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Err(GroupCallError::StreamClosed);
            };
            if message.is_sentinel() {
                continue;
            }
            let envelope: SfuToParticipant = match decode(&message.data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable message before SFU hello");
                    continue;
                }
            };
            match envelope.content {
                Some(SfuToParticipantContent::Hello(hello)) => {
                    return Ok(hello.participant_ids.into_iter().map(ParticipantId).collect());
                }
                _ => tracing::debug!("dropping message received before SFU hello"),
            }
        }
    }

    async fn apply(
        &mut self,
        effects: Vec<Effect>,
        updates: &broadcast::Sender<CallUpdate>,
    ) -> Result<(), GroupCallError> {
        for effect in effects {
            match effect {
                Effect::Send(envelope) => self.peer.send(envelope).await?,
                Effect::SetAudioCapture(on) => self.peer.set_audio_capture(on).await?,
                Effect::SetVideoCapture(on) => self.peer.set_video_capture(on).await?,
                Effect::SwitchCamera => self.peer.switch_camera().await?,
                Effect::Notify(update) => {
                    // No subscribers is fine.
                    let _ = updates.send(update);
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.peer.close().await;
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// One wake-up of a connected call.
#[derive(Debug)]
pub enum CallEvent {
    Message(PeerConnectionMessage),
    Action(CallAction),
    Cancelled,
    /// The signaling stream ended.
    Closed,
    StateUpdateDue,
}

/// Outcome of one [`step`].
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue(Vec<Effect>),
    Leave(EndReason),
}

/// Feed one event to a connected call.
///
/// Once `cancelled` is set nothing is processed any more, whatever the event.
/// Malformed signaling is logged and skipped; it never ends the call.
pub fn step(ctx: &mut GroupCallContext, event: CallEvent, cancelled: bool) -> Step {
    if cancelled {
        return Step::Leave(EndReason::Cancelled);
    }
    let result = match event {
        CallEvent::Cancelled => return Step::Leave(EndReason::Cancelled),
        CallEvent::Closed => return Step::Leave(EndReason::StreamClosed),
        CallEvent::Action(CallAction::Leave) => return Step::Leave(EndReason::Left),
        CallEvent::Message(message) if message.is_sentinel() => Ok(Vec::new()),
        CallEvent::Message(message) => ctx.handle_envelope(&message.data),
        CallEvent::Action(action) => ctx.handle_action(action),
        CallEvent::StateUpdateDue => ctx.call_state_update().map(|update| update.into_iter().collect()),
    };
    match result {
        Ok(effects) => Step::Continue(effects),
        Err(e) => {
            tracing::warn!(call_id = %ctx.call_id(), error = %e, "ignoring signaling message");
            Step::Continue(Vec::new())
        }
    }
}

// ── States ────────────────────────────────────────────────────────────────────

pub enum CallState {
    Joining(Joining),
    Connecting(Connecting),
    Connected(Connected),
    Ending(Ending),
    Ended(Ended),
}

impl CallState {
    /// Start of every call.
    pub fn joining(base: Arc<GroupCallBaseState>, identity: LocalIdentity) -> Self {
        Self::Joining(Joining { base, identity })
    }

    pub fn kind(&self) -> CallStateKind {
        match self {
            Self::Joining(_) => CallStateKind::Joining,
            Self::Connecting(_) => CallStateKind::Connecting,
            Self::Connected(_) => CallStateKind::Connected,
            Self::Ending(_) => CallStateKind::Ending,
            Self::Ended(_) => CallStateKind::Ended,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended(_))
    }

    /// Run the current state until it hands over to the next one.
    /// `Ended` returns itself.
    pub async fn next(self, env: &mut CallEnvironment) -> Result<CallState, GroupCallError> {
        match self {
            Self::Joining(s) => s.next(env).await,
            Self::Connecting(s) => s.next(env).await,
            Self::Connected(s) => s.next(env).await,
            Self::Ending(s) => Ok(s.next().await),
            Self::Ended(s) => Ok(Self::Ended(s)),
        }
    }
}

pub struct Joining {
    base: Arc<GroupCallBaseState>,
    identity: LocalIdentity,
}

impl Joining {
    async fn next(self, env: &mut CallEnvironment) -> Result<CallState, GroupCallError> {
        tracing::info!(call_id = %self.base.call_id, "joining call");
        let joined = tokio::select! {
            biased;
            _ = env.cancel.cancelled() => None,
            result = sfu::join_call(env.http.as_ref(), &self.base, env.settings.join_timeout()) => Some(result?),
        };
        Ok(match joined {
            None => CallState::Ended(Ended::new(EndReason::Cancelled)),
            Some(None) => CallState::Ended(Ended::new(EndReason::NotFound)),
            Some(Some(join)) => {
                tracing::debug!(
                    participant = join.participant_id,
                    addresses = join.addresses.len(),
                    "joined call at SFU"
                );
                CallState::Connecting(Connecting {
                    base: self.base,
                    identity: self.identity,
                    join,
                })
            }
        })
    }
}

pub struct Connecting {
    base: Arc<GroupCallBaseState>,
    identity: LocalIdentity,
    join: JoinResponse,
}

impl Connecting {
    async fn next(self, env: &mut CallEnvironment) -> Result<CallState, GroupCallError> {
        let connected = tokio::select! {
            biased;
            _ = env.cancel.cancelled() => None,
            result = env.connector.connect(&self.join) => Some(result?),
        };
        let Some((peer, stream)) = connected else {
            return Ok(CallState::Ended(Ended::new(EndReason::Cancelled)));
        };
        let mut conn = ConnectionContext::new(peer, stream);

        let hello = tokio::select! {
            biased;
            _ = env.cancel.cancelled() => None,
            result = tokio::time::timeout(env.settings.join_timeout(), conn.await_sfu_hello()) => Some(result),
        };
        let ids = match hello {
            None => {
                conn.close().await;
                return Ok(CallState::Ended(Ended::new(EndReason::Cancelled)));
            }
            Some(Ok(Ok(ids))) => ids,
            Some(Ok(Err(e))) => {
                conn.close().await;
                return Err(e);
            }
            Some(Err(_)) => {
                conn.close().await;
                return Err(GroupCallError::Timeout);
            }
        };

        let local_id = ParticipantId(self.join.participant_id);
        tracing::info!(
            call_id = %self.base.call_id,
            participant = %local_id,
            participants = ids.len(),
            "peer connection established"
        );
        let ctx = GroupCallContext::new(self.base, self.identity, local_id);
        Ok(CallState::Connected(Connected::new(ctx, conn, ids)))
    }
}

pub struct Connected {
    ctx: GroupCallContext,
    conn: ConnectionContext,
}

impl Connected {
    /// `participants` are the ids from the SFU hello. They are greeted once
    /// the UI confirms the connection.
    pub fn new(
        mut ctx: GroupCallContext,
        conn: ConnectionContext,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        ctx.set_initial_participants(participants);
        Self { ctx, conn }
    }

    pub fn context(&self) -> &GroupCallContext {
        &self.ctx
    }

    pub fn waker(&self) -> MessageWaker {
        self.conn.waker()
    }

    async fn next(mut self, env: &mut CallEnvironment) -> Result<CallState, GroupCallError> {
        let period = env.settings.state_update_interval();
        let mut state_updates = tokio::time::interval_at(Instant::now() + period, period);
        state_updates.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let owner = self.ctx.is_state_owner();
            let event = tokio::select! {
                biased;
                _ = env.cancel.cancelled() => CallEvent::Cancelled,
                message = self.conn.stream.next() => match message {
                    Some(message) => CallEvent::Message(message),
                    None => CallEvent::Closed,
                },
                // A dropped handle leaves the call.
                action = env.actions.recv() => CallEvent::Action(action.unwrap_or(CallAction::Leave)),
                _ = state_updates.tick(), if owner => CallEvent::StateUpdateDue,
            };

            match step(&mut self.ctx, event, env.cancel.is_cancelled()) {
                Step::Continue(effects) => {
                    if let Err(e) = self.conn.apply(effects, &env.updates).await {
                        self.conn.close().await;
                        return Err(e);
                    }
                }
                Step::Leave(reason) => return Ok(self.leave(reason).await),
            }
        }
    }

    async fn leave(mut self, reason: EndReason) -> CallState {
        tracing::info!(
            call_id = %self.ctx.call_id(),
            ?reason,
            pending = self.ctx.pending_count(),
            joined = self.ctx.joined_count(),
            "leaving call"
        );
        if self.ctx.roster_is_empty() {
            self.conn.close().await;
            return CallState::Ended(Ended::new(reason));
        }
        CallState::Ending(Ending {
            ctx: self.ctx,
            conn: self.conn,
            reason,
        })
    }
}

/// Leaving a call that still has other participants.
pub struct Ending {
    ctx: GroupCallContext,
    conn: ConnectionContext,
    reason: EndReason,
}

impl Ending {
    pub fn context(&self) -> &GroupCallContext {
        &self.ctx
    }

    pub fn reason(&self) -> EndReason {
        self.reason
    }

    async fn next(mut self) -> CallState {
        self.conn.close().await;
        let dropped = self.ctx.clear_roster();
        tracing::debug!(call_id = %self.ctx.call_id(), dropped, "call torn down");
        CallState::Ended(Ended::new(self.reason))
    }
}

pub struct Ended {
    reason: EndReason,
}

impl Ended {
    pub fn new(reason: EndReason) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> EndReason {
        self.reason
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
