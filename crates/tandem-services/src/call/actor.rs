//! One task per call. The task owns the [`CallState`] and is the only place
//! call state changes; everyone else holds a [`GroupCallHandle`].

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tandem_core::call_keys::{CallId, GroupCallBaseState};
use tandem_core::config::CallsConfig;

use super::http::HttpClient;
use super::peer::{MessageWaker, PeerConnector};
use super::state::{CallEnvironment, CallState, CallStateKind, EndReason, Ended};
use super::{CallAction, CallUpdate, GroupCallError, LocalIdentity};

const ACTION_QUEUE: usize = 32;
const UPDATE_QUEUE: usize = 256;

/// Slot for the sentinel waker of the current peer connection.
type WakerSlot = Arc<Mutex<Option<MessageWaker>>>;

pub struct GroupCallActor {
    call_id: CallId,
    env: CallEnvironment,
    kind: watch::Sender<CallStateKind>,
    waker: WakerSlot,
}

impl GroupCallActor {
    /// Start a call and return the handle to it.
    pub fn spawn(
        base: Arc<GroupCallBaseState>,
        identity: LocalIdentity,
        http: Arc<dyn HttpClient>,
        connector: Arc<dyn PeerConnector>,
        settings: CallsConfig,
    ) -> GroupCallHandle {
        let call_id = base.call_id;
        let (actions_tx, actions_rx) = mpsc::channel(ACTION_QUEUE);
        let (updates, _) = broadcast::channel(UPDATE_QUEUE);
        let (kind_tx, kind_rx) = watch::channel(CallStateKind::Joining);
        let cancel = CancellationToken::new();
        let waker = WakerSlot::default();

        let actor = GroupCallActor {
            call_id,
            env: CallEnvironment {
                http,
                connector,
                actions: actions_rx,
                cancel: cancel.clone(),
                updates: updates.clone(),
                settings,
            },
            kind: kind_tx,
            waker: waker.clone(),
        };
        let task = tokio::spawn(actor.run(CallState::joining(base, identity)));

        GroupCallHandle {
            call_id,
            actions: actions_tx,
            state: kind_rx,
            updates,
            cancel,
            waker,
            task,
        }
    }

    async fn run(mut self, mut state: CallState) -> EndReason {
        loop {
            if let CallState::Ended(ended) = &state {
                tracing::info!(call_id = %self.call_id, reason = ?ended.reason(), "call ended");
                return ended.reason();
            }
            let from = state.kind();
            state = match state.next(&mut self.env).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(call_id = %self.call_id, state = %from, error = %e, "call failed");
                    CallState::Ended(Ended::new(EndReason::Failed))
                }
            };
            self.publish(&state);
        }
    }

    fn publish(&self, state: &CallState) {
        let kind = state.kind();
        tracing::debug!(call_id = %self.call_id, state = %kind, "call state changed");

        if let Ok(mut slot) = self.waker.lock() {
            *slot = match state {
                CallState::Connected(connected) => Some(connected.waker()),
                _ => None,
            };
        }
        self.kind.send_replace(kind);
        let _ = self.env.updates.send(CallUpdate::StateChanged(kind));
    }
}

/// Caller side of a running call. Dropping it leaves the call.
pub struct GroupCallHandle {
    call_id: CallId,
    actions: mpsc::Sender<CallAction>,
    state: watch::Receiver<CallStateKind>,
    updates: broadcast::Sender<CallUpdate>,
    cancel: CancellationToken,
    waker: WakerSlot,
    task: JoinHandle<EndReason>,
}

impl GroupCallHandle {
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn state(&self) -> CallStateKind {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallUpdate> {
        self.updates.subscribe()
    }

    pub async fn send(&self, action: CallAction) -> Result<(), GroupCallError> {
        self.actions
            .send(action)
            .await
            .map_err(|_| GroupCallError::CallEnded)
    }

    pub async fn leave(&self) -> Result<(), GroupCallError> {
        self.send(CallAction::Leave).await
    }

    /// Cancel the call. A receive parked on the signaling stream is woken
    /// with the sentinel.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let waker = self.waker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Resolves once the call reached `Ended`.
    pub async fn ended(&self) {
        let mut state = self.state.clone();
        // Err means the task is gone, which is just as final.
        let _ = state.wait_for(|kind| *kind == CallStateKind::Ended).await;
    }

    /// Wait for the task and report why the call ended.
    pub async fn join(self) -> EndReason {
        self.task.await.unwrap_or(EndReason::Failed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
