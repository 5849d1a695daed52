use crate::*;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use tandem_core::call_keys::{GroupCallBaseState, GroupIdentity, CALL_PROTOCOL_VERSION};
use tandem_core::config::CallsConfig;
use tandem_core::signaling::{
    JoinResponse, ParticipantJoined, ParticipantLeft, ParticipantToSfu, ParticipantToSfuContent,
    PeekResponse, SfuHello, SfuToParticipant, SfuToParticipantContent,
};
use tandem_core::wire::{decode, encode};
use tandem_services::call::http::{HttpClient, HttpError, HttpResponse};
use tandem_services::call::peer::{
    message_channel, MessageSender, MessageStream, PeerConnection, PeerConnectionMessage,
    PeerConnector,
};
use tandem_services::call::sfu::{peek_call, PeekResult};
use tandem_services::call::state::{CallStateKind, EndReason};
use tandem_services::{
    CallAction, CallUpdate, GroupCallActor, GroupCallError, GroupCallHandle, LocalIdentity,
    ParticipantId,
};

// ── Scripted SFU ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct SfuState {
    running: bool,
    next_id: u32,
    participants: BTreeMap<u32, MessageSender>,
    call_state: Option<Vec<u8>>,
    relayed: usize,
    // Streams of participants that never answer.
    ghosts: Vec<MessageStream>,
}

/// Answers join and peek, forwards relays and announces joins and leaves.
#[derive(Clone, Default)]
struct FakeSfu(Arc<Mutex<SfuState>>);

impl FakeSfu {
    fn running() -> Self {
        let sfu = Self::default();
        sfu.0.lock().unwrap().running = true;
        sfu
    }

    fn add_ghosts(&self, n: u32) {
        let mut state = self.0.lock().unwrap();
        for _ in 0..n {
            state.next_id += 1;
            let (tx, stream) = message_channel();
            let id = state.next_id;
            state.participants.insert(id, tx);
            state.ghosts.push(stream);
        }
    }

    fn relayed(&self) -> usize {
        self.0.lock().unwrap().relayed
    }

    fn deliver(tx: &MessageSender, content: SfuToParticipantContent) {
        tx.send(PeerConnectionMessage::new(encode(&SfuToParticipant::new(content))));
    }
}

#[async_trait]
impl HttpClient for FakeSfu {
    async fn post(&self, url: &str, _body: Bytes) -> Result<HttpResponse, HttpError> {
        let mut state = self.0.lock().unwrap();
        if !state.running {
            return Ok(HttpResponse {
                status: 404,
                body: Bytes::new(),
            });
        }
        let body = if url.ends_with("/v1/join") {
            state.next_id += 1;
            encode(&JoinResponse {
                started_at: 1_700_000_000_000,
                participant_id: state.next_id,
                ..Default::default()
            })
        } else {
            encode(&PeekResponse {
                started_at: 1_700_000_000_000,
                max_participants: 100,
                encrypted_call_state: state.call_state.clone(),
            })
        };
        Ok(HttpResponse { status: 200, body })
    }
}

#[async_trait]
impl PeerConnector for FakeSfu {
    async fn connect(
        &self,
        join: &JoinResponse,
    ) -> Result<(Box<dyn PeerConnection>, MessageStream), GroupCallError> {
        let id = join.participant_id;
        let (tx, stream) = message_channel();
        let mut state = self.0.lock().unwrap();
        for other in state.participants.values() {
            Self::deliver(
                other,
                SfuToParticipantContent::ParticipantJoined(ParticipantJoined { participant_id: id }),
            );
        }
        let mut ids: Vec<u32> = state.participants.keys().copied().collect();
        ids.push(id);
        Self::deliver(&tx, SfuToParticipantContent::Hello(SfuHello { participant_ids: ids }));
        state.participants.insert(id, tx);

        let peer = SfuPeer {
            id,
            sfu: self.clone(),
        };
        Ok((Box::new(peer), stream))
    }
}

struct SfuPeer {
    id: u32,
    sfu: FakeSfu,
}

#[async_trait]
impl PeerConnection for SfuPeer {
    async fn send(&mut self, envelope: Bytes) -> Result<(), GroupCallError> {
        let message: ParticipantToSfu = decode(&envelope)?;
        let mut state = self.sfu.0.lock().unwrap();
        match message.content {
            Some(ParticipantToSfuContent::Relay(relay)) => {
                assert_eq!(relay.sender, self.id, "relay sender must be the connection owner");
                state.relayed += 1;
                if let Some(tx) = state.participants.get(&relay.receiver) {
                    FakeSfu::deliver(tx, SfuToParticipantContent::Relay(relay));
                }
            }
            Some(ParticipantToSfuContent::UpdateCallState(update)) => {
                state.call_state = Some(update.encrypted_call_state);
            }
            _ => {}
        }
        Ok(())
    }

    async fn set_audio_capture(&mut self, _enabled: bool) -> Result<(), GroupCallError> {
        Ok(())
    }

    async fn set_video_capture(&mut self, _enabled: bool) -> Result<(), GroupCallError> {
        Ok(())
    }

    async fn switch_camera(&mut self) -> Result<(), GroupCallError> {
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.sfu.0.lock().unwrap();
        state.participants.remove(&self.id);
        for other in state.participants.values() {
            FakeSfu::deliver(
                other,
                SfuToParticipantContent::ParticipantLeft(ParticipantLeft {
                    participant_id: self.id,
                }),
            );
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn base() -> Arc<GroupCallBaseState> {
    Arc::new(GroupCallBaseState::new(
        GroupIdentity {
            creator: "GROUPCRE".into(),
            group_id: [7; 8],
        },
        [0x42; 32],
        "https://sfu.test",
        CALL_PROTOCOL_VERSION,
    ))
}

fn start(sfu: &FakeSfu, name: &str) -> GroupCallHandle {
    let settings = CallsConfig {
        state_update_interval_secs: 1,
        ..CallsConfig::default()
    };
    GroupCallActor::spawn(
        base(),
        LocalIdentity {
            identity: name.to_uppercase(),
            nickname: name.to_string(),
        },
        Arc::new(sfu.clone()),
        Arc::new(sfu.clone()),
        settings,
    )
}

async fn wait_update(
    updates: &mut broadcast::Receiver<CallUpdate>,
    pred: impl Fn(&CallUpdate) -> bool,
) -> CallUpdate {
    within("call update", async {
        loop {
            match updates.recv().await {
                Ok(update) if pred(&update) => return update,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("update channel failed: {e}"),
            }
        }
    })
    .await
}

async fn wait_state(updates: &mut broadcast::Receiver<CallUpdate>, kind: CallStateKind) {
    wait_update(updates, |u| *u == CallUpdate::StateChanged(kind)).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Two participants join, complete the handshake through the SFU and see
/// each other; the lower id keeps the call state fresh; a leave reaches the
/// one who stays.
#[tokio::test]
async fn test_two_participants_meet_and_part() {
    let sfu = FakeSfu::running();

    let alice = start(&sfu, "alice");
    let mut alice_updates = alice.subscribe();
    wait_state(&mut alice_updates, CallStateKind::Connected).await;
    alice.send(CallAction::ConnectedConfirmed).await.unwrap();

    let bob = start(&sfu, "bob");
    let mut bob_updates = bob.subscribe();
    bob.send(CallAction::ConnectedConfirmed).await.unwrap();

    let seen_by_bob = wait_update(&mut bob_updates, |u| matches!(u, CallUpdate::ParticipantJoined { .. })).await;
    assert_eq!(
        seen_by_bob,
        CallUpdate::ParticipantJoined {
            id: ParticipantId(1),
            identity: "ALICE".into(),
            nickname: "alice".into(),
        }
    );
    let seen_by_alice =
        wait_update(&mut alice_updates, |u| matches!(u, CallUpdate::ParticipantJoined { .. })).await;
    assert!(matches!(
        seen_by_alice,
        CallUpdate::ParticipantJoined { id: ParticipantId(2), .. }
    ));

    // Alice (id 1) owns the call state; wait until it lists both of us.
    let base = base();
    within("call state with two participants", async {
        loop {
            let peek = peek_call(&sfu, &base, TEST_TIMEOUT).await.unwrap();
            if matches!(peek, PeekResult::Running { participants: Some(2), .. }) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    })
    .await;

    bob.leave().await.unwrap();
    let left = wait_update(&mut alice_updates, |u| matches!(u, CallUpdate::ParticipantLeft(_))).await;
    assert_eq!(left, CallUpdate::ParticipantLeft(ParticipantId(2)));
    assert_eq!(within("bob", bob.join()).await, EndReason::Left);

    alice.cancel();
    assert_eq!(within("alice", alice.join()).await, EndReason::Cancelled);
}

/// Joining a call the SFU does not know ends cleanly.
#[tokio::test]
async fn test_join_unknown_call_ends() {
    let sfu = FakeSfu::default();
    let handle = start(&sfu, "carol");
    assert_eq!(within("carol", handle.join()).await, EndReason::NotFound);

    let peek = peek_call(&sfu, &base(), TEST_TIMEOUT).await.unwrap();
    assert_eq!(peek, PeekResult::NotRunning);
}

/// A participant waiting on ten unanswered handshakes is cancelled: the
/// call must go through Ending and finish.
#[tokio::test]
async fn test_cancel_with_pending_handshakes() {
    let sfu = FakeSfu::running();
    sfu.add_ghosts(10);

    let dave = start(&sfu, "dave");
    let mut updates = dave.subscribe();
    wait_state(&mut updates, CallStateKind::Connected).await;
    dave.send(CallAction::ConnectedConfirmed).await.unwrap();

    within("hellos to every ghost", async {
        while sfu.relayed() < 10 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;

    dave.cancel();
    wait_state(&mut updates, CallStateKind::Ending).await;
    wait_state(&mut updates, CallStateKind::Ended).await;
    assert_eq!(within("dave", dave.join()).await, EndReason::Cancelled);
}
