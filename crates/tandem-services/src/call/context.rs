//! Call context: roster, participant handshake and media keys.
//!
//! Nothing here touches the network. Every operation returns the
//! [`Effect`]s the connection should perform, which keeps the state machine
//! testable without a peer connection or a scheduler.
//!
//! Participant handshake, relayed through the SFU:
//!
//! ```text
//!   newcomer                               existing participant
//!     │ ── Hello (GCHK) ───────────────────▶ │  await-np-hello
//!     │ ◀── Hello (GCHK) + Auth (GCNHAK) ─── │
//!     │ ── Auth (GCNHAK) ──────────────────▶ │  await-auth
//!   joined                                 joined
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use zeroize::Zeroizing;

use tandem_core::call_keys::{open, seal, CallId, GroupCallBaseState, MediaKeys};
use tandem_core::crypto::{public_key_from_slice, random_bytes, EphemeralKeypair};
use tandem_core::signaling::{
    CallParticipant, CallStateSnapshot, CameraResolution, CaptureState, DiscardParticipantCamera,
    HandshakeAuth, HandshakeHello, MediaKey, P2pContent, P2pMessage, ParticipantToSfu,
    ParticipantToSfuContent, Relay, RequestParticipantCamera, SfuToParticipant,
    SfuToParticipantContent, UpdateCallState,
};
use tandem_core::wire::{decode, encode};

use super::{CallAction, CallUpdate, GroupCallError, LocalIdentity, ParticipantId};

/// Participant call cookie length.
const PCCK_LEN: usize = 16;

/// Something the connection has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Encoded `ParticipantToSfu` envelope.
    Send(Bytes),
    SetAudioCapture(bool),
    SetVideoCapture(bool),
    SwitchCamera,
    Notify(CallUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    pub microphone_on: bool,
    pub camera_on: bool,
}

impl Default for Capture {
    fn default() -> Self {
        Self {
            microphone_on: true,
            camera_on: false,
        }
    }
}

/// Where a pending participant is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// We sent our Hello to a participant already in the call.
    AwaitExistingHello,
    /// A newly joined participant will greet us first.
    AwaitNewHello,
    AwaitAuth,
}

struct LocalParticipant {
    id: ParticipantId,
    identity: LocalIdentity,
    pck: EphemeralKeypair,
    pcck: [u8; PCCK_LEN],
    media_keys: MediaKeys,
    capture: Capture,
}

struct RemoteHello {
    identity: String,
    nickname: String,
    pck: [u8; 32],
    pcck: Vec<u8>,
    gcnhak: Zeroizing<[u8; 32]>,
}

struct PendingParticipant {
    state: HandshakeState,
    hello: Option<RemoteHello>,
}

/// A participant whose handshake completed.
pub struct JoinedParticipant {
    pub identity: String,
    pub nickname: String,
    pub media_keys: Vec<MediaKey>,
    pub capture: Capture,
    gcnhak: Zeroizing<[u8; 32]>,
}

/// All mutable state of one call. Owned by exactly one state at a time and
/// moved from state to state.
pub struct GroupCallContext {
    base: Arc<GroupCallBaseState>,
    local: LocalParticipant,
    pending: BTreeMap<ParticipantId, PendingParticipant>,
    joined: BTreeMap<ParticipantId, JoinedParticipant>,
    initial: Vec<ParticipantId>,
}

impl GroupCallContext {
    pub fn new(base: Arc<GroupCallBaseState>, identity: LocalIdentity, local_id: ParticipantId) -> Self {
        Self {
            base,
            local: LocalParticipant {
                id: local_id,
                identity,
                pck: EphemeralKeypair::generate(),
                pcck: random_bytes(),
                media_keys: MediaKeys::generate(),
                capture: Capture::default(),
            },
            pending: BTreeMap::new(),
            joined: BTreeMap::new(),
            initial: Vec::new(),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.base.call_id
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local.id
    }

    pub fn capture(&self) -> Capture {
        self.local.capture
    }

    pub fn media_epoch(&self) -> u8 {
        self.local.media_keys.epoch
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn joined_count(&self) -> usize {
        self.joined.len()
    }

    pub fn is_pending(&self, id: ParticipantId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn joined(&self, id: ParticipantId) -> Option<&JoinedParticipant> {
        self.joined.get(&id)
    }

    pub fn handshake_state(&self, id: ParticipantId) -> Option<HandshakeState> {
        self.pending.get(&id).map(|p| p.state)
    }

    /// No pending and no joined participants.
    pub fn roster_is_empty(&self) -> bool {
        self.pending.is_empty() && self.joined.is_empty()
    }

    /// Participants announced by the SFU hello. Greeted on `ConnectedConfirmed`.
    pub fn set_initial_participants(&mut self, ids: impl IntoIterator<Item = ParticipantId>) {
        let local = self.local.id;
        self.initial = ids.into_iter().filter(|id| *id != local).collect();
    }

    /// We hold the lowest id among joined participants and so keep the
    /// SFU's call state fresh.
    pub fn is_state_owner(&self) -> bool {
        self.joined
            .keys()
            .next()
            .map_or(true, |lowest| self.local.id < *lowest)
    }

    /// Forget everyone. Returns how many participants were dropped.
    pub fn clear_roster(&mut self) -> usize {
        let dropped = self.pending.len() + self.joined.len();
        self.pending.clear();
        self.joined.clear();
        self.initial.clear();
        dropped
    }

    // ── Roster ────────────────────────────────────────────────────────────────

    /// Track new participants. For `existing` ones we start the handshake.
    pub fn add_pending(
        &mut self,
        ids: impl IntoIterator<Item = ParticipantId>,
        existing: bool,
    ) -> Result<Vec<Effect>, GroupCallError> {
        let mut effects = Vec::new();
        for id in ids {
            if id == self.local.id || self.pending.contains_key(&id) || self.joined.contains_key(&id) {
                continue;
            }
            let state = if existing {
                effects.push(self.relay(id, self.hello_message()?));
                HandshakeState::AwaitExistingHello
            } else {
                HandshakeState::AwaitNewHello
            };
            self.pending.insert(id, PendingParticipant { state, hello: None });
            tracing::debug!(participant = %id, ?state, "participant pending");
        }
        Ok(effects)
    }

    /// Drop a participant. A leaver that could have our media key forces a
    /// fresh key, sent to everyone who remains.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Result<Vec<Effect>, GroupCallError> {
        let mut had_our_key = false;
        if let Some(pending) = self.pending.remove(&id) {
            had_our_key = pending.state == HandshakeState::AwaitAuth;
        }
        let was_joined = self.joined.remove(&id).is_some();
        if !(was_joined || had_our_key) {
            return Ok(Vec::new());
        }

        self.local.media_keys.rotate();
        tracing::info!(
            participant = %id,
            epoch = self.local.media_keys.epoch,
            "participant left, media key replaced"
        );

        let rekey = P2pMessage::new(P2pContent::Rekey(self.wire_media_key()));
        let mut effects = self.to_joined(&rekey)?;
        if was_joined {
            effects.push(Effect::Notify(CallUpdate::ParticipantLeft(id)));
        }
        Ok(effects)
    }

    // ── Incoming ──────────────────────────────────────────────────────────────

    /// Handle one SFU data channel message.
    pub fn handle_envelope(&mut self, data: &[u8]) -> Result<Vec<Effect>, GroupCallError> {
        let envelope: SfuToParticipant = decode(data)?;
        match envelope.content {
            None => Err(GroupCallError::BadMessage("empty SFU envelope")),
            Some(SfuToParticipantContent::Relay(relay)) => self.handle_relay(relay),
            Some(SfuToParticipantContent::Hello(_)) => {
                tracing::warn!("unexpected SFU hello while connected");
                Ok(Vec::new())
            }
            Some(SfuToParticipantContent::ParticipantJoined(joined)) => {
                // Newcomers must not decrypt media sent before they joined.
                self.local.media_keys.ratchet();
                self.add_pending([ParticipantId(joined.participant_id)], false)
            }
            Some(SfuToParticipantContent::ParticipantLeft(left)) => {
                self.remove_participant(ParticipantId(left.participant_id))
            }
        }
    }

    fn handle_relay(&mut self, relay: Relay) -> Result<Vec<Effect>, GroupCallError> {
        if relay.receiver != self.local.id.0 {
            return Err(GroupCallError::BadMessage("relay not addressed to us"));
        }
        let sender = ParticipantId(relay.sender);

        if let Some(pending) = self.pending.remove(&sender) {
            return match self.advance_handshake(sender, pending, &relay.message_and_nonce) {
                Ok(effects) => Ok(effects),
                Err((pending, e)) => {
                    self.pending.insert(sender, pending);
                    Err(e)
                }
            };
        }

        let Some(joined) = self.joined.get_mut(&sender) else {
            tracing::debug!(participant = %sender, "relay from unknown participant");
            return Ok(Vec::new());
        };
        let plaintext = open(&joined.gcnhak, &relay.message_and_nonce)?;
        let message: P2pMessage = decode(&plaintext)?;
        match message.content {
            Some(P2pContent::CaptureState(state)) => {
                joined.capture = Capture {
                    microphone_on: state.microphone_on,
                    camera_on: state.camera_on,
                };
                Ok(vec![Effect::Notify(CallUpdate::CaptureStateChanged {
                    id: sender,
                    microphone_on: state.microphone_on,
                    camera_on: state.camera_on,
                })])
            }
            Some(P2pContent::Rekey(key)) => {
                tracing::debug!(participant = %sender, epoch = key.epoch, "media key received");
                joined.media_keys.retain(|k| k.epoch != key.epoch);
                joined.media_keys.push(key);
                Ok(Vec::new())
            }
            Some(P2pContent::Hello(_)) | Some(P2pContent::Auth(_)) => {
                Err(GroupCallError::BadMessage("handshake message after handshake"))
            }
            None => Err(GroupCallError::BadMessage("empty participant message")),
        }
    }

    /// On error the pending entry is handed back untouched.
    fn advance_handshake(
        &mut self,
        sender: ParticipantId,
        mut pending: PendingParticipant,
        sealed: &[u8],
    ) -> Result<Vec<Effect>, (PendingParticipant, GroupCallError)> {
        match pending.state {
            HandshakeState::AwaitNewHello | HandshakeState::AwaitExistingHello => {
                let hello = match self.accept_hello(sealed) {
                    Ok(hello) => hello,
                    Err(e) => return Err((pending, e)),
                };
                let mut effects = Vec::new();
                if pending.state == HandshakeState::AwaitNewHello {
                    match self.hello_message() {
                        Ok(m) => effects.push(self.relay(sender, m)),
                        Err(e) => return Err((pending, e)),
                    }
                }
                match self.auth_message(&hello) {
                    Ok(m) => effects.push(self.relay(sender, m)),
                    Err(e) => return Err((pending, e)),
                }
                pending.state = HandshakeState::AwaitAuth;
                pending.hello = Some(hello);
                self.pending.insert(sender, pending);
                Ok(effects)
            }
            HandshakeState::AwaitAuth => {
                let Some(hello) = pending.hello.take() else {
                    return Err((pending, GroupCallError::BadMessage("auth before hello")));
                };
                match self.accept_auth(&hello, sealed) {
                    Ok(media_keys) => self.promote(sender, hello, media_keys).map_err(|e| {
                        (
                            PendingParticipant {
                                state: HandshakeState::AwaitAuth,
                                hello: None,
                            },
                            e,
                        )
                    }),
                    Err(e) => {
                        pending.hello = Some(hello);
                        Err((pending, e))
                    }
                }
            }
        }
    }

    fn accept_hello(&self, sealed: &[u8]) -> Result<RemoteHello, GroupCallError> {
        let plaintext = self.base.keys.open_hello(sealed)?;
        let message: P2pMessage = decode(&plaintext)?;
        let Some(P2pContent::Hello(hello)) = message.content else {
            return Err(GroupCallError::BadMessage("expected hello"));
        };
        let pck = public_key_from_slice(&hello.pck)?;
        if pck == self.local.pck.public || hello.pcck == self.local.pcck {
            return Err(GroupCallError::BadMessage("hello reflects our own keys"));
        }
        Ok(RemoteHello {
            gcnhak: self.base.keys.gcnhak(&self.local.pck, &pck),
            identity: hello.identity,
            nickname: hello.nickname,
            pck,
            pcck: hello.pcck,
        })
    }

    fn accept_auth(&self, hello: &RemoteHello, sealed: &[u8]) -> Result<Vec<MediaKey>, GroupCallError> {
        let plaintext = open(&hello.gcnhak, sealed)?;
        let message: P2pMessage = decode(&plaintext)?;
        let Some(P2pContent::Auth(auth)) = message.content else {
            return Err(GroupCallError::BadMessage("expected auth"));
        };
        if auth.pck != self.local.pck.public || auth.pcck != self.local.pcck {
            return Err(GroupCallError::BadMessage("auth does not echo our keys"));
        }
        Ok(auth.media_keys)
    }

    fn promote(
        &mut self,
        id: ParticipantId,
        hello: RemoteHello,
        media_keys: Vec<MediaKey>,
    ) -> Result<Vec<Effect>, GroupCallError> {
        tracing::info!(participant = %id, identity = %hello.identity, "participant handshake completed");
        let update = CallUpdate::ParticipantJoined {
            id,
            identity: hello.identity.clone(),
            nickname: hello.nickname.clone(),
        };
        let capture = self.capture_message(&hello.gcnhak)?;
        self.joined.insert(
            id,
            JoinedParticipant {
                identity: hello.identity,
                nickname: hello.nickname,
                media_keys,
                capture: Capture::default(),
                gcnhak: hello.gcnhak,
            },
        );
        Ok(vec![self.relay(id, capture), Effect::Notify(update)])
    }

    // ── UI actions ────────────────────────────────────────────────────────────

    /// Everything except [`CallAction::Leave`], which ends the call and is
    /// handled by the state machine.
    pub fn handle_action(&mut self, action: CallAction) -> Result<Vec<Effect>, GroupCallError> {
        match action {
            CallAction::Leave => Ok(Vec::new()),
            CallAction::ConnectedConfirmed => {
                let capture = self.local.capture;
                let mut effects = vec![
                    Effect::SetAudioCapture(capture.microphone_on),
                    Effect::SetVideoCapture(capture.camera_on),
                ];
                let initial = std::mem::take(&mut self.initial);
                tracing::debug!(participants = initial.len(), "greeting existing participants");
                effects.extend(self.add_pending(initial, true)?);
                Ok(effects)
            }
            CallAction::MuteAudio | CallAction::UnmuteAudio => {
                let on = action == CallAction::UnmuteAudio;
                self.local.capture.microphone_on = on;
                let mut effects = vec![Effect::SetAudioCapture(on)];
                effects.extend(self.broadcast_capture()?);
                effects.push(Effect::Notify(CallUpdate::AudioMuted(!on)));
                Ok(effects)
            }
            CallAction::MuteVideo | CallAction::UnmuteVideo => {
                let on = action == CallAction::UnmuteVideo;
                self.local.capture.camera_on = on;
                let mut effects = vec![Effect::SetVideoCapture(on)];
                effects.extend(self.broadcast_capture()?);
                effects.push(Effect::Notify(CallUpdate::VideoMuted(!on)));
                Ok(effects)
            }
            CallAction::SwitchCamera => Ok(vec![
                Effect::SwitchCamera,
                Effect::Notify(CallUpdate::CameraSwitched),
            ]),
            CallAction::SubscribeVideo(id) => {
                if !self.joined.contains_key(&id) {
                    tracing::warn!(participant = %id, "cannot subscribe video of unknown participant");
                    return Ok(Vec::new());
                }
                let request = ParticipantToSfuContent::RequestParticipantCamera(RequestParticipantCamera {
                    participant_id: id.0,
                    resolution: CameraResolution::High as i32,
                });
                Ok(vec![Effect::Send(encode(&ParticipantToSfu::new(request)))])
            }
            CallAction::UnsubscribeVideo(id) => {
                if !self.joined.contains_key(&id) {
                    tracing::warn!(participant = %id, "cannot unsubscribe video of unknown participant");
                    return Ok(Vec::new());
                }
                let discard = ParticipantToSfuContent::DiscardParticipantCamera(DiscardParticipantCamera {
                    participant_id: id.0,
                });
                Ok(vec![Effect::Send(encode(&ParticipantToSfu::new(discard)))])
            }
        }
    }

    // ── Call state ────────────────────────────────────────────────────────────

    /// Sealed roster for the SFU, if we are the state owner.
    pub fn call_state_update(&self) -> Result<Option<Effect>, GroupCallError> {
        if !self.is_state_owner() {
            return Ok(None);
        }
        let mut participants = vec![CallParticipant {
            participant_id: self.local.id.0,
            identity: self.local.identity.identity.clone(),
            nickname: self.local.identity.nickname.clone(),
        }];
        participants.extend(self.joined.iter().map(|(id, p)| CallParticipant {
            participant_id: id.0,
            identity: p.identity.clone(),
            nickname: p.nickname.clone(),
        }));
        let snapshot = CallStateSnapshot {
            state_created_by: self.local.id.0,
            state_created_at: now_millis(),
            participants,
        };
        let sealed = self.base.keys.seal_call_state(&encode(&snapshot))?;
        let update = ParticipantToSfuContent::UpdateCallState(UpdateCallState {
            encrypted_call_state: sealed,
        });
        Ok(Some(Effect::Send(encode(&ParticipantToSfu::new(update)))))
    }

    // ── Outgoing ──────────────────────────────────────────────────────────────

    fn relay(&self, to: ParticipantId, sealed: Vec<u8>) -> Effect {
        let relay = Relay {
            sender: self.local.id.0,
            receiver: to.0,
            message_and_nonce: sealed,
        };
        Effect::Send(encode(&ParticipantToSfu::new(ParticipantToSfuContent::Relay(relay))))
    }

    fn hello_message(&self) -> Result<Vec<u8>, GroupCallError> {
        let hello = P2pMessage::new(P2pContent::Hello(HandshakeHello {
            identity: self.local.identity.identity.clone(),
            nickname: self.local.identity.nickname.clone(),
            pck: self.local.pck.public.to_vec(),
            pcck: self.local.pcck.to_vec(),
        }));
        Ok(self.base.keys.seal_hello(&encode(&hello))?)
    }

    fn auth_message(&self, remote: &RemoteHello) -> Result<Vec<u8>, GroupCallError> {
        let auth = P2pMessage::new(P2pContent::Auth(HandshakeAuth {
            pck: remote.pck.to_vec(),
            pcck: remote.pcck.clone(),
            media_keys: vec![self.wire_media_key()],
        }));
        Ok(seal(&remote.gcnhak, &encode(&auth))?)
    }

    fn capture_message(&self, gcnhak: &[u8; 32]) -> Result<Vec<u8>, GroupCallError> {
        let state = P2pMessage::new(P2pContent::CaptureState(CaptureState {
            microphone_on: self.local.capture.microphone_on,
            camera_on: self.local.capture.camera_on,
        }));
        Ok(seal(gcnhak, &encode(&state))?)
    }

    fn broadcast_capture(&self) -> Result<Vec<Effect>, GroupCallError> {
        self.joined
            .iter()
            .map(|(id, p)| Ok(self.relay(*id, self.capture_message(&p.gcnhak)?)))
            .collect()
    }

    fn to_joined(&self, message: &P2pMessage) -> Result<Vec<Effect>, GroupCallError> {
        let plaintext = encode(message);
        self.joined
            .iter()
            .map(|(id, p)| Ok(self.relay(*id, seal(&p.gcnhak, &plaintext)?)))
            .collect()
    }

    fn wire_media_key(&self) -> MediaKey {
        let keys = &self.local.media_keys;
        MediaKey {
            epoch: keys.epoch.into(),
            ratchet_counter: keys.ratchet_counter.into(),
            pcmk: keys.pcmk().to_vec(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tandem_core::call_keys::GroupIdentity;
    use tandem_core::signaling::ParticipantJoined;

    pub(crate) fn base_state() -> Arc<GroupCallBaseState> {
        Arc::new(GroupCallBaseState::new(
            GroupIdentity {
                creator: "ECHOECHO".into(),
                group_id: [1; 8],
            },
            [0x33; 32],
            "https://sfu.example",
            1,
        ))
    }

    fn context(id: u32, base: &Arc<GroupCallBaseState>) -> GroupCallContext {
        GroupCallContext::new(
            base.clone(),
            LocalIdentity {
                identity: format!("ID{id:06}"),
                nickname: format!("user {id}"),
            },
            ParticipantId(id),
        )
    }

    /// Turn outgoing relays into what the SFU would deliver.
    fn deliver(effects: &[Effect]) -> Vec<Bytes> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(bytes) => {
                    let out: ParticipantToSfu = decode(bytes).unwrap();
                    match out.content {
                        Some(ParticipantToSfuContent::Relay(relay)) => Some(encode(
                            &SfuToParticipant::new(SfuToParticipantContent::Relay(relay)),
                        )),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect()
    }

    fn joined_envelope(id: u32) -> Bytes {
        encode(&SfuToParticipant::new(SfuToParticipantContent::ParticipantJoined(
            ParticipantJoined { participant_id: id },
        )))
    }

    /// `a` is in the call, `b` joins it.
    fn handshake(a: &mut GroupCallContext, b: &mut GroupCallContext) {
        a.handle_envelope(&joined_envelope(b.local_id().0)).unwrap();
        assert_eq!(a.handshake_state(b.local_id()), Some(HandshakeState::AwaitNewHello));

        b.set_initial_participants([a.local_id(), b.local_id()]);
        let b_hello = deliver(&b.handle_action(CallAction::ConnectedConfirmed).unwrap());
        assert_eq!(b_hello.len(), 1);

        let a_hello_auth = deliver(&a.handle_envelope(&b_hello[0]).unwrap());
        assert_eq!(a_hello_auth.len(), 2);

        let b_auth = deliver(&b.handle_envelope(&a_hello_auth[0]).unwrap());
        assert_eq!(b_auth.len(), 1);
        let b_done = b.handle_envelope(&a_hello_auth[1]).unwrap();
        assert!(b_done.iter().any(|e| matches!(e, Effect::Notify(CallUpdate::ParticipantJoined { .. }))));

        a.handle_envelope(&b_auth[0]).unwrap();
    }

    #[test]
    fn handshake_promotes_both_sides() {
        let base = base_state();
        let mut a = context(1, &base);
        let mut b = context(2, &base);
        handshake(&mut a, &mut b);

        assert_eq!((a.pending_count(), a.joined_count()), (0, 1));
        assert_eq!((b.pending_count(), b.joined_count()), (0, 1));
        assert_eq!(a.joined(ParticipantId(2)).unwrap().identity, "ID000002");
        assert_eq!(b.joined(ParticipantId(1)).unwrap().media_keys.len(), 1);
    }

    #[test]
    fn state_owner_is_lowest_id() {
        let base = base_state();
        let mut a = context(1, &base);
        let mut b = context(2, &base);
        assert!(b.is_state_owner(), "alone in the call");
        handshake(&mut a, &mut b);
        assert!(a.is_state_owner());
        assert!(!b.is_state_owner());
        assert!(b.call_state_update().unwrap().is_none());

        let Some(Effect::Send(bytes)) = a.call_state_update().unwrap() else {
            panic!("expected an update");
        };
        let out: ParticipantToSfu = decode(&bytes).unwrap();
        let Some(ParticipantToSfuContent::UpdateCallState(update)) = out.content else {
            panic!("expected UpdateCallState");
        };
        let snapshot: CallStateSnapshot =
            decode(&base.keys.open_call_state(&update.encrypted_call_state).unwrap()).unwrap();
        assert_eq!(snapshot.participants.len(), 2);
        assert_eq!(snapshot.state_created_by, 1);
    }

    #[test]
    fn relay_for_someone_else_is_rejected() {
        let base = base_state();
        let mut a = context(1, &base);
        let envelope = encode(&SfuToParticipant::new(SfuToParticipantContent::Relay(Relay {
            sender: 2,
            receiver: 3,
            message_and_nonce: vec![0; 64],
        })));
        assert!(matches!(
            a.handle_envelope(&envelope),
            Err(GroupCallError::BadMessage(_))
        ));
    }

    #[test]
    fn garbled_hello_keeps_participant_pending() {
        let base = base_state();
        let mut a = context(1, &base);
        a.handle_envelope(&joined_envelope(2)).unwrap();
        let envelope = encode(&SfuToParticipant::new(SfuToParticipantContent::Relay(Relay {
            sender: 2,
            receiver: 1,
            message_and_nonce: vec![0; 64],
        })));
        assert!(a.handle_envelope(&envelope).is_err());
        assert_eq!(a.handshake_state(ParticipantId(2)), Some(HandshakeState::AwaitNewHello));
    }

    #[test]
    fn leave_of_joined_participant_rotates_media_key() {
        let base = base_state();
        let mut a = context(1, &base);
        let mut b = context(2, &base);
        let mut c = context(3, &base);
        handshake(&mut a, &mut b);
        handshake(&mut a, &mut c);
        assert_eq!(a.joined_count(), 2);

        let epoch = a.media_epoch();
        let left = encode(&SfuToParticipant::new(SfuToParticipantContent::ParticipantLeft(
            tandem_core::signaling::ParticipantLeft { participant_id: 2 },
        )));
        let effects = a.handle_envelope(&left).unwrap();
        assert_eq!(a.media_epoch(), epoch + 1);
        assert_eq!(deliver(&effects).len(), 1, "rekey goes to the remaining participant");
        assert!(effects.contains(&Effect::Notify(CallUpdate::ParticipantLeft(ParticipantId(2)))));

        let rekey = deliver(&effects);
        c.handle_envelope(&rekey[0]).unwrap();
        assert!(c
            .joined(ParticipantId(1))
            .unwrap()
            .media_keys
            .iter()
            .any(|k| k.epoch == u32::from(epoch + 1)));
    }

    #[test]
    fn leave_of_unknown_participant_is_quiet() {
        let base = base_state();
        let mut a = context(1, &base);
        assert!(a.remove_participant(ParticipantId(9)).unwrap().is_empty());
    }

    #[test]
    fn mute_audio_reaches_joined_participants() {
        let base = base_state();
        let mut a = context(1, &base);
        let mut b = context(2, &base);
        handshake(&mut a, &mut b);

        let effects = a.handle_action(CallAction::MuteAudio).unwrap();
        assert_eq!(effects[0], Effect::SetAudioCapture(false));
        assert!(effects.contains(&Effect::Notify(CallUpdate::AudioMuted(true))));

        let relays = deliver(&effects);
        assert_eq!(relays.len(), 1);
        let updates = b.handle_envelope(&relays[0]).unwrap();
        assert_eq!(
            updates,
            vec![Effect::Notify(CallUpdate::CaptureStateChanged {
                id: ParticipantId(1),
                microphone_on: false,
                camera_on: false,
            })]
        );
    }

    #[test]
    fn subscribe_requires_joined_participant() {
        let base = base_state();
        let mut a = context(1, &base);
        let mut b = context(2, &base);
        assert!(a.handle_action(CallAction::SubscribeVideo(ParticipantId(2))).unwrap().is_empty());
        handshake(&mut a, &mut b);
        let effects = a.handle_action(CallAction::SubscribeVideo(ParticipantId(2))).unwrap();
        assert_eq!(effects.len(), 1);
    }
}
