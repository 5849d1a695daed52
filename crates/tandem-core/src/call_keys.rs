//! Group call identifiers and key material.
//!
//! Everything here derives from the group call key (GCK) shared in the
//! group when the call was started:
//!
//!   call id = H(creator || group id || protocol version LE || GCK || SFU URL, salt="i")
//!   GCKH    = H(key=GCK, salt="#")     frame crypto root
//!   GCHK    = H(key=GCK, salt="h")     seals participant Hello messages
//!   GCSK    = H(key=GCK, salt="s")     seals the SFU-stored call state
//!   GCNHAK  = H(key=X25519HSalsa20(PCK, remote PCK), salt="nha", input=GCKH)
//!
//! with H = BLAKE2b-256, personal `3ma-call`. Sealed payloads use
//! XChaCha20-Poly1305 with a random 24-byte nonce prepended.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::crypto::{blake2b, random_bytes, CryptoError, EphemeralKeypair, KEY_LEN, TAG_LEN};

const CALL_PERSONAL: &[u8] = b"3ma-call";

/// Group call protocol version this implementation speaks.
pub const CALL_PROTOCOL_VERSION: u32 = 1;

/// XChaCha20 nonce length.
pub const SEAL_NONCE_LEN: usize = 24;

/// Media key epochs wrap within six bits.
const EPOCH_MODULO: u8 = 64;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Identifies a group: its creator's identity and the creator-chosen id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupIdentity {
    pub creator: String,
    pub group_id: [u8; 8],
}

/// 32-byte call identifier, hex in URLs and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub [u8; 32]);

impl CallId {
    pub fn derive(
        group: &GroupIdentity,
        protocol_version: u32,
        gck: &[u8; 32],
        sfu_base_url: &str,
    ) -> Self {
        let mut input = Vec::with_capacity(group.creator.len() + 8 + 4 + 32 + sfu_base_url.len());
        input.extend_from_slice(group.creator.as_bytes());
        input.extend_from_slice(&group.group_id);
        input.extend_from_slice(&protocol_version.to_le_bytes());
        input.extend_from_slice(gck);
        input.extend_from_slice(sfu_base_url.as_bytes());
        Self(blake2b(&[], b"i", CALL_PERSONAL, &input))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ── Keys ──────────────────────────────────────────────────────────────────────

/// Keys derived once per call from the GCK.
pub struct GroupCallKeys {
    pub gckh: Zeroizing<[u8; 32]>,
    gchk: Zeroizing<[u8; 32]>,
    gcsk: Zeroizing<[u8; 32]>,
}

impl GroupCallKeys {
    pub fn derive(gck: &[u8; 32]) -> Self {
        Self {
            gckh: Zeroizing::new(blake2b(gck, b"#", CALL_PERSONAL, &[])),
            gchk: Zeroizing::new(blake2b(gck, b"h", CALL_PERSONAL, &[])),
            gcsk: Zeroizing::new(blake2b(gck, b"s", CALL_PERSONAL, &[])),
        }
    }

    /// Pairwise handshake key between two participants.
    pub fn gcnhak(&self, local: &EphemeralKeypair, remote_pck: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let shared = local.shared_key(remote_pck);
        Zeroizing::new(blake2b(&*shared, b"nha", CALL_PERSONAL, &*self.gckh))
    }

    pub fn seal_hello(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.gchk, plaintext)
    }

    pub fn open_hello(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.gchk, sealed)
    }

    pub fn seal_call_state(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.gcsk, plaintext)
    }

    pub fn open_call_state(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.gcsk, sealed)
    }
}

/// `nonce || ciphertext || tag` under `key`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce: [u8; SEAL_NONCE_LEN] = random_bytes();
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let mut out = Vec::with_capacity(SEAL_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal`].
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_NONCE_LEN + TAG_LEN {
        return Err(CryptoError::CiphertextTooShort(sealed.len()));
    }
    let (nonce, ciphertext) = sealed.split_at(SEAL_NONCE_LEN);
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// ── Base state ────────────────────────────────────────────────────────────────

/// Everything about a call that stays fixed for its lifetime.
pub struct GroupCallBaseState {
    pub group: GroupIdentity,
    pub call_id: CallId,
    pub sfu_base_url: String,
    pub protocol_version: u32,
    pub keys: GroupCallKeys,
}

impl GroupCallBaseState {
    pub fn new(
        group: GroupIdentity,
        gck: [u8; 32],
        sfu_base_url: impl Into<String>,
        protocol_version: u32,
    ) -> Self {
        let gck = Zeroizing::new(gck);
        let sfu_base_url = sfu_base_url.into();
        Self {
            call_id: CallId::derive(&group, protocol_version, &gck, &sfu_base_url),
            keys: GroupCallKeys::derive(&gck),
            group,
            sfu_base_url,
            protocol_version,
        }
    }
}

// ── Media keys ────────────────────────────────────────────────────────────────

/// A participant's current media key (PCMK) with its epoch and ratchet count.
///
/// Ratcheted forward when someone joins, so the newcomer cannot decrypt
/// media sent before it arrived. Replaced by a fresh key with the next epoch
/// when someone leaves.
pub struct MediaKeys {
    pub epoch: u8,
    pub ratchet_counter: u8,
    pcmk: Zeroizing<[u8; KEY_LEN]>,
}

impl MediaKeys {
    pub fn generate() -> Self {
        Self {
            epoch: 0,
            ratchet_counter: 0,
            pcmk: Zeroizing::new(random_bytes()),
        }
    }

    pub fn from_parts(epoch: u8, ratchet_counter: u8, pcmk: [u8; KEY_LEN]) -> Self {
        Self {
            epoch,
            ratchet_counter,
            pcmk: Zeroizing::new(pcmk),
        }
    }

    pub fn pcmk(&self) -> &[u8; KEY_LEN] {
        &self.pcmk
    }

    /// Advance the key one ratchet step.
    pub fn ratchet(&mut self) {
        self.pcmk = Zeroizing::new(blake2b(&*self.pcmk, b"#", CALL_PERSONAL, &[]));
        self.ratchet_counter = self.ratchet_counter.wrapping_add(1);
    }

    /// Replace with a fresh key in the next epoch.
    pub fn rotate(&mut self) {
        self.epoch = self.epoch.wrapping_add(1) % EPOCH_MODULO;
        self.ratchet_counter = 0;
        self.pcmk = Zeroizing::new(random_bytes());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
