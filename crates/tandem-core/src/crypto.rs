//! Cryptographic primitives for Tandem.
//!
//! Provides three things:
//!   1. BLAKE2b key derivation with salt and personalisation
//!   2. Ephemeral X25519 keypairs and the NaCl-compatible shared key
//!   3. Rendezvous session crypto: directional ChaCha20-Poly1305 with
//!      counter nonces and a one-way switch to transport keys
//!
//! All key material derives ZeroizeOnDrop or sits in `Zeroizing` and is
//! wiped from memory when dropped. There is no unsafe code in this module.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use salsa20::cipher::consts::U10;
use salsa20::cipher::generic_array::GenericArray;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of every symmetric key and hash in this module.
pub const KEY_LEN: usize = 32;

/// Length of the Poly1305 tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Length of the rendezvous handshake challenge.
pub const CHALLENGE_LEN: usize = 16;

// ── BLAKE2b ───────────────────────────────────────────────────────────────────

/// BLAKE2b-256 with key, salt and personal.
///
/// Salt and personal are zero-padded to 16 bytes. An empty key means an
/// unkeyed hash.
pub fn blake2b(key: &[u8], salt: &[u8], personal: &[u8], input: &[u8]) -> [u8; KEY_LEN] {
    let hash = blake2b_simd::Params::new()
        .hash_length(KEY_LEN)
        .key(key)
        .salt(salt)
        .personal(personal)
        .hash(input);
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// Fill a fresh buffer with random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// An ephemeral X25519 keypair.
///
/// Used for the rendezvous transport key exchange (ETK) and for group call
/// participant keys (PCK). Never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EphemeralKeypair {
    private: Zeroizing<[u8; 32]>,
    pub public: [u8; 32],
}

impl EphemeralKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Rebuild a keypair from private key bytes. The public key is derived.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    /// NaCl `crypto_box_beforenm`: HSalsa20 over the X25519 shared point.
    pub fn shared_key(&self, remote_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let secret = StaticSecret::from(*self.private);
        let shared = secret.diffie_hellman(&PublicKey::from(*remote_public));
        let key = salsa20::hsalsa::<U10>(
            GenericArray::from_slice(shared.as_bytes()),
            &GenericArray::default(),
        );
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(&key);
        out
    }
}

/// Interpret a byte slice as a 32-byte public key.
pub fn public_key_from_slice(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))
}

// ── Rendezvous ────────────────────────────────────────────────────────────────

const RENDEZVOUS_PERSONAL: &[u8] = b"3ma-rendezvous";

/// Which end of the rendezvous this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Rendezvous initiator device (RID): published the offer.
    Initiator,
    /// Rendezvous responder device (RRD): consumed the offer.
    Responder,
}

/// Path hash returned by the transport key switch. Both peers derive the
/// same value; compare it out of band to detect a man in the middle.
pub type PathHash = [u8; 32];

/// Session crypto for one rendezvous path.
///
/// `Send` so a connection can own it across await points.
pub trait RendezvousCrypto: Send {
    /// Encrypt with the current send key and sequence number.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt with the current receive key and sequence number.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Replace the authentication keys with transport keys. Once only.
    fn switch_to_transport_keys(
        &mut self,
        local: &EphemeralKeypair,
        remote_public: &[u8],
    ) -> Result<PathHash, CryptoError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Authentication,
    Transport,
}

/// The standard rendezvous crypto.
///
/// Key schedule (BLAKE2b-256, personal `3ma-rendezvous`):
///
///   RIDAK = H(key=AK, salt="rida")         RRDAK = H(key=AK, salt="rrda")
///   STK   = H(key=AK || X25519HSalsa20(ETK), salt="st")
///   RIDTK = H(key=STK, salt="ridt")        RRDTK = H(key=STK, salt="rrdt")
///   RPH   = H(STK, salt="ph")
///
/// The initiator sends with RID* and receives with RRD*; the responder the
/// other way round. Nonces are `path_id LE || seq LE || 0u32`, with a
/// sequence number per direction starting at 1.
pub struct DefaultRendezvousCrypto {
    role: Role,
    ak: Zeroizing<[u8; 32]>,
    path_id: u32,
    send_key: Zeroizing<[u8; 32]>,
    receive_key: Zeroizing<[u8; 32]>,
    send_seq: u32,
    receive_seq: u32,
    phase: Phase,
}

const INITIAL_SEQUENCE: u32 = 1;

impl DefaultRendezvousCrypto {
    pub fn new(role: Role, authentication_key: [u8; 32], path_id: u32) -> Self {
        let ak = Zeroizing::new(authentication_key);
        let ridak = Zeroizing::new(blake2b(&*ak, b"rida", RENDEZVOUS_PERSONAL, &[]));
        let rrdak = Zeroizing::new(blake2b(&*ak, b"rrda", RENDEZVOUS_PERSONAL, &[]));
        let (send_key, receive_key) = match role {
            Role::Initiator => (ridak, rrdak),
            Role::Responder => (rrdak, ridak),
        };
        Self {
            role,
            ak,
            path_id,
            send_key,
            receive_key,
            send_seq: INITIAL_SEQUENCE,
            receive_seq: INITIAL_SEQUENCE,
            phase: Phase::Authentication,
        }
    }

    /// Build from an authentication key slice, checking its length.
    pub fn from_slice(role: Role, authentication_key: &[u8], path_id: u32) -> Result<Self, CryptoError> {
        let ak = public_key_from_slice(authentication_key)?;
        Ok(Self::new(role, ak, path_id))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn path_id(&self) -> u32 {
        self.path_id
    }

    pub fn is_transport(&self) -> bool {
        self.phase == Phase::Transport
    }

    fn nonce(&self, seq: u32) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.path_id.to_le_bytes());
        nonce[4..8].copy_from_slice(&seq.to_le_bytes());
        nonce
    }
}

impl RendezvousCrypto for DefaultRendezvousCrypto {
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let next = self
            .send_seq
            .checked_add(1)
            .ok_or(CryptoError::SequenceExhausted)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*self.send_key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&self.nonce(self.send_seq)), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        self.send_seq = next;
        Ok(ciphertext)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::CiphertextTooShort(ciphertext.len()));
        }
        let next = self
            .receive_seq
            .checked_add(1)
            .ok_or(CryptoError::SequenceExhausted)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*self.receive_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.nonce(self.receive_seq)), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        self.receive_seq = next;
        Ok(plaintext)
    }

    fn switch_to_transport_keys(
        &mut self,
        local: &EphemeralKeypair,
        remote_public: &[u8],
    ) -> Result<PathHash, CryptoError> {
        if self.phase == Phase::Transport {
            return Err(CryptoError::TransportKeysAlreadyUsed);
        }
        let remote_public = public_key_from_slice(remote_public)?;
        let shared = local.shared_key(&remote_public);

        let mut stk_key = Zeroizing::new([0u8; 64]);
        stk_key[..32].copy_from_slice(&*self.ak);
        stk_key[32..].copy_from_slice(&*shared);
        let stk = Zeroizing::new(blake2b(&*stk_key, b"st", RENDEZVOUS_PERSONAL, &[]));

        let ridtk = Zeroizing::new(blake2b(&*stk, b"ridt", RENDEZVOUS_PERSONAL, &[]));
        let rrdtk = Zeroizing::new(blake2b(&*stk, b"rrdt", RENDEZVOUS_PERSONAL, &[]));
        let path_hash = blake2b(&[], b"ph", RENDEZVOUS_PERSONAL, &*stk);

        let (send_key, receive_key) = match self.role {
            Role::Initiator => (ridtk, rrdtk),
            Role::Responder => (rrdtk, ridtk),
        };
        self.send_key = send_key;
        self.receive_key = receive_key;
        self.send_seq = INITIAL_SEQUENCE;
        self.receive_seq = INITIAL_SEQUENCE;
        self.phase = Phase::Transport;

        tracing::debug!(
            path_id = self.path_id,
            path_hash = hex::encode(path_hash),
            "switched to transport keys"
        );
        Ok(path_hash)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("expected a 32-byte key, got {0} bytes")]
    InvalidKeyLength(usize),
    #[error("ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed (wrong key, sequence or tampered data)")]
    DecryptionFailed,
    #[error("sequence number space exhausted")]
    SequenceExhausted,
    #[error("transport keys already in use")]
    TransportKeysAlreadyUsed,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
