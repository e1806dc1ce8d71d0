//! Ultralight C mutual authentication and EV1 / NTAG password probing
//!
//! The Ultralight C exchange:
//!
//! ```text
//! reader                                   tag
//!   1A 00                       ──────────▶
//!                               ◀──────────  AF ‖ ek(RndB)
//!   AF ‖ ek(RndA ‖ RndB')       ──────────▶
//!                               ◀──────────  00 ‖ ek(RndA)
//! ```
//!
//! `'` is a rotation left by one byte. Both parties run 3DES in CBC mode
//! and the chain continues across messages: the reader encrypts its
//! 16-byte block with ek(RndB) as IV and decrypts the tag's final answer
//! with the last block it sent. The decrypted answer must equal RndA as sent.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, CipherError, TdesKey, BLOCK_SIZE, ZERO_IV};
use crate::transport::{cmd, FieldSession, Transport, TransportError};

/// Block index sent with AUTH_START
pub const AUTH_BLOCK: u8 = 0x00;

/// Local challenge RndA used unless the caller supplies another
pub const DEFAULT_LOCAL_CHALLENGE: [u8; BLOCK_SIZE] = [0x01; BLOCK_SIZE];

/// Well-known Ultralight C keys, most likely first
pub const DEFAULT_3DES_KEYS: [[u8; 16]; 7] = [
    // "BREAKMEIFYOUCAN!", the factory key
    [
        0x42, 0x52, 0x45, 0x41, 0x4b, 0x4d, 0x45, 0x49, 0x46, 0x59, 0x4f, 0x55, 0x43, 0x41, 0x4e,
        0x21,
    ],
    [0x00; 16],
    [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ],
    // NFC key
    [
        0x49, 0x45, 0x4D, 0x4B, 0x41, 0x45, 0x52, 0x42, 0x21, 0x4E, 0x41, 0x43, 0x55, 0x4F, 0x59,
        0x46,
    ],
    [0x01; 16],
    [0xFF; 16],
    [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
        0xFF,
    ],
];

/// A known EV1 / NTAG password and the PACK it is usually paired with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownPassword {
    pub pwd: [u8; 4],
    pub pack: [u8; 2],
    pub origin: &'static str,
}

pub const DEFAULT_PASSWORDS: [KnownPassword; 3] = [
    KnownPassword {
        pwd: [0xFF, 0xFF, 0xFF, 0xFF],
        pack: [0x00, 0x00],
        origin: "factory default",
    },
    KnownPassword {
        pwd: [0x4A, 0xF8, 0x4B, 0x19],
        pack: [0xE5, 0xBE],
        origin: "italian bus",
    },
    KnownPassword {
        pwd: [0x05, 0x22, 0xE6, 0xB4],
        pack: [0x80, 0x80],
        origin: "amiibo",
    },
];

/// The default Ultralight C keys as key material
pub fn default_keys() -> Vec<TdesKey> {
    DEFAULT_3DES_KEYS
        .iter()
        .filter_map(|k| TdesKey::from_slice(k).ok())
        .collect()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Tag rejected AUTH_START")]
    AuthStartRejected,

    #[error("Tag rejected the reader's challenge answer")]
    SecondMessageRejected,

    #[error("Tag answer does not match the local challenge")]
    ChallengeMismatch,

    #[error("Tag rejected the password")]
    PasswordRejected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),
}

impl AuthError {
    /// True when the failure means the candidate secret is wrong
    pub fn is_wrong_key(&self) -> bool {
        matches!(
            self,
            Self::AuthStartRejected
                | Self::SecondMessageRejected
                | Self::ChallengeMismatch
                | Self::PasswordRejected
        )
    }
}

/// Authentication progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthState {
    Init,
    ChallengeReceived,
    Authenticated,
    Failed,
}

/// Per-attempt challenge material, wiped on drop
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct ChallengeState {
    uid: Vec<u8>,
    local: [u8; BLOCK_SIZE],
    encrypted_peer: [u8; BLOCK_SIZE],
    rotated_peer: [u8; BLOCK_SIZE],
    combined: [u8; 2 * BLOCK_SIZE],
    response: [u8; 2 * BLOCK_SIZE],
    chain_iv: [u8; BLOCK_SIZE],
}

impl ChallengeState {
    /// Derive the reader's answer to `ek(RndB)`
    pub fn answer(
        key: &TdesKey,
        local: &[u8; BLOCK_SIZE],
        encrypted_peer: &[u8; BLOCK_SIZE],
    ) -> Result<Self, CipherError> {
        let mut state = ChallengeState::default();
        state.local = *local;
        state.encrypted_peer = *encrypted_peer;

        let mut peer = crypto::decrypt(key, &ZERO_IV, encrypted_peer)?;
        let mut peer_block = [0u8; BLOCK_SIZE];
        peer_block.copy_from_slice(&peer);
        state.rotated_peer = crypto::rotate_left(&peer_block);
        peer.zeroize();
        peer_block.zeroize();

        state.combined[..BLOCK_SIZE].copy_from_slice(local);
        state.combined[BLOCK_SIZE..].copy_from_slice(&state.rotated_peer);

        let mut response = crypto::encrypt(key, encrypted_peer, &state.combined)?;
        state.response.copy_from_slice(&response);
        state.chain_iv = crypto::chain_iv(&response)?;
        response.zeroize();
        Ok(state)
    }

    /// The 16-byte ciphertext sent after AF
    pub fn second_message(&self) -> &[u8; 2 * BLOCK_SIZE] {
        &self.response
    }

    /// Attach the UID of the selected tag, used only in log lines
    pub fn with_uid(mut self, uid: &[u8]) -> Self {
        self.uid = uid.to_vec();
        self
    }

    /// Check the tag's final answer against the local challenge, unrotated
    pub fn verify(&self, key: &TdesKey, encrypted_answer: &[u8; BLOCK_SIZE]) -> Result<(), AuthError> {
        let mut answer = crypto::decrypt(key, &self.chain_iv, encrypted_answer)?;
        let matches = answer.as_slice() == self.local.as_slice();
        answer.zeroize();
        if matches {
            Ok(())
        } else {
            debug!(uid = %hex::encode(&self.uid), "tag answer does not match the local challenge");
            Err(AuthError::ChallengeMismatch)
        }
    }
}

/// One authentication attempt with one candidate key
pub struct Authenticator<'k> {
    key: &'k TdesKey,
    local_challenge: [u8; BLOCK_SIZE],
    uid: Vec<u8>,
    state: AuthState,
}

impl<'k> Authenticator<'k> {
    pub fn new(key: &'k TdesKey) -> Self {
        Self {
            key,
            local_challenge: DEFAULT_LOCAL_CHALLENGE,
            uid: Vec::new(),
            state: AuthState::Init,
        }
    }

    /// UID reported at selection, carried into the challenge state for logging
    pub fn with_uid(mut self, uid: &[u8]) -> Self {
        self.uid = uid.to_vec();
        self
    }

    pub fn with_local_challenge(mut self, challenge: [u8; BLOCK_SIZE]) -> Self {
        self.local_challenge = challenge;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Run the exchange on a selected tag. No step is retried.
    pub fn run<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), AuthError> {
        let result = self.exchange(transport);
        self.state = if result.is_ok() {
            AuthState::Authenticated
        } else {
            AuthState::Failed
        };
        result
    }

    fn exchange<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), AuthError> {
        let start = transport
            .send_raw(&[cmd::AUTH_START, AUTH_BLOCK])
            .map_err(|_| AuthError::AuthStartRejected)?;
        let encrypted_peer =
            framed_block(&start, cmd::AUTH_CONTINUE).ok_or(AuthError::AuthStartRejected)?;
        self.state = AuthState::ChallengeReceived;

        let challenge = ChallengeState::answer(self.key, &self.local_challenge, &encrypted_peer)?
            .with_uid(&self.uid);
        debug!(uid = %hex::encode(&self.uid), "sending second authentication message");
        let mut frame = Vec::with_capacity(1 + 2 * BLOCK_SIZE);
        frame.push(cmd::AUTH_CONTINUE);
        frame.extend_from_slice(challenge.second_message());
        let reply = transport.send_raw(&frame);
        frame.zeroize();

        let reply = match reply {
            Ok(reply) => reply,
            Err(TransportError::Nack(_)) => return Err(AuthError::SecondMessageRejected),
            Err(e) => return Err(e.into()),
        };
        let encrypted_answer =
            framed_block(&reply, 0x00).ok_or(AuthError::SecondMessageRejected)?;
        challenge.verify(self.key, &encrypted_answer)
    }
}

/// Extract the 8-byte payload of a `prefix ‖ block ‖ CRC` answer
fn framed_block(answer: &[u8], prefix: u8) -> Option<[u8; BLOCK_SIZE]> {
    if answer.len() < 1 + BLOCK_SIZE || answer[0] != prefix {
        return None;
    }
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(&answer[1..1 + BLOCK_SIZE]);
    Some(block)
}

/// Result of a key search
#[derive(Debug, Clone, Default)]
pub struct AuthOutcome {
    /// The first key the tag accepted
    pub matched_key: Option<TdesKey>,
    /// Position of that key in the candidate list
    pub matched_index: Option<usize>,
    /// Number of keys tried
    pub attempts: usize,
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        self.matched_key.is_some()
    }
}

/// Try each candidate key in order, re-selecting the tag for every attempt.
///
/// Wrong-key failures move on to the next candidate; anything else (no tag,
/// reader failure, a silent second message) ends the search.
pub fn authenticate<T: Transport + ?Sized>(
    transport: &mut T,
    candidates: &[TdesKey],
    local_challenge: [u8; BLOCK_SIZE],
) -> Result<AuthOutcome, AuthError> {
    let mut outcome = AuthOutcome::default();
    for (index, key) in candidates.iter().enumerate() {
        outcome.attempts += 1;
        let (mut session, selected) = FieldSession::select(&mut *transport)?;
        let uid = hex::encode(&selected.uid);
        let mut authenticator = Authenticator::new(key)
            .with_local_challenge(local_challenge)
            .with_uid(&selected.uid);
        match authenticator.run(&mut *session) {
            Ok(()) => {
                info!(index, %uid, "Ultralight C authentication succeeded");
                outcome.matched_key = Some(key.clone());
                outcome.matched_index = Some(index);
                return Ok(outcome);
            }
            Err(e) if e.is_wrong_key() => {
                debug!(index, %uid, "candidate key rejected: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    info!(attempts = outcome.attempts, "No candidate key accepted");
    Ok(outcome)
}

/// Send PWD_AUTH and return the PACK
pub fn pwd_auth<T: Transport + ?Sized>(
    transport: &mut T,
    pwd: &[u8; 4],
) -> Result<[u8; 2], AuthError> {
    let answer = match transport.send_raw(&[cmd::PWD_AUTH, pwd[0], pwd[1], pwd[2], pwd[3]]) {
        Ok(answer) => answer,
        Err(TransportError::Nack(_)) => return Err(AuthError::PasswordRejected),
        Err(e) => return Err(e.into()),
    };
    if answer.len() < 2 {
        return Err(AuthError::PasswordRejected);
    }
    Ok([answer[0], answer[1]])
}

/// A password the tag accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PasswordMatch {
    #[serde(with = "hex")]
    pub pwd: [u8; 4],
    #[serde(with = "hex")]
    pub pack: [u8; 2],
}

/// Try each password in order, re-selecting the tag for every attempt
pub fn probe_passwords<T: Transport + ?Sized>(
    transport: &mut T,
    candidates: &[[u8; 4]],
) -> Result<Option<PasswordMatch>, AuthError> {
    for (index, pwd) in candidates.iter().enumerate() {
        let (mut session, _) = FieldSession::select(&mut *transport)?;
        match pwd_auth(&mut *session, pwd) {
            Ok(pack) => {
                info!(index, pack = %hex::encode(pack), "Password accepted");
                return Ok(Some(PasswordMatch { pwd: *pwd, pack }));
            }
            Err(e) if e.is_wrong_key() => debug!(index, "password rejected"),
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_key() -> TdesKey {
        TdesKey::from_slice(&DEFAULT_3DES_KEYS[0]).unwrap()
    }

    const ENCRYPTED_PEER: [u8; 8] = [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x07, 0x18];

    #[test]
    fn test_second_message_golden_vector() {
        let state =
            ChallengeState::answer(&factory_key(), &DEFAULT_LOCAL_CHALLENGE, &ENCRYPTED_PEER)
                .unwrap();
        assert_eq!(
            hex::encode(state.second_message()),
            "1311d804689b9ecb96b7bc60a6c3fc6d"
        );
        assert_eq!(hex::encode(state.rotated_peer), "1d42d81708f0cc1d");
    }

    #[test]
    fn test_final_answer_verification() {
        let key = factory_key();
        let state =
            ChallengeState::answer(&key, &DEFAULT_LOCAL_CHALLENGE, &ENCRYPTED_PEER).unwrap();
        let tag_answer = [0x9e, 0xad, 0x58, 0x9f, 0xc3, 0xce, 0x54, 0xd2];
        assert_eq!(state.verify(&key, &tag_answer), Ok(()));
        assert_eq!(
            state.verify(&key, &[0u8; 8]),
            Err(AuthError::ChallengeMismatch)
        );
    }

    #[test]
    fn test_final_answer_is_the_unrotated_local_challenge() {
        let key = factory_key();
        let local = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let state = ChallengeState::answer(&key, &local, &ENCRYPTED_PEER).unwrap();

        let answer = crypto::encrypt(&key, &state.chain_iv, &local).unwrap();
        let mut block = [0u8; 8];
        block.copy_from_slice(&answer);
        assert_eq!(state.verify(&key, &block), Ok(()));

        let rotated = crypto::encrypt(&key, &state.chain_iv, &crypto::rotate_left(&local)).unwrap();
        block.copy_from_slice(&rotated);
        assert_eq!(state.verify(&key, &block), Err(AuthError::ChallengeMismatch));
    }

    #[test]
    fn test_uid_is_kept_in_challenge_state() {
        let uid = [0x04, 0x3A, 0x5B, 0x7C, 0x8D, 0x9E, 0xAF];
        let state = ChallengeState::answer(&factory_key(), &DEFAULT_LOCAL_CHALLENGE, &ENCRYPTED_PEER)
            .unwrap()
            .with_uid(&uid);
        assert_eq!(state.uid, uid.to_vec());
    }

    #[test]
    fn test_second_message_is_deterministic() {
        let key = factory_key();
        let a = ChallengeState::answer(&key, &DEFAULT_LOCAL_CHALLENGE, &ENCRYPTED_PEER).unwrap();
        let b = ChallengeState::answer(&key, &DEFAULT_LOCAL_CHALLENGE, &ENCRYPTED_PEER).unwrap();
        assert_eq!(a.second_message(), b.second_message());
    }

    #[test]
    fn test_framed_block() {
        let mut answer = vec![0xAF];
        answer.extend_from_slice(&ENCRYPTED_PEER);
        answer.extend_from_slice(&[0x12, 0x34]);
        assert_eq!(framed_block(&answer, 0xAF), Some(ENCRYPTED_PEER));
        assert_eq!(framed_block(&answer, 0x00), None);
        assert_eq!(framed_block(&[0x04], 0xAF), None);
    }

    #[test]
    fn test_default_key_list_order() {
        let keys = default_keys();
        assert_eq!(keys.len(), 7);
        assert_eq!(keys[0].as_slice(), b"BREAKMEIFYOUCAN!");
    }

    #[test]
    fn test_wrong_key_errors() {
        assert!(AuthError::ChallengeMismatch.is_wrong_key());
        assert!(AuthError::AuthStartRejected.is_wrong_key());
        assert!(!AuthError::Transport(TransportError::NoTag).is_wrong_key());
    }
}
