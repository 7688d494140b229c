//! Session cryptography.
//!
//! Provides authenticated encryption for the secure channel using
//! XSalsa20-Poly1305 (secretbox) with 24-byte counter nonces. One
//! `CryptoSession` is owned by exactly one lock session; key and nonce
//! state are never shared between connections.
//!
//! Nonce discipline: the outgoing counter advances once per encryption,
//! so locally generated nonces strictly increase. Incoming nonces are
//! accepted only if strictly greater than the highest nonce previously
//! accepted for the current key. The two counters are independent; they
//! stay in lockstep only because the peer replies under a greater nonce
//! each time.

use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::nonce::Nonce24;
use crate::ticket::{Ticket, TicketError};

/// Length of a session key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the authentication tag the cipher adds to every message.
pub const TAG_LEN: usize = 16;

/// Error type for session crypto operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error("encryption failed")]
    EncryptionFailure,
    #[error("authentication failed")]
    AuthenticationFailure,
    #[error("replayed or stale nonce")]
    ReplayedNonce,
}

/// Authenticated encryption context for one secure channel.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CryptoSession {
    #[zeroize(skip)] // XSalsa20Poly1305 does not implement Zeroize
    cipher: Option<XSalsa20Poly1305>,
    ticket: Option<Ticket>,
    outgoing: Nonce24,
    last_accepted: Nonce24,
}

impl CryptoSession {
    /// Create a session with no key material. `set_key` must be called
    /// before any encrypt/decrypt.
    pub fn new() -> Self {
        Self {
            cipher: None,
            ticket: None,
            outgoing: Nonce24::zero(),
            last_accepted: Nonce24::zero(),
        }
    }

    /// Install a fresh session key, resetting both nonce counters to
    /// zero. The previous key, if any, is discarded wholesale.
    pub fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        self.cipher = Some(XSalsa20Poly1305::new(Key::from_slice(key)));
        self.outgoing = Nonce24::zero();
        self.last_accepted = Nonce24::zero();
        Ok(())
    }

    /// Store the ticket to be forwarded during pairing.
    pub fn set_ticket(&mut self, ticket: &[u8]) -> Result<(), CryptoError> {
        self.ticket = Some(Ticket::from_bytes(ticket)?);
        Ok(())
    }

    /// The stored ticket, if one has been set.
    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    pub fn has_key(&self) -> bool {
        self.cipher.is_some()
    }

    /// The nonce the next encryption will use. Peeking does not advance
    /// the counter and never touches the incoming "last accepted" state.
    pub fn next_outgoing_nonce(&self) -> Nonce24 {
        self.outgoing.next()
    }

    /// Authenticated-encrypt `plaintext` under the next outgoing nonce,
    /// advancing the outgoing counter. Returns tag-prefixed ciphertext
    /// (secretbox layout), `plaintext.len() + TAG_LEN` bytes.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::EncryptionFailure)?;
        self.outgoing.increment();
        cipher
            .encrypt(Nonce::from_slice(self.outgoing.as_bytes()), plaintext)
            .map_err(|_| CryptoError::EncryptionFailure)
    }

    /// Commit `candidate` as the new highest accepted nonce iff it is
    /// strictly greater than the previous one. Returns false without
    /// mutating state otherwise. This is the replay defense.
    pub fn accept_nonce(&mut self, candidate: Nonce24) -> bool {
        if candidate > self.last_accepted {
            self.last_accepted = candidate;
            true
        } else {
            false
        }
    }

    /// Verify and decrypt a peer message. Fails with `ReplayedNonce` if
    /// the nonce is not strictly greater than the last accepted one, and
    /// with `AuthenticationFailure` if the tag does not verify. The
    /// nonce is committed only after the tag verifies, so a forged frame
    /// cannot advance the replay floor.
    pub fn decrypt(&mut self, ciphertext: &[u8], nonce: Nonce24) -> Result<Vec<u8>, CryptoError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or(CryptoError::AuthenticationFailure)?;
        if nonce <= self.last_accepted {
            return Err(CryptoError::ReplayedNonce);
        }
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce.as_bytes()), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailure)?;
        self.last_accepted = nonce;
        Ok(plaintext)
    }

    /// Highest nonce accepted from the peer under the current key.
    pub fn last_accepted_nonce(&self) -> Nonce24 {
        self.last_accepted
    }
}

impl Default for CryptoSession {
    fn default() -> Self {
        Self::new()
    }
}
