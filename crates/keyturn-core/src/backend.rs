//! Backend and storage collaborator interfaces.
//!
//! The session never fetches keys or reads lock configuration itself;
//! the surrounding application supplies these capabilities. The traits
//! here are the whole contract.

use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyturn_crypto::{Ticket, KEY_LEN};

use crate::codes::Orientation;
use crate::errors::{BackendError, StoreError};

/// Identifier of a lock: the radio address of its controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockId(String);

impl LockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key and ticket for one session, issued by the backend. Replaced
/// wholesale whenever a new session key is fetched.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyMaterial {
    pub key: [u8; KEY_LEN],
    #[zeroize(skip)] // Ticket zeroizes itself on drop
    pub ticket: Ticket,
}

impl std::fmt::Debug for SessionKeyMaterial {
    // Key material never appears in logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKeyMaterial(..)")
    }
}

/// Backend collaborator issuing session keys and tickets. Network-bound
/// and asynchronous; failures are recoverable by retry once
/// connectivity or authentication is restored.
#[async_trait]
pub trait KeyService: Send + Sync {
    async fn request_session_key(&self, lock: &LockId)
        -> Result<SessionKeyMaterial, BackendError>;
}

/// Local storage collaborator for per-lock configuration.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// The mounting orientation of the given lock.
    async fn orientation(&self, lock: &LockId) -> Result<Orientation, StoreError>;
}
