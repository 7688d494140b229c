//! Error types for keyturn core.
//!
//! The taxonomy matters more than the shapes: transport-lifecycle and
//! backend errors are recoverable by retry, protocol-integrity errors
//! are fatal to the session instance and force a full reconnect, and
//! configuration errors indicate a broken backend and fail fast.

use thiserror::Error;

use keyturn_crypto::CryptoError;

/// Transport-lifecycle errors. Recoverable; surfaced as transient state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be initiated or completed
    #[error("transport failed: connection failed")]
    ConnectionFailed,

    /// Operation requires an established link
    #[error("transport failed: not connected")]
    NotConnected,

    /// Write to the outbound characteristic failed
    #[error("transport failed: write failed")]
    WriteFailed,

    /// Notification subscription failed
    #[error("transport failed: subscription failed")]
    SubscribeFailed,
}

/// Backend collaborator errors. Recoverable once connectivity returns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("session key request failed: {0}")]
    KeyRequestFailed(String),
}

/// Local storage collaborator errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown lock: {0}")]
    UnknownLock(String),
}

/// Protocol-integrity errors. Fatal to the session, never silently
/// retried; they indicate nonce desynchronization or a corrupted peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// More bytes arrived than fit a single frame
    #[error("frame overflow: {held} bytes held, chunk of {pushed} exceeds the 41-byte frame")]
    FrameOverflow { held: usize, pushed: usize },

    /// Response opcode outside the known table
    #[error("unknown response code: {0}")]
    UnknownResponseCode(u8),

    /// Decryption, authentication, or replay failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Unified error type for core operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Session has been closed; no further operations are accepted
    #[error("session closed")]
    Closed,
}

impl From<CryptoError> for CoreError {
    fn from(e: CryptoError) -> Self {
        CoreError::Protocol(ProtocolError::Crypto(e))
    }
}

/// Why a session died. Carried by the terminal `Error` state and
/// surfaced to the caller through notices.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// No connection established within the connect window
    #[error("device not found")]
    DeviceNotFound,

    /// The peer does not expose the lock service
    #[error("lock service missing on device")]
    ServiceMissing,

    /// Backend refused or failed the session key request
    #[error("session key request failed")]
    KeyRequestFailed,

    /// The lock rejected the ticket
    #[error("ticket rejected by lock")]
    TicketRejected,

    /// The lock reported our request as invalid
    #[error("lock rejected request as invalid")]
    InvalidRequest,

    /// A response frame failed authentication
    #[error("response authentication failed")]
    AuthenticationFailure,

    /// A response frame reused a stale nonce
    #[error("response nonce replayed")]
    ReplayedNonce,

    /// Reassembly overflowed the fixed frame length
    #[error("frame overflow")]
    FrameOverflow,

    /// Response opcode outside the known table
    #[error("unknown response code {0}")]
    UnknownResponseCode(u8),

    /// A known response arrived in a state that cannot consume it
    #[error("unexpected response for session state")]
    UnexpectedResponse,
}

impl SessionFailure {
    /// Protocol-integrity failures are audit-logged and always force a
    /// full reconnect; they must never be silently retried.
    pub fn is_protocol_integrity(&self) -> bool {
        matches!(
            self,
            SessionFailure::InvalidRequest
                | SessionFailure::AuthenticationFailure
                | SessionFailure::ReplayedNonce
                | SessionFailure::FrameOverflow
                | SessionFailure::UnknownResponseCode(_)
                | SessionFailure::UnexpectedResponse
        )
    }

    /// Whether the caller may simply retry the flow (restart the
    /// connection) without further investigation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionFailure::DeviceNotFound | SessionFailure::KeyRequestFailed
        )
    }
}
