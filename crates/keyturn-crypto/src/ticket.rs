//! Session tickets.
//!
//! A ticket is an opaque 72-byte credential issued by the backend
//! alongside each session key. It proves to the lock that the key the
//! client holds was authorized for this specific device; the client
//! forwards it verbatim, in plaintext, before the secure channel opens.

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a session ticket in bytes.
pub const TICKET_LEN: usize = 72;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    #[error("invalid ticket length: expected 72 bytes, got {0}")]
    InvalidTicketLength(usize),
}

/// An opaque session ticket. The layout is the backend's business; the
/// client only checks the length and forwards the bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Ticket([u8; TICKET_LEN]);

impl Ticket {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TicketError> {
        let arr: [u8; TICKET_LEN] = bytes
            .try_into()
            .map_err(|_| TicketError::InvalidTicketLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; TICKET_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Ticket {
    // The ticket is a credential; never log its contents.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ticket({TICKET_LEN} bytes)")
    }
}
