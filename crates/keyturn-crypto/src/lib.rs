//! Secure-channel cryptography for keyturn.
//!
//! This crate implements the leaf layer of the lock protocol:
//! - `CryptoSession`: authenticated encryption/decryption over a
//!   backend-issued symmetric key, with monotonic nonce bookkeeping
//! - `Nonce24`: the 24-byte big-endian counter nonce used on the wire
//! - `Ticket`: the opaque 72-byte credential delivered to the lock once
//!   per session, before the secure channel is up

#![forbid(unsafe_code)]

pub mod nonce;
pub mod session;
pub mod ticket;

pub use nonce::{Nonce24, NONCE_LEN};
pub use session::{CryptoError, CryptoSession, KEY_LEN, TAG_LEN};
pub use ticket::{Ticket, TicketError, TICKET_LEN};

#[cfg(test)]
mod proptests;
