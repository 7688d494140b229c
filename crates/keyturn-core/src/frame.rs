//! Frame reassembly for the secure channel.
//!
//! Incoming frames are a fixed 41 bytes: a 24-byte nonce followed by a
//! 17-byte sealed opcode (16-byte tag plus one byte of plaintext). The
//! radio link delivers at most 20 bytes per notification, so a complete
//! frame arrives as three chunks. The lock firmware always transmits
//! full-size intermediate chunks; the final logical byte may therefore
//! arrive inside an otherwise padded 20-byte chunk, of which only the
//! first byte is real.
//!
//! Frame boundaries are transport-synchronized, not self-describing:
//! the reassembler relies on in-order, lossless delivery and has no way
//! to detect corruption on its own. Accumulating more than one frame's
//! worth of bytes is a protocol violation and fatal to the session.

use keyturn_crypto::{Nonce24, NONCE_LEN, TAG_LEN};

use crate::errors::ProtocolError;

/// Total length of an incoming secure-channel frame.
pub const FRAME_LEN: usize = 41;

/// Length of the sealed opcode portion (tag plus one plaintext byte).
pub const CIPHERTEXT_LEN: usize = 1 + TAG_LEN;

/// Largest chunk the transport delivers in one notification.
pub const MAX_CHUNK_LEN: usize = 20;

/// A complete 41-byte frame: nonce followed by sealed opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// The 24-byte nonce the peer sealed this frame under.
    pub fn nonce(&self) -> Nonce24 {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&self.0[..NONCE_LEN]);
        Nonce24::from_bytes(nonce)
    }

    /// The sealed opcode: tag plus ciphertext, 17 bytes.
    pub fn ciphertext(&self) -> &[u8] {
        &self.0[NONCE_LEN..]
    }
}

/// Accumulates transport chunks into complete frames.
///
/// Created when notifications are subscribed; cleared after every
/// complete frame and on disconnect.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_LEN),
        }
    }

    /// Clear the accumulation buffer. Called whenever the notification
    /// subscription is (re-)established, so the next chunk is known to
    /// start a fresh frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes currently accumulated.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append a chunk; returns the completed frame once exactly 41
    /// bytes have accumulated.
    ///
    /// If the buffer already holds 40 bytes, only the first byte of the
    /// chunk is consumed: the firmware pads the final chunk to full
    /// size, and everything after the 41st byte is filler. Exceeding
    /// the frame length any other way is a `FrameOverflow`.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Frame>, ProtocolError> {
        if chunk.is_empty() {
            return Ok(None);
        }

        let take = if self.buffer.len() == FRAME_LEN - 1 {
            &chunk[..1]
        } else {
            chunk
        };

        if self.buffer.len() + take.len() > FRAME_LEN {
            return Err(ProtocolError::FrameOverflow {
                held: self.buffer.len(),
                pushed: chunk.len(),
            });
        }
        self.buffer.extend_from_slice(take);

        if self.buffer.len() == FRAME_LEN {
            let mut bytes = [0u8; FRAME_LEN];
            bytes.copy_from_slice(&self.buffer);
            self.buffer.clear();
            Ok(Some(Frame::from_bytes(bytes)))
        } else {
            Ok(None)
        }
    }
}
