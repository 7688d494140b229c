//! 24-byte big-endian counter nonces.
//!
//! The secure channel treats nonces as unsigned 192-bit big-endian
//! integers. Both peers increment by one per message; ordering between
//! two nonces is plain byte-wise comparison of the big-endian encoding.

use zeroize::Zeroize;

/// Length of a wire nonce in bytes.
pub const NONCE_LEN: usize = 24;

/// A 24-byte big-endian counter nonce.
///
/// `Ord` is derived from the inner array: lexicographic comparison of
/// equal-length big-endian encodings is numeric comparison.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Zeroize)]
pub struct Nonce24([u8; NONCE_LEN]);

impl Nonce24 {
    /// The all-zero nonce, the counter's starting point for a fresh key.
    pub fn zero() -> Self {
        Self([0u8; NONCE_LEN])
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; NONCE_LEN] {
        self.0
    }

    /// Increment the counter by one, carrying from the least significant
    /// (last) byte. Wraps to zero after 2^192 - 1, which no session can
    /// reach in practice.
    pub fn increment(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (value, carry) = byte.overflowing_add(1);
            *byte = value;
            if !carry {
                return;
            }
        }
    }

    /// The successor of this nonce, without mutating it.
    pub fn next(&self) -> Self {
        let mut n = *self;
        n.increment();
        n
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Debug for Nonce24 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce24(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl From<[u8; NONCE_LEN]> for Nonce24 {
    fn from(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }
}
