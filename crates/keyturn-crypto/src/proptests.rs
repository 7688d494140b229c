
#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::nonce::{Nonce24, NONCE_LEN};
    use crate::session::{CryptoSession, CryptoError, KEY_LEN, TAG_LEN};

    proptest! {
        // Nonce ordering must agree with unsigned big-endian integer
        // ordering, which for equal-length encodings is byte ordering.
        #[test]
        fn test_nonce_ordering_matches_bytes(
            a in any::<[u8; NONCE_LEN]>(),
            b in any::<[u8; NONCE_LEN]>()
        ) {
            let na = Nonce24::from_bytes(a);
            let nb = Nonce24::from_bytes(b);
            prop_assert_eq!(na.cmp(&nb), a.cmp(&b));
        }

        // Incrementing always produces a strictly greater nonce, except
        // at the unreachable wrap-around point.
        #[test]
        fn test_increment_strictly_increases(bytes in any::<[u8; NONCE_LEN]>()) {
            let n = Nonce24::from_bytes(bytes);
            prop_assume!(bytes != [0xff; NONCE_LEN]);
            prop_assert!(n.next() > n);
        }

        // Round-trip through encrypt/decrypt for arbitrary keys and
        // payloads of the expected opcode length and larger.
        #[test]
        fn test_round_trip(
            key in any::<[u8; KEY_LEN]>(),
            plaintext in proptest::collection::vec(any::<u8>(), 1..64)
        ) {
            let mut sender = CryptoSession::new();
            sender.set_key(&key).unwrap();
            let mut receiver = CryptoSession::new();
            receiver.set_key(&key).unwrap();

            let nonce = sender.next_outgoing_nonce();
            let ciphertext = sender.encrypt(&plaintext).unwrap();
            prop_assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);

            let recovered = receiver.decrypt(&ciphertext, nonce).unwrap();
            prop_assert_eq!(recovered, plaintext);
        }

        // Any candidate nonce not strictly greater than an accepted one
        // is rejected and leaves the floor untouched.
        #[test]
        fn test_accept_nonce_replay_floor(
            accepted in any::<[u8; NONCE_LEN]>(),
            candidate in any::<[u8; NONCE_LEN]>()
        ) {
            let mut s = CryptoSession::new();
            s.set_key(&[0u8; KEY_LEN]).unwrap();

            let accepted = Nonce24::from_bytes(accepted);
            let candidate = Nonce24::from_bytes(candidate);
            prop_assume!(!accepted.is_zero());
            prop_assert!(s.accept_nonce(accepted));

            if candidate <= accepted {
                prop_assert!(!s.accept_nonce(candidate));
                prop_assert_eq!(s.last_accepted_nonce(), accepted);
            } else {
                prop_assert!(s.accept_nonce(candidate));
                prop_assert_eq!(s.last_accepted_nonce(), candidate);
            }
        }

        // A flipped ciphertext byte is always an authentication failure,
        // never a silent wrong plaintext.
        #[test]
        fn test_bit_flip_always_detected(
            key in any::<[u8; KEY_LEN]>(),
            flip_index in 0usize..(1 + TAG_LEN)
        ) {
            let mut sender = CryptoSession::new();
            sender.set_key(&key).unwrap();
            let mut receiver = CryptoSession::new();
            receiver.set_key(&key).unwrap();

            let nonce = sender.next_outgoing_nonce();
            let mut ciphertext = sender.encrypt(&[0x01]).unwrap();
            ciphertext[flip_index] ^= 0x80;
            prop_assert_eq!(
                receiver.decrypt(&ciphertext, nonce),
                Err(CryptoError::AuthenticationFailure)
            );
        }
    }
}
