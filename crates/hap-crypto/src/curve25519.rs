//! Curve25519 ECDH for pair-verify key agreement.

use crate::keys::SharedSecret;
use hap_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// Ephemeral Curve25519 key pair for one pair-verify exchange.
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Create from existing secret key bytes.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let static_secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&static_secret);
        Self {
            public: public.to_bytes(),
            secret: *secret,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Perform Diffie-Hellman key exchange, consuming the key pair.
    ///
    /// Rejects an all-zero peer key and low-order points (all-zero output).
    pub fn diffie_hellman(self, peer_public: &[u8; 32]) -> Result<SharedSecret, CryptoError> {
        if peer_public.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidPublicKey("X25519 key is all zeros"));
        }

        let static_secret = StaticSecret::from(self.secret);
        let shared = static_secret.diffie_hellman(&PublicKey::from(*peer_public));

        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey("X25519 key has low order"));
        }

        Ok(SharedSecret::new(shared.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod key_generation {
        use super::*;

        #[test]
        fn generate_creates_unique_keys() {
            let kp1 = EcdhKeyPair::generate();
            let kp2 = EcdhKeyPair::generate();
            assert_ne!(kp1.public_key(), kp2.public_key());
        }

        #[test]
        fn from_secret_is_deterministic() {
            let kp1 = EcdhKeyPair::from_secret(&[0x42u8; 32]);
            let kp2 = EcdhKeyPair::from_secret(&[0x42u8; 32]);
            assert_eq!(kp1.public_key(), kp2.public_key());
        }
    }

    mod diffie_hellman {
        use super::*;

        #[test]
        fn both_parties_derive_same_secret() {
            let alice = EcdhKeyPair::generate();
            let bob = EcdhKeyPair::generate();
            let alice_public = alice.public_key();
            let bob_public = bob.public_key();

            let shared_a = alice.diffie_hellman(&bob_public).unwrap();
            let shared_b = bob.diffie_hellman(&alice_public).unwrap();

            assert_eq!(shared_a.as_bytes(), shared_b.as_bytes());
        }

        #[test]
        fn fresh_ephemerals_give_fresh_secrets() {
            let peer = EcdhKeyPair::generate().public_key();
            let s1 = EcdhKeyPair::generate().diffie_hellman(&peer).unwrap();
            let s2 = EcdhKeyPair::generate().diffie_hellman(&peer).unwrap();
            assert_ne!(s1.as_bytes(), s2.as_bytes());
        }

        #[test]
        fn rejects_low_order_points() {
            // Point of order 8.
            let low_order: [u8; 32] =
                hex::decode("ecffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff7f")
                    .unwrap()
                    .try_into()
                    .unwrap();
            let result = EcdhKeyPair::generate().diffie_hellman(&low_order);
            assert!(matches!(result, Err(CryptoError::InvalidPublicKey(_))));
        }

        #[test]
        fn rejects_all_zero_public_key() {
            let result = EcdhKeyPair::generate().diffie_hellman(&[0u8; 32]);
            assert!(result.is_err());
        }
    }

    mod known_vectors {
        use super::*;

        #[test]
        fn rfc7748_test_vector() {
            // RFC 7748 Section 6.1
            let alice_secret: [u8; 32] =
                hex::decode("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
                    .unwrap()
                    .try_into()
                    .unwrap();
            let bob_public: [u8; 32] =
                hex::decode("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f")
                    .unwrap()
                    .try_into()
                    .unwrap();

            let alice = EcdhKeyPair::from_secret(&alice_secret);
            assert_eq!(
                hex::encode(alice.public_key()),
                "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a"
            );

            let shared = alice.diffie_hellman(&bob_public).unwrap();
            assert_eq!(
                hex::encode(shared.as_bytes()),
                "4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742"
            );
        }
    }
}
