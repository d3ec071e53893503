//! Session key types and derivation.

use crate::hkdf;
use hap_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret from SRP or ECDH.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

/// 32-byte encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

/// Transport keys derived once pair-verify succeeds.
///
/// Named from the controller's point of view: the controller writes with
/// `write_key` and reads with `read_key`. The accessory does the opposite.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    /// `Control-Write-Encryption-Key`, controller to accessory.
    pub write_key: EncryptionKey,
    /// `Control-Read-Encryption-Key`, accessory to controller.
    pub read_key: EncryptionKey,
}

impl SharedSecret {
    /// Create from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl EncryptionKey {
    /// Create from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl SessionKeys {
    /// Derive the control channel keys from the pair-verify shared secret.
    pub fn derive_control_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let write_key = hkdf::derive_control_write_key(shared_secret.as_bytes())?;
        let read_key = hkdf::derive_control_read_key(shared_secret.as_bytes())?;

        Ok(Self {
            write_key: EncryptionKey(write_key),
            read_key: EncryptionKey(read_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod shared_secret {
        use super::*;

        #[test]
        fn new_stores_bytes() {
            let secret = SharedSecret::new(vec![0x01, 0x02, 0x03, 0x04]);
            assert_eq!(secret.as_bytes(), &[0x01, 0x02, 0x03, 0x04]);
        }

        #[test]
        fn accepts_fixed_arrays() {
            let secret = SharedSecret::new([0x42u8; 32]);
            assert_eq!(secret.as_bytes().len(), 32);
        }
    }

    mod session_keys {
        use super::*;

        #[test]
        fn read_and_write_keys_differ() {
            let keys = SessionKeys::derive_control_keys(&SharedSecret::new(vec![0xABu8; 32])).unwrap();
            assert_ne!(keys.write_key.as_bytes(), keys.read_key.as_bytes());
        }

        #[test]
        fn write_key_matches_hkdf_helper() {
            let secret = SharedSecret::new(vec![0xABu8; 32]);
            let keys = SessionKeys::derive_control_keys(&secret).unwrap();
            let expected = hkdf::derive_control_write_key(secret.as_bytes()).unwrap();
            assert_eq!(keys.write_key.as_bytes(), &expected);
        }

        #[test]
        fn different_secrets_produce_different_keys() {
            let keys1 = SessionKeys::derive_control_keys(&SharedSecret::new(vec![0x01u8; 32])).unwrap();
            let keys2 = SessionKeys::derive_control_keys(&SharedSecret::new(vec![0x02u8; 32])).unwrap();
            assert_ne!(keys1.write_key.as_bytes(), keys2.write_key.as_bytes());
            assert_ne!(keys1.read_key.as_bytes(), keys2.read_key.as_bytes());
        }
    }
}
