//! # hap-crypto
//!
//! Cryptographic primitives for HAP pairing.
//!
//! This crate provides:
//! - TLV8 message encoding
//! - SRP-6a (3072-bit, SHA-512) for pair-setup
//! - Curve25519 ECDH for pair-verify
//! - Ed25519 for long-term identities
//! - ChaCha20-Poly1305 for handshake messages and session frames
//! - HKDF-SHA512 for key derivation
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::{HandshakeKey, Opener, Role, Sealer, SessionCipher, StepNonce};
pub use curve25519::EcdhKeyPair;
pub use ed25519::IdentityKeyPair;
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use srp::{SrpClient, SrpServer, SrpSession};
pub use tlv::{Method, Tlv8, TlvError, TlvType};
