//! Error types for the HAP pairing crates.

use thiserror::Error;

/// Primary error type for all pairing operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the pair-setup, pair-verify and pairings exchanges.
///
/// These are transport-level failures: nothing is encoded back to the peer
/// and the in-progress exchange, if any, has been discarded.
#[derive(Error, Debug)]
pub enum PairingError {
    /// The peer sent a State value that this exchange does not expect.
    #[error("Pairing state mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: u8, actual: u8 },

    /// The State value is not defined for this exchange at all.
    #[error("Unknown pairing state: {0}")]
    UnknownState(u8),

    #[error("Unsupported pairing method: {0}")]
    UnsupportedMethod(u8),

    #[error("TLV parsing error: {0}")]
    TlvParse(String),

    #[error("Missing required TLV type: {0}")]
    MissingTlv(u8),

    #[error("Invalid length for TLV type {tag}: expected {expected}, got {actual}")]
    InvalidTlvLength {
        tag: u8,
        expected: usize,
        actual: usize,
    },

    /// A step arrived without the state left behind by the previous step.
    #[error("Invalid pairing state: {0}")]
    InvalidState(String),

    /// Pair-verify was attempted while no controller is paired.
    #[error("Accessory is not paired")]
    NotPaired,

    /// A pairings request arrived on a connection that has not completed pair-verify.
    #[error("Connection is not verified")]
    NotVerified,

    /// A cryptographic check failed and the exchange was aborted without a reply.
    #[error("Authentication failed: {0}")]
    Authentication(&'static str),

    #[error("SRP verification failed")]
    SrpVerificationFailed,

    #[error("Signature verification failed")]
    SignatureInvalid,

    /// The accessory answered with a TLV error code (controller side).
    #[error("Pairing rejected by accessory at state {state}: {description}")]
    Rejected {
        state: u8,
        code: u8,
        /// Seconds the accessory asked the controller to wait, if any.
        retry_delay: Option<u16>,
        description: String,
    },
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(&'static str),

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,

    #[error("SRP proof mismatch")]
    ProofMismatch,

    #[error("Invalid signature")]
    InvalidSignature,

    /// An earlier frame failed to decrypt; the session cannot continue.
    #[error("Session cipher failed")]
    SessionFailed,
}

/// Parsing errors for configuration values.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Failures reported by a pairing store when committing or removing records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store's policy refused the pairing.
    #[error("Pairing declined by store policy")]
    Declined,

    #[error("Pairing store is full")]
    Full,

    #[error("Pairing store backend failure: {0}")]
    Backend(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
