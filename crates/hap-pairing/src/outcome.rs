//! Results shared by the pairing exchanges.

use crate::store::Permissions;
use hap_crypto::chacha::SessionCipher;
use hap_crypto::tlv::{Tlv8, TlvError};
use std::fmt;

/// An exchange that ended with an error TLV sent back to the peer.
///
/// Only `state` and `code` go on the wire; `reason` is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub state: u8,
    pub code: TlvError,
    pub reason: &'static str,
}

impl Rejection {
    pub fn new(state: u8, code: TlvError, reason: &'static str) -> Self {
        Self {
            state,
            code,
            reason,
        }
    }

    /// Encode as `State, Error`.
    pub fn encode(&self) -> Vec<u8> {
        Tlv8::error_response(self.state, self.code).encode()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at state {}: {}", self.code, self.state, self.reason)
    }
}

/// A controller authenticated by pair-verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedController {
    pub username: String,
    pub permissions: Permissions,
}

/// Encryption context handed to the transport after pair-verify.
///
/// Every later frame on the connection goes through `cipher`.
pub struct Session {
    pub controller: VerifiedController,
    pub cipher: SessionCipher,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
