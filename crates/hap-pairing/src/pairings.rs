//! Add, remove and list pairings over a verified session.

use crate::outcome::{Rejection, VerifiedController};
use crate::store::{IdentityStore, PairingRecord, Permissions};
use hap_core::error::{PairingError, Result};
use hap_crypto::tlv::{Method, Tlv8, TlvError, TlvType};
use tracing::{info, warn};

/// A decoded `/pairings` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingsRequest {
    Add(PairingRecord),
    Remove { username: String },
    List,
}

impl PairingsRequest {
    /// Decode a `State=1` request by its `Method` item.
    ///
    /// `Permissions` is optional on add and defaults to `User`.
    pub fn parse(tlv: &Tlv8) -> std::result::Result<Self, PairingError> {
        let state = tlv
            .state()
            .ok_or(PairingError::MissingTlv(TlvType::State as u8))?;
        if state != 0x01 {
            return Err(PairingError::StateMismatch {
                expected: 0x01,
                actual: state,
            });
        }

        let method = tlv
            .method()
            .ok_or(PairingError::MissingTlv(TlvType::Method as u8))?;
        match Method::from_byte(method) {
            Some(Method::AddPairing) => {
                let permissions = match tlv.get(TlvType::Permissions) {
                    None => Permissions::User,
                    Some(value) => value
                        .first()
                        .copied()
                        .and_then(Permissions::from_byte)
                        .ok_or_else(|| PairingError::TlvParse("invalid permissions".to_string()))?,
                };
                Ok(Self::Add(PairingRecord::new(
                    username(tlv)?,
                    tlv.require_array::<32>(TlvType::PublicKey)?,
                    permissions,
                )))
            }
            Some(Method::RemovePairing) => Ok(Self::Remove {
                username: username(tlv)?,
            }),
            Some(Method::ListPairings) => Ok(Self::List),
            _ => Err(PairingError::UnsupportedMethod(method)),
        }
    }

    /// Encode as a controller request.
    pub fn encode(&self) -> Vec<u8> {
        let mut tlv = Tlv8::with_state(0x01);
        match self {
            Self::Add(record) => {
                tlv.set(TlvType::Method, vec![Method::AddPairing as u8]);
                tlv.set(TlvType::Identifier, record.username.as_bytes().to_vec());
                tlv.set(TlvType::PublicKey, record.public_key.to_vec());
                tlv.set(TlvType::Permissions, vec![record.permissions as u8]);
            }
            Self::Remove { username } => {
                tlv.set(TlvType::Method, vec![Method::RemovePairing as u8]);
                tlv.set(TlvType::Identifier, username.as_bytes().to_vec());
            }
            Self::List => {
                tlv.set(TlvType::Method, vec![Method::ListPairings as u8]);
            }
        }
        tlv.encode()
    }
}

fn username(tlv: &Tlv8) -> std::result::Result<String, PairingError> {
    String::from_utf8(tlv.require(TlvType::Identifier)?.to_vec())
        .map_err(|_| PairingError::TlvParse("identifier is not UTF-8".to_string()))
}

/// What a pairings request led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingsOutcome {
    /// Send `State=2` (and the list, for list requests).
    Done(Vec<u8>),
    /// Pairing removed; connections verified as `username` must be closed.
    Removed { response: Vec<u8>, username: String },
    Rejected(Rejection),
}

/// Execute a pairings request on behalf of a verified controller.
///
/// Only admins may manage pairings. A store failure on add is returned as
/// an error and nothing is sent to the controller.
pub fn handle<S>(
    request: PairingsRequest,
    controller: &VerifiedController,
    store: &S,
) -> Result<PairingsOutcome>
where
    S: IdentityStore + ?Sized,
{
    // Permissions may have changed since the session was verified.
    let is_admin = store
        .find_pairing(&controller.username)?
        .is_some_and(|record| record.permissions.is_admin());
    if !is_admin {
        warn!("Pairings request from non-admin {}", controller.username);
        return Ok(PairingsOutcome::Rejected(Rejection::new(
            0x02,
            TlvError::Authentication,
            "controller is not an admin",
        )));
    }

    let response = Tlv8::with_state(0x02);
    match request {
        PairingsRequest::Add(record) => {
            let username = record.username.clone();
            store.commit_pairing(record)?;
            info!("{} added pairing {}", controller.username, username);
            Ok(PairingsOutcome::Done(response.encode()))
        }
        PairingsRequest::Remove { username } => {
            if store.remove_pairing(&username)? {
                info!("{} removed pairing {}", controller.username, username);
            }
            Ok(PairingsOutcome::Removed {
                response: response.encode(),
                username,
            })
        }
        PairingsRequest::List => {
            let mut response = response;
            for (i, record) in store.list_pairings()?.iter().enumerate() {
                if i > 0 {
                    response.push(TlvType::Separator, Vec::new());
                }
                response.push(TlvType::Identifier, record.username.as_bytes().to_vec());
                response.push(TlvType::PublicKey, record.public_key.to_vec());
                response.push(TlvType::Permissions, vec![record.permissions as u8]);
            }
            Ok(PairingsOutcome::Done(response.encode()))
        }
    }
}
