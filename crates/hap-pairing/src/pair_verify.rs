//! Accessory side of HAP pair-verify (M1-M4).
//!
//! Re-authenticates a paired controller with fresh X25519 ephemerals and
//! both long-term Ed25519 keys, then derives the session keys for the
//! connection.

use crate::outcome::{Rejection, Session, VerifiedController};
use crate::store::IdentityStore;
use hap_core::error::{PairingError, Result};
use hap_crypto::{
    chacha::{HandshakeKey, Opener, Role, SessionCipher},
    curve25519::EcdhKeyPair,
    ed25519,
    keys::{SessionKeys, SharedSecret},
    tlv::{Tlv8, TlvError, TlvType},
};
use tracing::debug;
use zeroize::Zeroizing;

/// A decoded pair-verify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairVerifyRequest {
    /// M1: controller ephemeral X25519 public key.
    Start { public_key: [u8; 32] },
    /// M3: controller identifier and signature sealed with `PV-Msg03`.
    Finish { encrypted_data: Vec<u8> },
}

impl PairVerifyRequest {
    /// Decode the request by its `State` item.
    pub fn parse(tlv: &Tlv8) -> std::result::Result<Self, PairingError> {
        let state = tlv
            .state()
            .ok_or(PairingError::MissingTlv(TlvType::State as u8))?;

        match state {
            0x01 => Ok(Self::Start {
                public_key: tlv.require_array::<32>(TlvType::PublicKey)?,
            }),
            0x03 => Ok(Self::Finish {
                encrypted_data: tlv.require(TlvType::EncryptedData)?.to_vec(),
            }),
            other => Err(PairingError::UnknownState(other)),
        }
    }

    /// Wire `State` of the request.
    pub fn state(&self) -> u8 {
        match self {
            Self::Start { .. } => 0x01,
            Self::Finish { .. } => 0x03,
        }
    }
}

/// Pair-verify exchange waiting for its next request.
pub enum PairVerify {
    AwaitingM1,
    /// M2 sent.
    AwaitingM3(VerifyContext),
}

/// Ephemeral state between M2 and M3.
pub struct VerifyContext {
    client_public: [u8; 32],
    server_public: [u8; 32],
    shared_secret: SharedSecret,
    opener: Opener,
}

/// What a pair-verify request led to.
pub enum VerifyTransition {
    Continue(PairVerify, Vec<u8>),
    /// M4 sent; the transport must switch to `session`.
    Verified { response: Vec<u8>, session: Session },
    Rejected(Rejection),
}

impl PairVerify {
    pub fn expected_state(&self) -> u8 {
        match self {
            Self::AwaitingM1 => 0x01,
            Self::AwaitingM3(_) => 0x03,
        }
    }

    /// Run one step of the exchange.
    ///
    /// `Start` is accepted in any state and begins a new exchange.
    pub fn handle<S>(self, request: PairVerifyRequest, store: &S) -> Result<VerifyTransition>
    where
        S: IdentityStore + ?Sized,
    {
        match (self, request) {
            (_, PairVerifyRequest::Start { public_key }) => start(&public_key, store),
            (Self::AwaitingM3(context), PairVerifyRequest::Finish { encrypted_data }) => {
                finish(context, &encrypted_data, store)
            }
            (state, request) => Err(PairingError::StateMismatch {
                expected: state.expected_state(),
                actual: request.state(),
            }
            .into()),
        }
    }
}

/// M1 -> M2: our ephemeral key and a signed, sealed proof of identity.
fn start<S>(client_public: &[u8; 32], store: &S) -> Result<VerifyTransition>
where
    S: IdentityStore + ?Sized,
{
    if !store.is_paired()? {
        return Err(PairingError::NotPaired.into());
    }

    let ephemeral = EcdhKeyPair::generate();
    let server_public = ephemeral.public_key();
    let shared_secret = ephemeral.diffie_hellman(client_public)?;
    let (sealer, opener) = HandshakeKey::pair_verify(&shared_secret)?.split(Role::Accessory);

    let accessory = store.accessory();
    let mac_id = accessory.mac_id().as_bytes();

    let mut transcript = Vec::with_capacity(32 + mac_id.len() + 32);
    transcript.extend_from_slice(&server_public);
    transcript.extend_from_slice(mac_id);
    transcript.extend_from_slice(client_public);
    let signature = accessory.sign(&transcript);

    let mut sub_tlv = Tlv8::new();
    sub_tlv.set(TlvType::Identifier, mac_id.to_vec());
    sub_tlv.set(TlvType::Signature, signature.to_vec());

    let mut tlv = Tlv8::with_state(0x02);
    tlv.set(TlvType::PublicKey, server_public.to_vec());
    tlv.set(TlvType::EncryptedData, sealer.seal(&sub_tlv.encode())?);

    debug!("Pair-verify M2: sent accessory proof");
    Ok(VerifyTransition::Continue(
        PairVerify::AwaitingM3(VerifyContext {
            client_public: *client_public,
            server_public,
            shared_secret,
            opener,
        }),
        tlv.encode(),
    ))
}

/// M3 -> M4: authenticate the controller against its pairing record.
///
/// An unknown controller and a bad signature get the same reply.
fn finish<S>(context: VerifyContext, encrypted_data: &[u8], store: &S) -> Result<VerifyTransition>
where
    S: IdentityStore + ?Sized,
{
    let VerifyContext {
        client_public,
        server_public,
        shared_secret,
        opener,
    } = context;

    let plaintext = Zeroizing::new(
        opener
            .open(encrypted_data)
            .map_err(|_| PairingError::Authentication("pair-verify M3 failed to decrypt"))?,
    );
    let sub_tlv = Tlv8::parse(&plaintext).map_err(|e| PairingError::TlvParse(e.to_string()))?;
    let username = sub_tlv.require(TlvType::Identifier)?;
    let signature = sub_tlv.require_array::<64>(TlvType::Signature)?;

    let rejected = |reason: &'static str| {
        Ok(VerifyTransition::Rejected(Rejection::new(
            0x04,
            TlvError::Authentication,
            reason,
        )))
    };

    let record = match std::str::from_utf8(username) {
        Ok(name) => store.find_pairing(name)?,
        Err(_) => None,
    };
    let Some(record) = record else {
        return rejected("unknown controller");
    };

    let mut transcript = Vec::with_capacity(32 + username.len() + 32);
    transcript.extend_from_slice(&client_public);
    transcript.extend_from_slice(username);
    transcript.extend_from_slice(&server_public);

    if ed25519::verify(&record.public_key, &transcript, &signature).is_err() {
        return rejected("controller signature invalid");
    }

    let keys = SessionKeys::derive_control_keys(&shared_secret)?;
    let session = Session {
        controller: VerifiedController {
            username: record.username,
            permissions: record.permissions,
        },
        cipher: SessionCipher::accessory(&keys),
    };

    Ok(VerifyTransition::Verified {
        response: Tlv8::with_state(0x04).encode(),
        session,
    })
}
