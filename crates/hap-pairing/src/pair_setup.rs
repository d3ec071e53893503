//! Accessory side of HAP pair-setup (M1-M6).
//!
//! The controller proves knowledge of the setup code with SRP-6a, then both
//! sides exchange long-term Ed25519 keys under the SRP session key. A
//! successful exchange commits the controller as an admin pairing.
//!
//! Each request consumes the current [`PairSetup`] value; only a step that
//! expects another request hands back a successor, so SRP and handshake
//! keys of a finished or failed exchange are dropped with it.

use crate::outcome::Rejection;
use crate::store::{IdentityStore, PairingRecord, Permissions};
use hap_core::config::PairingConfig;
use hap_core::error::{CryptoError, PairingError, Result, StoreError};
use hap_crypto::{
    chacha::{HandshakeKey, Opener, Role, Sealer},
    ed25519, hkdf,
    srp::{SrpServer, SrpSession, SALT_LEN, SRP_USERNAME},
    tlv::{Method, Tlv8, TlvError, TlvType},
};
use rand::{rngs::OsRng, RngCore};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// A decoded pair-setup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairSetupRequest {
    /// M1: `State=1`, optional `Method`.
    Start { method: Option<u8> },
    /// M3: SRP public key `A` and proof `M1`.
    VerifyRequest { public_key: Vec<u8>, proof: Vec<u8> },
    /// M5: controller identity sealed with `PS-Msg05`.
    ExchangeRequest { encrypted_data: Vec<u8> },
}

impl PairSetupRequest {
    /// Decode the request by its `State` item.
    pub fn parse(tlv: &Tlv8) -> std::result::Result<Self, PairingError> {
        let state = tlv
            .state()
            .ok_or(PairingError::MissingTlv(TlvType::State as u8))?;

        match state {
            0x01 => Ok(Self::Start {
                method: tlv.method(),
            }),
            0x03 => Ok(Self::VerifyRequest {
                public_key: tlv.require(TlvType::PublicKey)?.to_vec(),
                proof: tlv.require(TlvType::Proof)?.to_vec(),
            }),
            0x05 => Ok(Self::ExchangeRequest {
                encrypted_data: tlv.require(TlvType::EncryptedData)?.to_vec(),
            }),
            other => Err(PairingError::UnknownState(other)),
        }
    }

    /// Wire `State` of the request.
    pub fn state(&self) -> u8 {
        match self {
            Self::Start { .. } => 0x01,
            Self::VerifyRequest { .. } => 0x03,
            Self::ExchangeRequest { .. } => 0x05,
        }
    }
}

/// Pair-setup exchange waiting for its next request.
pub enum PairSetup {
    AwaitingM1,
    /// M2 sent; holds the SRP verifier for this attempt.
    AwaitingM3(SrpServer),
    /// M4 sent; holds the keys for the M5/M6 identity exchange.
    AwaitingM5(SetupKeys),
}

/// Keys agreed after the SRP proofs matched.
pub struct SetupKeys {
    srp: SrpSession,
    opener: Opener,
    sealer: Sealer,
}

/// What a pair-setup request led to.
pub enum SetupTransition {
    /// Reply sent; the exchange waits for the next request.
    Continue(PairSetup, Vec<u8>),
    /// M6 sent and the controller committed as an admin pairing.
    Paired { response: Vec<u8>, controller: String },
    /// The exchange ended with an error TLV.
    Rejected(Rejection),
}

/// Everything a pair-setup step reads besides its own state.
pub struct SetupContext<'a, S: ?Sized> {
    pub store: &'a S,
    pub config: &'a PairingConfig,
    /// Failed SRP proofs since the accessory started.
    pub failed_attempts: &'a AtomicU32,
}

impl PairSetup {
    /// `State` the exchange expects next.
    pub fn expected_state(&self) -> u8 {
        match self {
            Self::AwaitingM1 => 0x01,
            Self::AwaitingM3(_) => 0x03,
            Self::AwaitingM5(_) => 0x05,
        }
    }

    /// Run one step of the exchange.
    ///
    /// `Start` is accepted in any state and begins a new attempt. Any other
    /// out-of-order request fails with `StateMismatch`, discarding the state.
    pub fn handle<S>(
        self,
        request: PairSetupRequest,
        ctx: &SetupContext<'_, S>,
    ) -> Result<SetupTransition>
    where
        S: IdentityStore + ?Sized,
    {
        match (self, request) {
            (_, PairSetupRequest::Start { method }) => start(method, ctx),
            (Self::AwaitingM3(srp), PairSetupRequest::VerifyRequest { public_key, proof }) => {
                verify(srp, &public_key, &proof, ctx)
            }
            (Self::AwaitingM5(keys), PairSetupRequest::ExchangeRequest { encrypted_data }) => {
                exchange(keys, &encrypted_data, ctx)
            }
            (state, request) => Err(PairingError::StateMismatch {
                expected: state.expected_state(),
                actual: request.state(),
            }
            .into()),
        }
    }
}

/// M1 -> M2: salt and SRP public key `B`.
fn start<S>(method: Option<u8>, ctx: &SetupContext<'_, S>) -> Result<SetupTransition>
where
    S: IdentityStore + ?Sized,
{
    if let Some(method) = method {
        if method != Method::PairSetup as u8 {
            return Err(PairingError::UnsupportedMethod(method).into());
        }
    }

    if ctx.config.reject_setup_when_paired && ctx.store.is_paired()? {
        return Ok(SetupTransition::Rejected(Rejection::new(
            0x02,
            TlvError::Unavailable,
            "accessory is already paired",
        )));
    }

    if ctx.failed_attempts.load(Ordering::SeqCst) >= ctx.config.max_setup_attempts {
        return Ok(SetupTransition::Rejected(Rejection::new(
            0x02,
            TlvError::MaxTries,
            "too many failed setup attempts",
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let srp = SrpServer::new(SRP_USERNAME, ctx.config.setup_code.as_bytes(), salt);

    let mut tlv = Tlv8::with_state(0x02);
    tlv.set(TlvType::Salt, salt.to_vec());
    tlv.set(TlvType::PublicKey, srp.public_key());

    debug!("Pair-setup M2: sent salt and SRP public key");
    Ok(SetupTransition::Continue(
        PairSetup::AwaitingM3(srp),
        tlv.encode(),
    ))
}

/// M3 -> M4: check the controller's proof, answer with `HAMK`.
fn verify<S>(
    srp: SrpServer,
    client_public: &[u8],
    client_proof: &[u8],
    ctx: &SetupContext<'_, S>,
) -> Result<SetupTransition>
where
    S: IdentityStore + ?Sized,
{
    let session = match srp.verify_client(client_public, client_proof) {
        Ok(session) => session,
        Err(e) => {
            let failures = ctx.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("Pair-setup M3 rejected ({}), {} failed attempts", e, failures);
            let reason = match e {
                CryptoError::ProofMismatch => "setup code mismatch",
                _ => "invalid SRP public key",
            };
            return Ok(SetupTransition::Rejected(Rejection::new(
                0x04,
                TlvError::Authentication,
                reason,
            )));
        }
    };

    let (sealer, opener) = HandshakeKey::pair_setup(session.session_key())?.split(Role::Accessory);

    let mut tlv = Tlv8::with_state(0x04);
    tlv.set(TlvType::Proof, session.server_proof().to_vec());

    debug!("Pair-setup M4: SRP proof verified");
    Ok(SetupTransition::Continue(
        PairSetup::AwaitingM5(SetupKeys {
            srp: session,
            opener,
            sealer,
        }),
        tlv.encode(),
    ))
}

/// M5 -> M6: verify the controller's identity, sign ours, commit the pairing.
fn exchange<S>(
    keys: SetupKeys,
    encrypted_data: &[u8],
    ctx: &SetupContext<'_, S>,
) -> Result<SetupTransition>
where
    S: IdentityStore + ?Sized,
{
    let SetupKeys {
        srp,
        opener,
        sealer,
    } = keys;
    let reject = |code: TlvError, reason: &'static str| {
        Ok(SetupTransition::Rejected(Rejection::new(0x06, code, reason)))
    };

    let plaintext = match opener.open(encrypted_data) {
        Ok(plaintext) => Zeroizing::new(plaintext),
        Err(_) => return reject(TlvError::Authentication, "M5 failed to decrypt"),
    };

    let Ok((username, controller_ltpk, signature)) = controller_identity(&plaintext) else {
        return reject(TlvError::Unknown, "M5 sub-TLV is malformed");
    };

    let controller_x = hkdf::derive_controller_sign_key(srp.session_key())?;
    let mut transcript = Vec::with_capacity(32 + username.len() + 32);
    transcript.extend_from_slice(&controller_x);
    transcript.extend_from_slice(username.as_bytes());
    transcript.extend_from_slice(&controller_ltpk);

    if ed25519::verify(&controller_ltpk, &transcript, &signature).is_err() {
        return reject(TlvError::Authentication, "controller signature invalid");
    }

    let accessory = ctx.store.accessory();
    let accessory_x = hkdf::derive_accessory_sign_key(srp.session_key())?;
    let accessory_ltpk = accessory.public_key();

    let mut transcript = Vec::with_capacity(32 + accessory.mac_id().len() + 32);
    transcript.extend_from_slice(&accessory_x);
    transcript.extend_from_slice(accessory.mac_id().as_bytes());
    transcript.extend_from_slice(&accessory_ltpk);
    let accessory_signature = accessory.sign(&transcript);

    let mut sub_tlv = Tlv8::new();
    sub_tlv.set(TlvType::Identifier, accessory.mac_id().as_bytes().to_vec());
    sub_tlv.set(TlvType::PublicKey, accessory_ltpk.to_vec());
    sub_tlv.set(TlvType::Signature, accessory_signature.to_vec());
    let sealed = sealer.seal(&sub_tlv.encode())?;

    let record = PairingRecord::new(username.clone(), controller_ltpk, Permissions::Admin);
    if let Err(e) = ctx.store.commit_pairing(record) {
        warn!("Pair-setup M6: store refused pairing for {}: {}", username, e);
        let (code, reason) = match e {
            StoreError::Full => (TlvError::MaxPeers, "pairing store is full"),
            StoreError::Declined => (TlvError::Authentication, "pairing declined"),
            StoreError::Backend(_) => (TlvError::Unknown, "pairing store failure"),
        };
        return reject(code, reason);
    }

    let mut tlv = Tlv8::with_state(0x06);
    tlv.set(TlvType::EncryptedData, sealed);

    Ok(SetupTransition::Paired {
        response: tlv.encode(),
        controller: username,
    })
}

/// Identifier, LTPK and signature from the decrypted M5 sub-TLV.
fn controller_identity(
    plaintext: &[u8],
) -> std::result::Result<(String, [u8; 32], [u8; 64]), PairingError> {
    let tlv = Tlv8::parse(plaintext).map_err(|e| PairingError::TlvParse(e.to_string()))?;

    let username = String::from_utf8(tlv.require(TlvType::Identifier)?.to_vec())
        .map_err(|_| PairingError::TlvParse("identifier is not UTF-8".to_string()))?;
    let public_key = tlv.require_array::<32>(TlvType::PublicKey)?;
    let signature = tlv.require_array::<64>(TlvType::Signature)?;

    Ok((username, public_key, signature))
}
