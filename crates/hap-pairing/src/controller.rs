//! Controller side of the pairing exchanges.
//!
//! [`ControllerIdentity`] holds the controller's long-term Ed25519 key and
//! the stable identifier it pairs under. [`SetupClient`] and
//! [`VerifyClient`] drive pair-setup and pair-verify against an accessory,
//! checking every accessory signature along the way.

use crate::store::{PairingRecord, Permissions};
use hap_core::error::{Error, PairingError, Result};
use hap_crypto::{
    chacha::{HandshakeKey, Opener, Role, Sealer, SessionCipher},
    curve25519::EcdhKeyPair,
    ed25519::{self, IdentityKeyPair},
    hkdf,
    keys::{SessionKeys, SharedSecret},
    srp::{SrpChallenge, SrpClient, SrpProof, SRP_USERNAME},
    tlv::{Tlv8, TlvType},
};
use zeroize::Zeroizing;

/// Controller identity for pairing.
///
/// The same identifier must be used in pair-setup M5 and in every
/// pair-verify M3, or the accessory will not find the pairing.
#[derive(Clone)]
pub struct ControllerIdentity {
    /// Stable identifier (e.g., "12345678-ABCD-1234-ABCD-123456789ABC")
    id: String,
    keypair: IdentityKeyPair,
}

impl ControllerIdentity {
    /// Generate a new identity with an identifier derived from the public key.
    pub fn generate() -> Self {
        Self::from_keypair(IdentityKeyPair::generate())
    }

    /// Create from an existing keypair with a UUID-formatted identifier taken
    /// from the first 16 bytes of the public key.
    pub fn from_keypair(keypair: IdentityKeyPair) -> Self {
        let pk = keypair.public_key();
        let id = format!(
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            pk[0], pk[1], pk[2], pk[3],
            pk[4], pk[5],
            pk[6], pk[7],
            pk[8], pk[9],
            pk[10], pk[11], pk[12], pk[13], pk[14], pk[15]
        );
        Self { id, keypair }
    }

    /// Create from an existing keypair with a custom identifier.
    pub fn with_id(keypair: IdentityKeyPair, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keypair,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Controller LTPK.
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }
}

/// What pair-setup M6 told the controller about the accessory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedAccessory {
    pub mac_id: String,
    pub public_key: [u8; 32],
}

/// Controller driver for pair-setup.
///
/// Call [`start`](Self::start), then feed each accessory reply to the next
/// `handle_*` method.
pub struct SetupClient {
    srp: SrpClient,
    proof: Option<SrpProof>,
    srp_key: Option<Zeroizing<Vec<u8>>>,
    sealer: Option<Sealer>,
    opener: Option<Opener>,
}

impl SetupClient {
    pub fn new(setup_code: &str) -> Self {
        Self {
            srp: SrpClient::new(SRP_USERNAME, setup_code.as_bytes()),
            proof: None,
            srp_key: None,
            sealer: None,
            opener: None,
        }
    }

    /// M1 request.
    pub fn start(&self) -> Vec<u8> {
        Tlv8::pair_setup_m1().encode()
    }

    /// Process M2, returning the M3 request with `A` and the client proof.
    pub fn handle_m2(&mut self, response: &[u8]) -> Result<Vec<u8>> {
        let tlv = expect_reply(response, 0x02)?;
        let salt = tlv.require_array::<16>(TlvType::Salt)?;
        let server_public_key = tlv.require(TlvType::PublicKey)?.to_vec();

        let proof = self.srp.process_challenge(&SrpChallenge {
            salt,
            server_public_key,
        })?;

        let mut m3 = Tlv8::with_state(0x03);
        m3.set(TlvType::PublicKey, self.srp.public_key());
        m3.set(TlvType::Proof, proof.client_proof.clone());

        self.proof = Some(proof);
        Ok(m3.encode())
    }

    /// Process M4 and check the accessory's proof.
    pub fn handle_m4(&mut self, response: &[u8]) -> Result<()> {
        let tlv = expect_reply(response, 0x04)?;
        let server_proof = tlv.require(TlvType::Proof)?;

        let proof = self.proof.take().ok_or_else(|| {
            PairingError::InvalidState("M4 can only be processed after M2".to_string())
        })?;

        if !self
            .srp
            .verify_server_proof(server_proof, &proof.expected_server_proof)
        {
            return Err(PairingError::SrpVerificationFailed.into());
        }

        let (sealer, opener) = HandshakeKey::pair_setup(&proof.shared_secret)?.split(Role::Controller);
        self.srp_key = Some(Zeroizing::new(proof.shared_secret.clone()));
        self.sealer = Some(sealer);
        self.opener = Some(opener);
        Ok(())
    }

    /// M5 request carrying the controller's identifier, LTPK and signature.
    pub fn exchange(&mut self, controller: &ControllerIdentity) -> Result<Vec<u8>> {
        self.seal_identity(controller, &controller.public_key())
    }

    /// M5 signed by `signer` but presenting `claimed_ltpk`.
    #[cfg(test)]
    pub(crate) fn exchange_claiming(
        &mut self,
        signer: &ControllerIdentity,
        claimed_ltpk: &[u8; 32],
    ) -> Result<Vec<u8>> {
        self.seal_identity(signer, claimed_ltpk)
    }

    fn seal_identity(
        &mut self,
        controller: &ControllerIdentity,
        ltpk: &[u8; 32],
    ) -> Result<Vec<u8>> {
        let (Some(srp_key), Some(sealer)) = (self.srp_key.as_ref(), self.sealer.take()) else {
            return Err(PairingError::InvalidState(
                "M5 can only be generated after processing M4".to_string(),
            )
            .into());
        };

        let controller_x = hkdf::derive_controller_sign_key(srp_key)?;
        let mut transcript = Vec::new();
        transcript.extend_from_slice(&controller_x);
        transcript.extend_from_slice(controller.id().as_bytes());
        transcript.extend_from_slice(ltpk);

        let mut sub_tlv = Tlv8::new();
        sub_tlv.set(TlvType::Identifier, controller.id().as_bytes().to_vec());
        sub_tlv.set(TlvType::PublicKey, ltpk.to_vec());
        sub_tlv.set(TlvType::Signature, controller.sign(&transcript).to_vec());

        let mut m5 = Tlv8::with_state(0x05);
        m5.set(TlvType::EncryptedData, sealer.seal(&sub_tlv.encode())?);
        Ok(m5.encode())
    }

    /// Process M6: decrypt and verify the accessory's identity.
    pub fn handle_m6(&mut self, response: &[u8]) -> Result<PairedAccessory> {
        let tlv = expect_reply(response, 0x06)?;
        let encrypted = tlv.require(TlvType::EncryptedData)?;

        let (Some(srp_key), Some(opener)) = (self.srp_key.take(), self.opener.take()) else {
            return Err(PairingError::InvalidState(
                "M6 can only be processed after M5".to_string(),
            )
            .into());
        };

        let plaintext = Zeroizing::new(opener.open(encrypted)?);
        let sub_tlv = Tlv8::parse(&plaintext)?;
        let mac_id = String::from_utf8(sub_tlv.require(TlvType::Identifier)?.to_vec())
            .map_err(|_| PairingError::TlvParse("accessory identifier is not UTF-8".to_string()))?;
        let public_key = sub_tlv.require_array::<32>(TlvType::PublicKey)?;
        let signature = sub_tlv.require_array::<64>(TlvType::Signature)?;

        let accessory_x = hkdf::derive_accessory_sign_key(&srp_key)?;
        let mut transcript = Vec::new();
        transcript.extend_from_slice(&accessory_x);
        transcript.extend_from_slice(mac_id.as_bytes());
        transcript.extend_from_slice(&public_key);

        ed25519::verify(&public_key, &transcript, &signature)
            .map_err(|_| PairingError::SignatureInvalid)?;

        Ok(PairedAccessory { mac_id, public_key })
    }
}

/// Controller driver for pair-verify against a known accessory LTPK.
pub struct VerifyClient {
    accessory_ltpk: [u8; 32],
    ephemeral: Option<EcdhKeyPair>,
    client_public: [u8; 32],
    server_public: [u8; 32],
    shared_secret: Option<SharedSecret>,
    sealer: Option<Sealer>,
}

impl VerifyClient {
    pub fn new(accessory_ltpk: [u8; 32]) -> Self {
        let ephemeral = EcdhKeyPair::generate();
        Self {
            accessory_ltpk,
            client_public: ephemeral.public_key(),
            ephemeral: Some(ephemeral),
            server_public: [0u8; 32],
            shared_secret: None,
            sealer: None,
        }
    }

    /// M1 request with the controller's ephemeral key.
    pub fn start(&self) -> Vec<u8> {
        Tlv8::pair_verify_m1(&self.client_public).encode()
    }

    /// Process M2 and check the accessory's signature.
    pub fn handle_m2(&mut self, response: &[u8]) -> Result<()> {
        let tlv = expect_reply(response, 0x02)?;
        let server_public = tlv.require_array::<32>(TlvType::PublicKey)?;
        let encrypted = tlv.require(TlvType::EncryptedData)?;

        let ephemeral = self.ephemeral.take().ok_or_else(|| {
            PairingError::InvalidState("M2 can only be processed once".to_string())
        })?;
        let shared_secret = ephemeral.diffie_hellman(&server_public)?;
        let (sealer, opener) = HandshakeKey::pair_verify(&shared_secret)?.split(Role::Controller);

        let plaintext = Zeroizing::new(opener.open(encrypted)?);
        let sub_tlv = Tlv8::parse(&plaintext)?;
        let accessory_id = sub_tlv.require(TlvType::Identifier)?;
        let signature = sub_tlv.require_array::<64>(TlvType::Signature)?;

        let mut transcript = Vec::new();
        transcript.extend_from_slice(&server_public);
        transcript.extend_from_slice(accessory_id);
        transcript.extend_from_slice(&self.client_public);

        ed25519::verify(&self.accessory_ltpk, &transcript, &signature)
            .map_err(|_| PairingError::SignatureInvalid)?;

        self.server_public = server_public;
        self.shared_secret = Some(shared_secret);
        self.sealer = Some(sealer);
        Ok(())
    }

    /// M3 request proving the controller's identity.
    pub fn finish(&mut self, controller: &ControllerIdentity) -> Result<Vec<u8>> {
        self.sign_and_seal(controller, |_| {})
    }

    /// M3 with the signed transcript altered by `tamper` before signing.
    #[cfg(test)]
    pub(crate) fn finish_with_transcript(
        &mut self,
        controller: &ControllerIdentity,
        tamper: impl FnOnce(&mut [u8]),
    ) -> Result<Vec<u8>> {
        self.sign_and_seal(controller, tamper)
    }

    fn sign_and_seal(
        &mut self,
        controller: &ControllerIdentity,
        tamper: impl FnOnce(&mut [u8]),
    ) -> Result<Vec<u8>> {
        let sealer = self.sealer.take().ok_or_else(|| {
            PairingError::InvalidState("M3 can only be generated after processing M2".to_string())
        })?;

        let mut transcript = Vec::new();
        transcript.extend_from_slice(&self.client_public);
        transcript.extend_from_slice(controller.id().as_bytes());
        transcript.extend_from_slice(&self.server_public);
        tamper(&mut transcript);

        let mut sub_tlv = Tlv8::new();
        sub_tlv.set(TlvType::Identifier, controller.id().as_bytes().to_vec());
        sub_tlv.set(TlvType::Signature, controller.sign(&transcript).to_vec());

        let mut m3 = Tlv8::with_state(0x03);
        m3.set(TlvType::EncryptedData, sealer.seal(&sub_tlv.encode())?);
        Ok(m3.encode())
    }

    /// Process M4, returning the controller end of the session channel.
    pub fn handle_m4(&mut self, response: &[u8]) -> Result<SessionCipher> {
        expect_reply(response, 0x04)?;

        let shared_secret = self.shared_secret.take().ok_or_else(|| {
            PairingError::InvalidState("M4 can only be processed after M3".to_string())
        })?;
        let keys = SessionKeys::derive_control_keys(&shared_secret)?;
        Ok(SessionCipher::controller(&keys))
    }
}

/// Decode a list-pairings response into its records.
pub fn parse_pairing_list(response: &[u8]) -> Result<Vec<PairingRecord>> {
    let tlv = expect_reply(response, 0x02)?;

    tlv.split_records()
        .into_iter()
        .filter(|record| record.iter().any(|(typ, _)| typ != TlvType::State as u8))
        .map(|record| {
            let username = String::from_utf8(record.require(TlvType::Identifier)?.to_vec())
                .map_err(|_| PairingError::TlvParse("identifier is not UTF-8".to_string()))?;
            let public_key = record.require_array::<32>(TlvType::PublicKey)?;
            let permissions = record
                .require(TlvType::Permissions)?
                .first()
                .copied()
                .and_then(Permissions::from_byte)
                .ok_or_else(|| PairingError::TlvParse("invalid permissions".to_string()))?;
            Ok(PairingRecord::new(username, public_key, permissions))
        })
        .collect()
}

/// Parse an accessory reply, surfacing its `Error` item and checking `State`.
fn expect_reply(response: &[u8], expected: u8) -> Result<Tlv8> {
    let tlv = Tlv8::parse(response)?;
    let state = tlv
        .state()
        .ok_or(PairingError::MissingTlv(TlvType::State as u8))?;

    if let Some(code) = tlv.error() {
        return Err(Error::Pairing(PairingError::Rejected {
            state,
            code,
            retry_delay: tlv.retry_delay(),
            description: tlv.error_description().unwrap_or_default(),
        }));
    }
    if state != expected {
        return Err(PairingError::StateMismatch {
            expected,
            actual: state,
        }
        .into());
    }
    Ok(tlv)
}
