//! ChaCha20-Poly1305 AEAD for the pairing handshakes and the session channel.
//!
//! Handshake messages are sealed under a key derived once per exchange and a
//! fixed per-step nonce. [`HandshakeKey::split`] turns that key into one
//! [`Sealer`] and one [`Opener`] for the given [`Role`], each consumed by its
//! single use. The role picks both nonces, so the two halves never share one.
//!
//! After pair-verify, [`SessionCipher`] frames transport traffic as
//! `[u16_le len][ciphertext][16-byte tag]` with a per-direction counter nonce.
//! A frame that fails to decrypt ends the session.

use crate::hkdf;
use crate::keys::{SessionKeys, SharedSecret};
use hap_core::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Largest plaintext carried by one session frame.
pub const MAX_FRAME_LEN: usize = 0x400;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Fixed nonces of the handshake messages that carry encrypted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepNonce {
    /// Controller identity, pair-setup M5.
    PsMsg05,
    /// Accessory identity, pair-setup M6.
    PsMsg06,
    /// Accessory proof, pair-verify M2.
    PvMsg02,
    /// Controller proof, pair-verify M3.
    PvMsg03,
}

impl StepNonce {
    /// ASCII label of the nonce.
    pub fn label(self) -> &'static [u8] {
        match self {
            Self::PsMsg05 => b"PS-Msg05",
            Self::PsMsg06 => b"PS-Msg06",
            Self::PvMsg02 => b"PV-Msg02",
            Self::PvMsg03 => b"PV-Msg03",
        }
    }

    /// The 12-byte nonce.
    pub fn bytes(self) -> [u8; 12] {
        nonce_from_string(self.label())
    }
}

/// Which end of a handshake holds the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Accessory,
    Controller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    PairSetup,
    PairVerify,
}

/// Key protecting the encrypted TLVs of one handshake exchange.
#[derive(ZeroizeOnDrop)]
pub struct HandshakeKey {
    key: [u8; 32],
    #[zeroize(skip)]
    exchange: Exchange,
}

impl HandshakeKey {
    /// Derive the pair-setup key from the SRP session key.
    pub fn pair_setup(srp_session_key: &[u8]) -> Result<Self, CryptoError> {
        let key = hkdf::derive_pair_setup_key(srp_session_key)?;
        Ok(Self {
            key,
            exchange: Exchange::PairSetup,
        })
    }

    /// Derive the pair-verify key from the X25519 shared secret.
    pub fn pair_verify(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let key = hkdf::derive_pair_verify_key(shared_secret.as_bytes())?;
        Ok(Self {
            key,
            exchange: Exchange::PairVerify,
        })
    }

    /// Nonces `role` seals and opens with, in that order.
    fn step_nonces(&self, role: Role) -> (StepNonce, StepNonce) {
        match (self.exchange, role) {
            (Exchange::PairSetup, Role::Accessory) => (StepNonce::PsMsg06, StepNonce::PsMsg05),
            (Exchange::PairSetup, Role::Controller) => (StepNonce::PsMsg05, StepNonce::PsMsg06),
            (Exchange::PairVerify, Role::Accessory) => (StepNonce::PvMsg02, StepNonce::PvMsg03),
            (Exchange::PairVerify, Role::Controller) => (StepNonce::PvMsg03, StepNonce::PvMsg02),
        }
    }

    /// Split into the sealer and opener `role` uses in this exchange.
    pub fn split(self, role: Role) -> (Sealer, Opener) {
        let (seal, open) = self.step_nonces(role);
        (
            Sealer {
                key: self.key,
                nonce: seal,
            },
            Opener {
                key: self.key,
                nonce: open,
            },
        )
    }
}

/// Encrypts exactly one handshake message.
#[derive(ZeroizeOnDrop)]
pub struct Sealer {
    key: [u8; 32],
    #[zeroize(skip)]
    nonce: StepNonce,
}

impl Sealer {
    pub fn nonce(&self) -> StepNonce {
        self.nonce
    }

    /// Encrypt `plaintext`, returning ciphertext with the tag appended.
    pub fn seal(self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        encrypt_with_nonce(&self.key, &self.nonce.bytes(), plaintext)
    }
}

/// Decrypts exactly one handshake message.
#[derive(ZeroizeOnDrop)]
pub struct Opener {
    key: [u8; 32],
    #[zeroize(skip)]
    nonce: StepNonce,
}

impl Opener {
    pub fn nonce(&self) -> StepNonce {
        self.nonce
    }

    /// Decrypt and authenticate `ciphertext` (tag appended).
    ///
    /// Returns `AuthTagMismatch` and no plaintext if the tag does not verify.
    pub fn open(self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        decrypt_with_nonce(&self.key, &self.nonce.bytes(), ciphertext)
    }
}

/// Session channel cipher with per-direction counter nonces.
///
/// Incoming bytes may end mid-frame; the remainder is buffered until the
/// next call to [`SessionCipher::decrypt`].
///
/// A decrypt error is terminal: buffered input is discarded and every later
/// call fails with [`CryptoError::SessionFailed`]. The transport must close
/// the connection.
#[derive(ZeroizeOnDrop)]
pub struct SessionCipher {
    encrypt_key: [u8; 32],
    decrypt_key: [u8; 32],
    #[zeroize(skip)]
    encrypt_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    decrypt_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    encrypt_counter: u64,
    #[zeroize(skip)]
    decrypt_counter: u64,
    pending: Vec<u8>,
    #[zeroize(skip)]
    failed: bool,
}

impl SessionCipher {
    /// Create cipher with separate outgoing/incoming keys.
    pub fn new(encrypt_key: [u8; 32], decrypt_key: [u8; 32]) -> Self {
        let encrypt_cipher = ChaCha20Poly1305::new(&encrypt_key.into());
        let decrypt_cipher = ChaCha20Poly1305::new(&decrypt_key.into());
        Self {
            encrypt_key,
            decrypt_key,
            encrypt_cipher,
            decrypt_cipher,
            encrypt_counter: 0,
            decrypt_counter: 0,
            pending: Vec::new(),
            failed: false,
        }
    }

    /// Accessory end: sends with the read key, receives with the write key.
    pub fn accessory(keys: &SessionKeys) -> Self {
        Self::new(*keys.read_key.as_bytes(), *keys.write_key.as_bytes())
    }

    /// Controller end: sends with the write key, receives with the read key.
    pub fn controller(keys: &SessionKeys) -> Self {
        Self::new(*keys.write_key.as_bytes(), *keys.read_key.as_bytes())
    }

    /// Encrypt plaintext into one or more frames.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.failed {
            return Err(CryptoError::SessionFailed);
        }
        if plaintext.is_empty() {
            return Err(CryptoError::Encryption("Empty plaintext".to_string()));
        }

        let frames = plaintext.len().div_ceil(MAX_FRAME_LEN);
        let mut out = Vec::with_capacity(plaintext.len() + frames * (2 + TAG_LEN));
        for block in plaintext.chunks(MAX_FRAME_LEN) {
            let aad = (block.len() as u16).to_le_bytes();
            let nonce = build_nonce_from_counter(self.encrypt_counter);
            let payload = Payload { msg: block, aad: &aad };

            let ciphertext_with_tag = self
                .encrypt_cipher
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;

            out.extend_from_slice(&aad);
            out.extend_from_slice(&ciphertext_with_tag);
            self.encrypt_counter += 1;
        }

        Ok(out)
    }

    /// Decrypt every complete frame in the buffered input plus `data`.
    ///
    /// Returns an empty vector when no frame is complete yet. On error the
    /// cipher is spent and plaintext of earlier frames in the same input is
    /// discarded.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.failed {
            return Err(CryptoError::SessionFailed);
        }
        match self.decrypt_frames(data) {
            Ok(out) => Ok(out),
            Err(e) => {
                self.failed = true;
                self.pending.zeroize();
                Err(e)
            }
        }
    }

    fn decrypt_frames(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pending.extend_from_slice(data);

        let mut out = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= 2 {
            let block_len =
                u16::from_le_bytes([self.pending[offset], self.pending[offset + 1]]) as usize;
            if block_len > MAX_FRAME_LEN {
                return Err(CryptoError::Decryption(format!(
                    "Frame length {} exceeds {}",
                    block_len, MAX_FRAME_LEN
                )));
            }

            let block_end = offset + 2 + block_len + TAG_LEN;
            if block_end > self.pending.len() {
                break;
            }

            let aad = (block_len as u16).to_le_bytes();
            let nonce = build_nonce_from_counter(self.decrypt_counter);
            let payload = Payload {
                msg: &self.pending[offset + 2..block_end],
                aad: &aad,
            };
            let plaintext = self
                .decrypt_cipher
                .decrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|_| CryptoError::AuthTagMismatch)?;

            out.extend_from_slice(&plaintext);
            self.decrypt_counter += 1;
            offset = block_end;
        }

        self.pending.drain(..offset);
        Ok(out)
    }

    /// Whether a decrypt error has ended the session.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Bytes of an incomplete frame waiting for more input.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Get current encryption nonce counter.
    pub fn encrypt_counter(&self) -> u64 {
        self.encrypt_counter
    }

    /// Get current decryption nonce counter.
    pub fn decrypt_counter(&self) -> u64 {
        self.decrypt_counter
    }
}

/// Build 12-byte nonce from counter.
fn build_nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))
}

fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption(
            "Ciphertext too short (missing tag)".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Create a 12-byte nonce from a label (right-aligned, left-padded with zeros).
///
/// `PV-Msg02` becomes `\x00\x00\x00\x00PV-Msg02`.
fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    nonce[12 - len..].copy_from_slice(&s[..len]);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> SessionKeys {
        SessionKeys::derive_control_keys(&SharedSecret::new(vec![0x5Au8; 32])).unwrap()
    }

    mod step_nonce {
        use super::*;

        #[test]
        fn labels_are_right_aligned() {
            assert_eq!(&StepNonce::PvMsg02.bytes(), b"\x00\x00\x00\x00PV-Msg02");
            assert_eq!(&StepNonce::PsMsg05.bytes(), b"\x00\x00\x00\x00PS-Msg05");
        }

        #[test]
        fn every_step_has_a_distinct_nonce() {
            let all = [
                StepNonce::PsMsg05,
                StepNonce::PsMsg06,
                StepNonce::PvMsg02,
                StepNonce::PvMsg03,
            ];
            for (i, a) in all.iter().enumerate() {
                for b in &all[i + 1..] {
                    assert_ne!(a.bytes(), b.bytes());
                }
            }
        }
    }

    mod handshake {
        use super::*;

        fn setup_key() -> HandshakeKey {
            HandshakeKey {
                key: [0x42u8; 32],
                exchange: Exchange::PairSetup,
            }
        }

        fn verify_key() -> HandshakeKey {
            HandshakeKey {
                key: [0x42u8; 32],
                exchange: Exchange::PairVerify,
            }
        }

        #[test]
        fn seal_matches_known_vector() {
            let (sealer, _) = setup_key().split(Role::Controller);
            assert_eq!(sealer.nonce(), StepNonce::PsMsg05);
            let ciphertext = sealer.seal(b"hello").unwrap();
            assert_eq!(
                hex::encode(ciphertext),
                "70ac373c13360f56624449b82bed5c9360e320760b"
            );
        }

        #[test]
        fn opener_reads_peer_sealer() {
            let (controller_sealer, _) = setup_key().split(Role::Controller);
            let (_, accessory_opener) = setup_key().split(Role::Accessory);

            let ciphertext = controller_sealer.seal(b"identity").unwrap();
            assert_eq!(accessory_opener.open(&ciphertext).unwrap(), b"identity");
        }

        #[test]
        fn halves_never_share_a_nonce() {
            for key in [setup_key, verify_key] {
                for role in [Role::Accessory, Role::Controller] {
                    let (sealer, opener) = key().split(role);
                    assert_ne!(sealer.nonce(), opener.nonce());
                }
                let (accessory_sealer, accessory_opener) = key().split(Role::Accessory);
                let (controller_sealer, controller_opener) = key().split(Role::Controller);
                assert_eq!(accessory_sealer.nonce(), controller_opener.nonce());
                assert_eq!(controller_sealer.nonce(), accessory_opener.nonce());
            }
        }

        #[test]
        fn single_bit_tag_flip_fails() {
            let (sealer, _) = verify_key().split(Role::Controller);
            let (_, opener) = verify_key().split(Role::Accessory);
            let mut ciphertext = sealer.seal(b"proof").unwrap();
            let last = ciphertext.len() - 1;
            ciphertext[last] ^= 0x01;

            assert!(matches!(
                opener.open(&ciphertext),
                Err(CryptoError::AuthTagMismatch)
            ));
        }

        #[test]
        fn own_sealer_cannot_be_opened_locally() {
            let (sealer, _) = verify_key().split(Role::Accessory);
            let (_, opener) = verify_key().split(Role::Accessory);
            let ciphertext = sealer.seal(b"proof").unwrap();
            assert!(opener.open(&ciphertext).is_err());
        }

        #[test]
        fn short_ciphertext_is_rejected() {
            let (_, opener) = setup_key().split(Role::Accessory);
            assert!(matches!(
                opener.open(&[0u8; 8]),
                Err(CryptoError::Decryption(_))
            ));
        }

        #[test]
        fn pair_setup_and_verify_keys_differ() {
            let secret = SharedSecret::new(vec![0x11u8; 64]);
            let setup = HandshakeKey::pair_setup(secret.as_bytes()).unwrap();
            let verify = HandshakeKey::pair_verify(&secret).unwrap();
            assert_ne!(setup.key, verify.key);
        }
    }

    mod session_cipher {
        use super::*;

        #[test]
        fn first_frame_matches_known_vector() {
            let mut cipher = SessionCipher::new([0x42u8; 32], [0u8; 32]);
            let frame = cipher.encrypt(b"GET /accessories").unwrap();
            assert_eq!(&frame[..2], &[0x10, 0x00]);
            assert_eq!(
                hex::encode(&frame[2..]),
                "1e23b00b32d550ae89d2275b8d46cdcb63a9eb158a750e7539a83eb097b14af9"
            );
        }

        #[test]
        fn accessory_and_controller_interoperate() {
            let keys = test_keys();
            let mut accessory = SessionCipher::accessory(&keys);
            let mut controller = SessionCipher::controller(&keys);

            let request = controller.encrypt(b"GET /accessories HTTP/1.1\r\n\r\n").unwrap();
            assert_eq!(
                accessory.decrypt(&request).unwrap(),
                b"GET /accessories HTTP/1.1\r\n\r\n"
            );

            let response = accessory.encrypt(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
            assert_eq!(controller.decrypt(&response).unwrap(), b"HTTP/1.1 200 OK\r\n\r\n");
        }

        #[test]
        fn directions_use_different_keys() {
            let keys = test_keys();
            let mut accessory = SessionCipher::accessory(&keys);
            let mut other_accessory = SessionCipher::accessory(&keys);

            let frame = accessory.encrypt(b"event").unwrap();
            assert!(other_accessory.decrypt(&frame).is_err());
        }

        #[test]
        fn long_plaintext_splits_into_frames() {
            let keys = test_keys();
            let mut controller = SessionCipher::controller(&keys);
            let mut accessory = SessionCipher::accessory(&keys);

            let body = vec![0xA5u8; MAX_FRAME_LEN * 2 + 10];
            let framed = controller.encrypt(&body).unwrap();
            assert_eq!(controller.encrypt_counter(), 3);
            assert_eq!(framed.len(), body.len() + 3 * (2 + TAG_LEN));

            assert_eq!(accessory.decrypt(&framed).unwrap(), body);
            assert_eq!(accessory.decrypt_counter(), 3);
        }

        #[test]
        fn partial_frames_are_buffered() {
            let keys = test_keys();
            let mut controller = SessionCipher::controller(&keys);
            let mut accessory = SessionCipher::accessory(&keys);

            let framed = controller.encrypt(b"split across reads").unwrap();
            let (head, tail) = framed.split_at(7);

            assert!(accessory.decrypt(head).unwrap().is_empty());
            assert_eq!(accessory.pending_len(), 7);
            assert_eq!(accessory.decrypt(tail).unwrap(), b"split across reads");
            assert_eq!(accessory.pending_len(), 0);
        }

        #[test]
        fn tampered_frame_fails() {
            let keys = test_keys();
            let mut controller = SessionCipher::controller(&keys);
            let mut accessory = SessionCipher::accessory(&keys);

            let mut framed = controller.encrypt(b"payload").unwrap();
            framed[4] ^= 0x80;
            assert!(matches!(
                accessory.decrypt(&framed),
                Err(CryptoError::AuthTagMismatch)
            ));
        }

        #[test]
        fn oversized_length_prefix_is_rejected() {
            let mut accessory = SessionCipher::accessory(&test_keys());
            assert!(matches!(
                accessory.decrypt(&[0x01, 0x04, 0x00]),
                Err(CryptoError::Decryption(_))
            ));
            assert!(accessory.is_failed());
            assert_eq!(accessory.pending_len(), 0);
        }

        #[test]
        fn bad_frame_ends_the_session() {
            let keys = test_keys();
            let mut controller = SessionCipher::controller(&keys);
            let mut accessory = SessionCipher::accessory(&keys);

            let mut framed = controller.encrypt(b"first").unwrap();
            let mut second = controller.encrypt(b"second").unwrap();
            let last = second.len() - 1;
            second[last] ^= 0x01;
            framed.extend_from_slice(&second);

            assert!(matches!(
                accessory.decrypt(&framed),
                Err(CryptoError::AuthTagMismatch)
            ));
            assert!(accessory.is_failed());
            assert_eq!(accessory.pending_len(), 0);

            let next = controller.encrypt(b"third").unwrap();
            assert!(matches!(
                accessory.decrypt(&next),
                Err(CryptoError::SessionFailed)
            ));
            assert!(matches!(
                accessory.encrypt(b"reply"),
                Err(CryptoError::SessionFailed)
            ));
        }

        #[test]
        fn partial_input_does_not_fail_the_session() {
            let keys = test_keys();
            let mut controller = SessionCipher::controller(&keys);
            let mut accessory = SessionCipher::accessory(&keys);

            let framed = controller.encrypt(b"slow reader").unwrap();
            assert!(accessory.decrypt(&framed[..1]).unwrap().is_empty());
            assert!(!accessory.is_failed());
            assert_eq!(accessory.decrypt(&framed[1..]).unwrap(), b"slow reader");
        }

        #[test]
        fn empty_plaintext_is_rejected() {
            let mut cipher = SessionCipher::controller(&test_keys());
            assert!(cipher.encrypt(&[]).is_err());
        }
    }

    mod known_vectors {
        use super::*;

        #[test]
        fn rfc8439_aead_test_vector() {
            // RFC 8439 Section 2.8.2
            let key: [u8; 32] =
                hex::decode("808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f")
                    .unwrap()
                    .try_into()
                    .unwrap();
            let nonce = hex::decode("070000004041424344454647").unwrap();
            let aad = hex::decode("50515253c0c1c2c3c4c5c6c7").unwrap();
            let plaintext = b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip for the future, sunscreen would be it.";

            let expected_tag = hex::decode("1ae10b594f09e26a7e902ecbd0600691").unwrap();

            let cipher = ChaCha20Poly1305::new(&key.into());
            let payload = Payload {
                msg: plaintext.as_slice(),
                aad: &aad,
            };
            let result = cipher.encrypt(Nonce::from_slice(&nonce), payload).unwrap();

            assert_eq!(&result[result.len() - 16..], expected_tag.as_slice());
        }
    }
}
