//! SRP-6a implementation for HAP pair-setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512. The accessory runs
//! [`SrpServer`]; [`SrpClient`] is the controller side.

use hap_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SRP username used by every HAP pair-setup.
pub const SRP_USERNAME: &[u8] = b"Pair-Setup";

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// Salt length generated by the accessory.
pub const SALT_LEN: usize = 16;

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// SRP-6a parameters (3072-bit, RFC 5054).
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 5).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16)
            .expect("Invalid RFC 5054 prime constant");
        let g = BigUint::from(5u32);
        Self { n, g }
    }
}

/// Accessory-side SRP verifier for one pair-setup exchange.
///
/// Consumed by [`SrpServer::verify_client`], so a verifier can answer at most
/// one client proof.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpServer {
    #[zeroize(skip)]
    params: SrpParams,
    salt: [u8; SALT_LEN],
    identity: Vec<u8>,
    #[zeroize(skip)]
    verifier: BigUint,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Keys agreed by a successful SRP exchange (accessory side).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpSession {
    session_key: Vec<u8>,
    server_proof: Vec<u8>,
}

impl SrpServer {
    /// Create a verifier for `password` with a fresh 256-bit private key `b`.
    pub fn new(identity: &[u8], password: &[u8], salt: [u8; SALT_LEN]) -> Self {
        let b = OsRng.gen_biguint(256);
        Self::build(identity, password, salt, b)
    }

    /// Create a verifier with a specific private key (for testing).
    #[cfg(test)]
    pub fn with_private_key(
        identity: &[u8],
        password: &[u8],
        salt: [u8; SALT_LEN],
        private_key: &[u8],
    ) -> Self {
        Self::build(identity, password, salt, BigUint::from_bytes_be(private_key))
    }

    fn build(identity: &[u8], password: &[u8], salt: [u8; SALT_LEN], b: BigUint) -> Self {
        let params = SrpParams::default();

        // v = g^x mod N
        let x = compute_x(&salt, identity, password);
        let verifier = params.g.modpow(&x, &params.n);

        // B = (k*v + g^b) mod N
        let k = compute_k(&params);
        let g_b = params.g.modpow(&b, &params.n);
        let public_key = ((&k * &verifier) + g_b) % &params.n;

        Self {
            params,
            salt,
            identity: identity.to_vec(),
            verifier,
            private_key: b.to_bytes_be(),
            public_key,
        }
    }

    /// Salt sent to the controller.
    pub fn salt(&self) -> [u8; SALT_LEN] {
        self.salt
    }

    /// Server public key B (384 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        to_padded_be(&self.public_key)
    }

    /// Check the controller's proof M1 against `A` and return the session.
    ///
    /// Fails with `InvalidPublicKey` if `A mod N == 0` and with `ProofMismatch`
    /// if the controller used a different setup code.
    pub fn verify_client(
        self,
        client_public: &[u8],
        client_proof: &[u8],
    ) -> Result<SrpSession, CryptoError> {
        if client_public.len() > N_BYTES {
            return Err(CryptoError::InvalidPublicKey("A is longer than N"));
        }

        let a = BigUint::from_bytes_be(client_public);
        if &a % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("A mod N is zero"));
        }

        let u = compute_u(&a, &self.public_key);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("u is zero"));
        }

        // S = (A * v^u)^b mod N
        let b = BigUint::from_bytes_be(&self.private_key);
        let v_u = self.verifier.modpow(&u, &self.params.n);
        let base = (&a * &v_u) % &self.params.n;
        let s = base.modpow(&b, &self.params.n);

        let session_key = hash_padded(&s);

        let expected = compute_m1(
            &self.params,
            &self.identity,
            &self.salt,
            &a,
            &self.public_key,
            &session_key,
        );
        if !bool::from(client_proof.ct_eq(&expected)) {
            return Err(CryptoError::ProofMismatch);
        }

        let server_proof = compute_hamk(&a, &expected, &session_key);

        Ok(SrpSession {
            session_key,
            server_proof,
        })
    }
}

impl SrpSession {
    /// Shared session key K = H(PAD(S)), 64 bytes.
    pub fn session_key(&self) -> &[u8] {
        &self.session_key
    }

    /// Server proof HAMK = H(PAD(A) || M1 || K).
    pub fn server_proof(&self) -> &[u8] {
        &self.server_proof
    }
}

/// Client-side SRP state machine.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge containing salt and public key.
pub struct SrpChallenge {
    pub salt: [u8; SALT_LEN],
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
pub struct SrpProof {
    pub client_proof: Vec<u8>,
    pub shared_secret: Vec<u8>,
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    ///
    /// For HAP, identity is `Pair-Setup` and password is the setup code.
    pub fn new(identity: &[u8], password: &[u8]) -> Self {
        let a = OsRng.gen_biguint(256);
        Self::build(identity, password, a)
    }

    /// Create SRP client with a specific private key (for testing).
    #[cfg(test)]
    pub fn with_private_key(identity: &[u8], password: &[u8], private_key: &[u8]) -> Self {
        Self::build(identity, password, BigUint::from_bytes_be(private_key))
    }

    fn build(identity: &[u8], password: &[u8], a: BigUint) -> Self {
        let params = SrpParams::default();
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: a.to_bytes_be(),
            public_key,
        }
    }

    /// Get client public key A (384 bytes for 3072-bit).
    pub fn public_key(&self) -> Vec<u8> {
        to_padded_be(&self.public_key)
    }

    /// Process server's challenge and generate proof.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, CryptoError> {
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        if &b % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("B mod N is zero"));
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("u is zero"));
        }

        let x = compute_x(&challenge.salt, &self.identity, &self.password);
        let k = compute_k(&self.params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;

        // B < k*g^x wraps around N
        let base = if b >= k_gx {
            (&b - &k_gx) % &self.params.n
        } else {
            (&b + &self.params.n - &k_gx) % &self.params.n
        };

        let exponent = (&a + &u * &x) % (&self.params.n - BigUint::from(1u32));
        let s = base.modpow(&exponent, &self.params.n);

        let shared_secret = hash_padded(&s);

        let client_proof = compute_m1(
            &self.params,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );

        let expected_server_proof = compute_hamk(&self.public_key, &client_proof, &shared_secret);

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Verify server's proof HAMK.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proof.ct_eq(expected).into()
    }
}

/// Compute M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(to_padded_be(&params.n));

    // H(g) is taken over the raw generator byte, unlike k which pads g.
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; 64];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(to_padded_be(a));
    hasher.update(to_padded_be(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Compute HAMK = H(PAD(A) || M1 || K).
fn compute_hamk(a: &BigUint, m1: &[u8], k: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(to_padded_be(a));
    hasher.update(m1);
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// K = H(PAD(S)).
fn hash_padded(s: &BigUint) -> Vec<u8> {
    Sha512::digest(to_padded_be(s)).to_vec()
}

/// Encode a group element as a fixed-width big-endian byte string of
/// [`N_BYTES`], left-padded with zeros.
pub fn to_padded_be(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// Compute k = SHA512(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(to_padded_be(&params.n));
    hasher.update(to_padded_be(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(to_padded_be(a));
    hasher.update(to_padded_be(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}
