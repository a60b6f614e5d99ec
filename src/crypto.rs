//! Cryptographic primitives: key pairs, challenges, ECDSA signatures, and
//! authenticated encryption of private key material at rest.
//!
//! All operations here are synchronous, CPU-bound, and free of side effects
//! beyond their return value; they may run on any thread without
//! coordination.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use p256::ecdsa::{
    signature::{Signer as _, Verifier as _},
    Signature, SigningKey, VerifyingKey,
};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret as _, SecretBox, SecretString};
use sha2::Sha256;
use tracing::error;

use crate::config::SecurityConfig;
use crate::error::{OptionExt as _, Result, ResultExt as _, SealError};
use crate::util;

/// Challenge size in bytes (hex-encoded to 64 characters).
pub const CHALLENGE_BYTES: usize = 32;

/// Nonce size for AES-GCM (12 bytes).
const NONCE_LEN: usize = 12;

/// Authentication tag size (16 bytes).
const TAG_LEN: usize = 16;

/// Delimiter joining the (nonce, tag, ciphertext) triple of an encrypted
/// private-key blob.
const BLOB_DELIMITER: char = ':';

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// The symmetric key protecting seal private keys at rest.
///
/// Supplied externally (config file or environment), never embedded.  A
/// process without a usable master key must fail at startup.
pub struct MasterKey {
    key: SecretBox<[u8; 32]>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

impl MasterKey {
    /// Parse a raw 32-byte key from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).ctx_config("master key is not valid hex")?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SealError::Config("master key must be 32 bytes (64 hex chars)".into()))?;
        Ok(Self {
            key: SecretBox::new(Box::new(arr)),
        })
    }

    /// Derive a key from a passphrase with PBKDF2-HMAC-SHA256.
    pub fn derive_from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self> {
        const ITERATIONS: u32 = 100_000;
        if salt.len() < 8 {
            return Err(SealError::Config(
                "master key salt must be at least 8 bytes".into(),
            ));
        }
        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, ITERATIONS, &mut out);
        Ok(Self {
            key: SecretBox::new(Box::new(out)),
        })
    }

    /// Resolve the master key from configuration.  64 hex chars are taken as
    /// a raw key; anything else is treated as a passphrase and requires
    /// `master_key_salt`.
    pub fn from_config(sec: &SecurityConfig) -> Result<Self> {
        let raw = sec
            .master_key
            .as_deref()
            .required_config(
                "master key not configured (set security.master_key or SEALTRACE_MASTER_KEY)",
            )?
            .trim()
            .to_string();
        if raw.is_empty() {
            return Err(SealError::Config("master key is empty".into()));
        }
        if raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Self::from_hex(&raw);
        }
        let salt_hex = sec
            .master_key_salt
            .as_deref()
            .required_config("passphrase master key requires security.master_key_salt")?;
        let salt = hex::decode(salt_hex.trim()).ctx_config("master key salt is not valid hex")?;
        Self::derive_from_passphrase(&raw, &salt)
    }

    fn bytes(&self) -> &[u8; 32] {
        self.key.expose_secret()
    }
}

// ---------------------------------------------------------------------------
// Key pairs
// ---------------------------------------------------------------------------

/// A freshly generated P-256 pair.  The private half only ever leaves this
/// struct through [`encrypt_private_key`].
pub struct KeyPair {
    pub public_key_pem: String,
    pub private_key_pem: SecretString,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key_pem", &self.public_key_pem)
            .finish_non_exhaustive()
    }
}

/// Generate a P-256 ECDSA key pair, PEM-encoded (PKCS#8 private, SPKI
/// public).  Pairs are cryptographically independent across calls.
pub fn generate_keypair() -> Result<KeyPair> {
    let sk = SigningKey::random(&mut p256::elliptic_curve::rand_core::OsRng);
    let private_pem = sk
        .to_pkcs8_pem(Default::default())
        .ctx_crypto("encode pkcs8 pem")?;
    let vk = VerifyingKey::from(&sk);
    let public_key_pem = vk
        .to_public_key_pem(Default::default())
        .ctx_crypto("encode public key pem")?;
    Ok(KeyPair {
        public_key_pem,
        private_key_pem: SecretString::from(private_pem.as_str().to_owned()),
    })
}

/// SHA-256 fingerprint of the uncompressed public key point (stable key id
/// for logging and audit output).
pub fn public_key_fingerprint(public_key_pem: &str) -> Result<String> {
    let vk = VerifyingKey::from_public_key_pem(public_key_pem)
        .ctx_crypto("parse P-256 public key")?;
    Ok(util::sha256_hex(vk.to_encoded_point(false).as_bytes()))
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

/// 32 bytes of CSPRNG output, hex-encoded to a 64-character string.
pub fn generate_challenge() -> String {
    use rand::RngCore as _;
    let mut buf = [0u8; CHALLENGE_BYTES];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn challenge_bytes(challenge_hex: &str) -> Result<Vec<u8>> {
    hex::decode(challenge_hex).ctx_validation("challenge must be hex")
}

// ---------------------------------------------------------------------------
// Signing / verification
// ---------------------------------------------------------------------------

/// Sign a challenge with a seal private key; returns a DER-encoded ECDSA
/// signature over the raw challenge bytes (SHA-256 digest).
///
/// Simulation and testing aid only: production deployments keep the private
/// key inside the tag's secure element and this code path never runs (see
/// [`crate::reader`]).
pub fn sign_challenge(challenge_hex: &str, private_key_pem: &SecretString) -> Result<Vec<u8>> {
    let msg = challenge_bytes(challenge_hex)?;
    let sk = SigningKey::from_pkcs8_pem(private_key_pem.expose_secret())
        .ctx_crypto("parse P-256 PKCS#8 private key")?;
    let sig: Signature = sk.sign(&msg);
    Ok(sig.to_der().as_bytes().to_vec())
}

/// Check a DER-encoded ECDSA signature against a challenge and public key.
///
/// Returns `false` for any mismatch among challenge, signature, or key --
/// including truncated or corrupted signatures.  Only structurally invalid
/// key material (or a non-hex challenge) is an error.
pub fn verify_signature(
    challenge_hex: &str,
    signature_der: &[u8],
    public_key_pem: &str,
) -> Result<bool> {
    let vk = VerifyingKey::from_public_key_pem(public_key_pem)
        .ctx_crypto("parse P-256 public key")?;
    let msg = challenge_bytes(challenge_hex)?;
    let sig = match Signature::from_der(signature_der) {
        Ok(s) => s,
        // Malformed signature bytes are a failed verification, not an error.
        Err(_) => return Ok(false),
    };
    Ok(vk.verify(&msg, &sig).is_ok())
}

// ---------------------------------------------------------------------------
// Private-key-at-rest encryption (AES-256-GCM)
// ---------------------------------------------------------------------------

/// Encrypt a private-key PEM under the master key.
///
/// Output format is the ordered triple `nonce:tag:ciphertext`, each part
/// independently hex-encoded.
pub fn encrypt_private_key(private_key_pem: &SecretString, master: &MasterKey) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(master.bytes())
        .map_err(|_| SealError::Crypto("init AEAD cipher".into()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    {
        use rand::RngCore as _;
        rand::rng().fill_bytes(&mut nonce_bytes);
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext_with_tag = cipher
        .encrypt(nonce, private_key_pem.expose_secret().as_bytes())
        .map_err(|_| SealError::Crypto("private key encryption failed".into()))?;

    let tag_start = ciphertext_with_tag.len() - TAG_LEN;
    Ok(format!(
        "{}{BLOB_DELIMITER}{}{BLOB_DELIMITER}{}",
        hex::encode(nonce_bytes),
        hex::encode(&ciphertext_with_tag[tag_start..]),
        hex::encode(&ciphertext_with_tag[..tag_start]),
    ))
}

/// Decrypt an encrypted private-key blob.
///
/// Fails with [`SealError::Crypto`] when the authentication tag does not
/// verify (wrong master key or tampered ciphertext).  That failure is logged
/// as a security event before being returned -- a forged blob is itself
/// evidence of tampering.
pub fn decrypt_private_key(blob: &str, master: &MasterKey) -> Result<SecretString> {
    let parts: Vec<&str> = blob.split(BLOB_DELIMITER).collect();
    let [nonce_hex, tag_hex, ct_hex]: [&str; 3] = parts
        .try_into()
        .map_err(|_| SealError::Crypto("malformed encrypted key blob".into()))?;

    let nonce_bytes = hex::decode(nonce_hex)
        .map_err(|_| SealError::Crypto("malformed encrypted key blob".into()))?;
    let tag = hex::decode(tag_hex)
        .map_err(|_| SealError::Crypto("malformed encrypted key blob".into()))?;
    let ciphertext = hex::decode(ct_hex)
        .map_err(|_| SealError::Crypto("malformed encrypted key blob".into()))?;
    if nonce_bytes.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(SealError::Crypto("malformed encrypted key blob".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(master.bytes())
        .map_err(|_| SealError::Crypto("init AEAD cipher".into()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext_with_tag = ciphertext;
    ciphertext_with_tag.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(nonce, ciphertext_with_tag.as_slice())
        .map_err(|_| {
            error!("private key AEAD authentication failed (wrong master key or tampered blob)");
            SealError::Crypto("private key authentication failed".into())
        })?;

    let pem = String::from_utf8(plaintext)
        .map_err(|_| SealError::Crypto("decrypted key is not valid UTF-8".into()))?;
    Ok(SecretString::from(pem))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
