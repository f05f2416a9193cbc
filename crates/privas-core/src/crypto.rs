//! The encryption capability every party relies on.
//!
//! [`Encryptor`] is the seam: the protocol only needs key generation, RSA key
//! wrapping and symmetric payload encryption. [`OpensslEncryptor`] backs it
//! with RSA-OAEP and AES-256-GCM.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use openssl::rsa::{Padding, Rsa};
use openssl::symm::{Cipher, decrypt_aead, encrypt_aead};
use sha2::{Digest, Sha256};
use std::fmt;

const AES_KEY_LEN: usize = 32;
const GCM_NONCE_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const SALT_LEN: usize = 32;

/// Default RSA modulus size.
pub const DEFAULT_RSA_BITS: u32 = 2048;

/// PEM-encoded RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    pub fn as_pem(&self) -> &str {
        &self.0
    }
}

/// PEM-encoded RSA private key. Never leaves the party that generated it.
#[derive(Clone)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    pub fn as_pem(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Symmetric payload key shared by the Client and the TPS.
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey(Vec<u8>);

impl AesKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != AES_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "AES key must be {AES_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Hashing salt shared by the Client and the RPP.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = vec![0u8; SALT_LEN];
        openssl::rand::rand_bytes(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::InvalidKey("salt is empty".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("salt is not hex: {e}")))?;
        Self::from_bytes(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Hash a genomic identifier so both salt holders get the same token.
    pub fn hash(&self, identifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        hasher.update(identifier.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(..)")
    }
}

/// Error from the encryption capability.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("openssl: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("ciphertext is truncated")]
    Truncated,
    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("decrypted payload is not UTF-8")]
    NotText,
}

/// Key generation and encryption primitives.
pub trait Encryptor: Send + Sync {
    fn generate_rsa_keypair(&self) -> Result<(PublicKey, PrivateKey), CryptoError>;

    fn generate_aes_key(&self) -> Result<AesKey, CryptoError>;

    fn encrypt_with_public_key(
        &self,
        key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_with_private_key(
        &self,
        key: &PrivateKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn encrypt_aes(&self, key: &AesKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_aes(&self, key: &AesKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// [`Encryptor`] backed by OpenSSL.
#[derive(Debug, Clone, Copy)]
pub struct OpensslEncryptor {
    rsa_bits: u32,
}

impl Default for OpensslEncryptor {
    fn default() -> Self {
        Self::new(DEFAULT_RSA_BITS)
    }
}

impl OpensslEncryptor {
    pub fn new(rsa_bits: u32) -> Self {
        Self { rsa_bits }
    }
}

impl Encryptor for OpensslEncryptor {
    fn generate_rsa_keypair(&self) -> Result<(PublicKey, PrivateKey), CryptoError> {
        let rsa = Rsa::generate(self.rsa_bits)?;
        let public = String::from_utf8(rsa.public_key_to_pem()?)
            .map_err(|_| CryptoError::InvalidKey("public key PEM is not UTF-8".into()))?;
        let private = String::from_utf8(rsa.private_key_to_pem()?)
            .map_err(|_| CryptoError::InvalidKey("private key PEM is not UTF-8".into()))?;
        Ok((PublicKey(public), PrivateKey(private)))
    }

    fn generate_aes_key(&self) -> Result<AesKey, CryptoError> {
        let mut key = vec![0u8; AES_KEY_LEN];
        openssl::rand::rand_bytes(&mut key)?;
        AesKey::from_bytes(key)
    }

    fn encrypt_with_public_key(
        &self,
        key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let rsa = Rsa::public_key_from_pem(key.as_pem().as_bytes())?;
        let mut out = vec![0u8; rsa.size() as usize];
        let len = rsa.public_encrypt(plaintext, &mut out, Padding::PKCS1_OAEP)?;
        out.truncate(len);
        Ok(out)
    }

    fn decrypt_with_private_key(
        &self,
        key: &PrivateKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let rsa = Rsa::private_key_from_pem(key.as_pem().as_bytes())?;
        let mut out = vec![0u8; rsa.size() as usize];
        let len = rsa.private_decrypt(ciphertext, &mut out, Padding::PKCS1_OAEP)?;
        out.truncate(len);
        Ok(out)
    }

    /// Output is `nonce ‖ ciphertext ‖ tag`.
    fn encrypt_aes(&self, key: &AesKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; GCM_NONCE_LEN];
        openssl::rand::rand_bytes(&mut nonce)?;
        let mut tag = [0u8; GCM_TAG_LEN];
        let ciphertext = encrypt_aead(
            Cipher::aes_256_gcm(),
            key.as_bytes(),
            Some(&nonce[..]),
            &[],
            plaintext,
            &mut tag,
        )?;
        let mut out = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len() + GCM_TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn decrypt_aes(&self, key: &AesKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < GCM_NONCE_LEN + GCM_TAG_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, rest) = ciphertext.split_at(GCM_NONCE_LEN);
        let (body, tag) = rest.split_at(rest.len() - GCM_TAG_LEN);
        Ok(decrypt_aead(
            Cipher::aes_256_gcm(),
            key.as_bytes(),
            Some(nonce),
            &[],
            body,
            tag,
        )?)
    }
}

/// Encode binary for a message field.
pub fn encode_field(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a binary message field.
pub fn decode_field(field: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(field.trim())?)
}
