//! Crypto backend (spec.md §2, §4.7).
//!
//! The Python source picks between an embedded `aesio`/`ecdsa` backend and a
//! host-side `cryptography` library via import probing (Design Notes §9).
//! Here that's a trait with one production implementation built from the
//! teacher's exact crate set (`sha2`, `hmac`, `p256`, `aes`, `cbc`).
//!
//! Every method is `async` and yields once after finishing its work, so a
//! concurrent keepalive loop (spec.md §5) is never starved by a long crypto
//! operation running back-to-back with others in the same task.

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use hmac::{Hmac, Mac};
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AES-256-CBC encryption failed: {0}")]
    Encrypt(String),
    #[error("AES-256-CBC decryption failed: {0}")]
    Decrypt(String),
    #[error("invalid EC public key: {0}")]
    InvalidPublicKey(String),
    #[error("HMAC key of unexpected length")]
    InvalidHmacKey,
}

/// An uncompressed P-256 point, (x, y), each 32 bytes big-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EcPublicKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl EcPublicKey {
    fn to_sec1_uncompressed(self) -> [u8; 65] {
        let mut buf = [0u8; 65];
        buf[0] = 0x04;
        buf[1..33].copy_from_slice(&self.x);
        buf[33..65].copy_from_slice(&self.y);
        buf
    }

    fn from_public_key(pk: &PublicKey) -> Self {
        let encoded = pk.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(encoded.x().expect("uncompressed point has x"));
        y.copy_from_slice(encoded.y().expect("uncompressed point has y"));
        Self { x, y }
    }
}

/// An ephemeral P-256 keypair: the private scalar, opaque to callers, plus
/// its public point.
pub struct EcKeypair {
    secret: EphemeralSecret,
    pub public: EcPublicKey,
}

#[async_trait::async_trait]
pub trait CryptoBackend: Send + Sync {
    async fn sha256(&self, data: &[u8]) -> [u8; 32];

    /// Full 32-byte HMAC-SHA-256; callers that need a pinAuth/pinHash
    /// truncate to the first 16 bytes themselves (spec.md §4.7).
    async fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError>;

    async fn ec_generate_keypair(&self) -> EcKeypair;

    /// ECDH shared secret between our private key and the platform's public
    /// key, hashed with SHA-256 (spec.md §4.7: `Z = SHA-256(ECDH(a, bG))`).
    async fn ec_shared_secret(
        &self,
        ours: &EcKeypair,
        theirs: &EcPublicKey,
    ) -> Result<[u8; 32], CryptoError>;

    /// AES-256-CBC encrypt under a zero IV, output sized to `out_len`
    /// (a multiple of 16); `plaintext` is zero-padded up to `out_len`
    /// before encryption. Unlike the embedded Python backend (Design
    /// Notes §9), output is never hardcoded to 64 bytes.
    async fn aes256_cbc_encrypt(
        &self,
        key: &[u8; 32],
        plaintext: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>, CryptoError>;

    /// AES-256-CBC decrypt under a zero IV. Output length equals input
    /// length (ciphertext is always a whole number of 16-byte blocks).
    async fn aes256_cbc_decrypt(
        &self,
        key: &[u8; 32],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

pub struct HostCrypto;

#[async_trait::async_trait]
impl CryptoBackend for HostCrypto {
    async fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        tokio::task::yield_now().await;
        digest.into()
    }

    async fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| CryptoError::InvalidHmacKey)?;
        mac.update(data);
        let result: [u8; 32] = mac.finalize().into_bytes().into();
        tokio::task::yield_now().await;
        Ok(result)
    }

    async fn ec_generate_keypair(&self) -> EcKeypair {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        let public = EcPublicKey::from_public_key(&public);
        tokio::task::yield_now().await;
        EcKeypair { secret, public }
    }

    async fn ec_shared_secret(
        &self,
        ours: &EcKeypair,
        theirs: &EcPublicKey,
    ) -> Result<[u8; 32], CryptoError> {
        let their_point = theirs.to_sec1_uncompressed();
        let their_pub = PublicKey::from_sec1_bytes(&their_point)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let shared = ours.secret.diffie_hellman(&their_pub);
        let mut hasher = Sha256::new();
        hasher.update(shared.raw_secret_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        tokio::task::yield_now().await;
        Ok(digest)
    }

    async fn aes256_cbc_encrypt(
        &self,
        key: &[u8; 32],
        plaintext: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > out_len {
            return Err(CryptoError::Encrypt(format!(
                "plaintext too large [{} > {}]",
                plaintext.len(),
                out_len
            )));
        }
        if out_len % 16 != 0 {
            return Err(CryptoError::Encrypt(
                "output length must be a multiple of 16".into(),
            ));
        }

        let mut buf = vec![0u8; out_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);

        let iv = [0u8; 16];
        let cipher = Aes256CbcEnc::new(key.into(), &iv.into());
        let ciphertext = cipher
            .encrypt_padded_mut::<NoPadding>(&mut buf, out_len)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?
            .to_vec();
        tokio::task::yield_now().await;
        Ok(ciphertext)
    }

    async fn aes256_cbc_decrypt(
        &self,
        key: &[u8; 32],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut buf = ciphertext.to_vec();
        let iv = [0u8; 16];
        let cipher = Aes256CbcDec::new(key.into(), &iv.into());
        let plaintext = cipher
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?
            .to_vec();
        tokio::task::yield_now().await;
        Ok(plaintext)
    }
}
