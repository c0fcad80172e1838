//! Client PIN protocol, version 1 (spec.md §4.7).
//!
//! Ported from `circuitkey/pin.py`'s `PinProtocolV1`. State is split the
//! same way the original splits it: `pin` and `retry_count` persist across
//! restarts through the [`Store`]; `pin_token`, `mismatch_counter`, and the
//! key-agreement keypair are volatile and are re-derived/regenerated at
//! construction and on every failed verify.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use crate::crypto::{CryptoBackend, EcKeypair, EcPublicKey};
use crate::error::CborError;
use crate::schema::StatusCode;
use crate::store::Store;

const BUCKET: &str = "pin";

fn pin_from_bucket(data: &crate::store::Bucket) -> Option<[u8; 16]> {
    let encoded = data.get("pin")?.as_str()?;
    let bytes = hex::decode(encoded).ok()?;
    if bytes.len() != 16 {
        return None;
    }
    let mut pin = [0u8; 16];
    pin.copy_from_slice(&bytes);
    Some(pin)
}

fn retry_count_from_bucket(data: &crate::store::Bucket) -> u8 {
    data.get("retry_count")
        .and_then(|v| v.as_u64())
        .map(|n| n as u8)
        .unwrap_or(8)
}

pub struct PinProtocolV1 {
    store: Arc<dyn Store>,
    crypto: Arc<dyn CryptoBackend>,
    state: Mutex<State>,
}

struct State {
    pin: Option<[u8; 16]>,
    retry_count: u8,
    pin_token: [u8; 16],
    mismatch_counter: u8,
    key_agreement_key: EcKeypair,
}

impl PinProtocolV1 {
    pub async fn new(store: Arc<dyn Store>, crypto: Arc<dyn CryptoBackend>) -> Self {
        let loaded = store.load(BUCKET).unwrap_or_default();
        let pin = pin_from_bucket(&loaded);
        let retry_count = retry_count_from_bucket(&loaded);
        let key_agreement_key = crypto.ec_generate_keypair().await;

        Self {
            store,
            crypto,
            state: Mutex::new(State {
                pin,
                retry_count,
                pin_token: fresh_token(),
                mismatch_counter: 0,
                key_agreement_key,
            }),
        }
    }

    fn save(&self, state: &State) -> Result<(), CborError> {
        let mut data = crate::store::Bucket::new();
        if let Some(pin) = state.pin {
            data.insert("pin".to_string(), json!(hex::encode(pin)));
        }
        data.insert("retry_count".to_string(), json!(state.retry_count));
        self.store
            .save(BUCKET, &data)
            .map_err(|e| CborError::new(StatusCode::NotAllowed, e.to_string()))
    }

    fn validate_pin(pin: &[u8]) -> Result<(), CborError> {
        if pin.len() < 4 {
            return Err(CborError::new(StatusCode::PinPolicyViolation, "PIN too short"));
        }
        if pin.len() > 63 {
            return Err(CborError::new(StatusCode::PinPolicyViolation, "PIN too long"));
        }
        Ok(())
    }

    /// Decrypts and checks `pin_hash_enc` against the stored PIN hash,
    /// returning the 32-byte AES-encrypted pinToken on success.
    pub async fn verify(
        &self,
        pin_hash_enc: &[u8],
        platform_key: &EcPublicKey,
    ) -> Result<Vec<u8>, CborError> {
        let mut state = self.state.lock().await;
        Self::check_not_blocked(&state)?;

        let shared_secret = self
            .crypto
            .ec_shared_secret(&state.key_agreement_key, platform_key)
            .await
            .map_err(|e| CborError::new(StatusCode::PinAuthInvalid, e.to_string()))?;

        let pin_hash = self
            .crypto
            .hmac_sha256(&shared_secret, pin_hash_enc)
            .await
            .map_err(|e| CborError::new(StatusCode::PinAuthInvalid, e.to_string()))?;

        state.retry_count = state.retry_count.saturating_sub(1);
        self.save(&state)?;

        let mismatch = match state.pin {
            Some(p) => p[..] != pin_hash[..16],
            None => true,
        };
        if mismatch {
            state.key_agreement_key = self.crypto.ec_generate_keypair().await;
            state.mismatch_counter += 1;
            Self::check_not_blocked(&state)?;
            return Err(CborError::new(StatusCode::PinInvalid, "PIN is invalid"));
        }

        state.mismatch_counter = 0;
        state.retry_count = 8;
        self.save(&state)?;

        self.crypto
            .aes256_cbc_encrypt(&shared_secret, &state.pin_token, 32)
            .await
            .map_err(|e| CborError::new(StatusCode::PinAuthInvalid, e.to_string()))
    }

    fn check_not_blocked(state: &State) -> Result<(), CborError> {
        if state.mismatch_counter >= 3 {
            return Err(CborError::new(StatusCode::PinAuthBlocked, "PIN auth blocked"));
        }
        if state.retry_count == 0 {
            return Err(CborError::new(StatusCode::PinBlocked, "PIN is blocked"));
        }
        Ok(())
    }

    /// Decrypts `new_pin_enc` under the shared secret, verifies `pin_auth`,
    /// validates PIN length, and stores its SHA-256-truncated hash.
    pub async fn set_pin(
        &self,
        new_pin_enc: &[u8],
        pin_auth: &[u8],
        platform_key: &EcPublicKey,
    ) -> Result<(), CborError> {
        let mut state = self.state.lock().await;

        let shared_secret = self
            .crypto
            .ec_shared_secret(&state.key_agreement_key, platform_key)
            .await
            .map_err(|e| CborError::new(StatusCode::PinAuthInvalid, e.to_string()))?;

        let expected_auth = self
            .crypto
            .hmac_sha256(&shared_secret, new_pin_enc)
            .await
            .map_err(|e| CborError::new(StatusCode::PinAuthInvalid, e.to_string()))?;

        if &expected_auth[..16] != pin_auth {
            return Err(CborError::new(StatusCode::PinAuthInvalid, "PIN mismatch"));
        }

        let zero_padded_pin = self
            .crypto
            .aes256_cbc_decrypt(&shared_secret, new_pin_enc)
            .await
            .map_err(|e| CborError::new(StatusCode::PinAuthInvalid, e.to_string()))?;

        let end = zero_padded_pin
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(zero_padded_pin.len());
        let pin = &zero_padded_pin[..end];

        Self::validate_pin(pin)?;

        let hash = self.crypto.sha256(pin).await;
        let mut truncated = [0u8; 16];
        truncated.copy_from_slice(&hash[..16]);

        state.pin = Some(truncated);
        state.pin_token = fresh_token();
        self.save(&state)
    }

    /// Mirrors the original's synchronous `is_pin_set` check; assumes
    /// callers don't invoke this while already holding the lock on this
    /// same protocol instance (the CBOR dispatcher never does).
    pub fn is_pin_set(&self) -> bool {
        self.state
            .try_lock()
            .map(|s| s.pin.is_some())
            .unwrap_or(false)
    }

    pub async fn get_retries(&self) -> u8 {
        self.state.lock().await.retry_count
    }

    pub async fn is_blocked(&self) -> bool {
        self.state.lock().await.retry_count == 0
    }

    pub async fn get_key_agreement_pub_key(&self) -> EcPublicKey {
        self.state.lock().await.key_agreement_key.public
    }
}

fn fresh_token() -> [u8; 16] {
    use rand::RngCore;
    let mut token = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut token);
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HostCrypto;
    use crate::store::{Bucket, StoreError};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemStore(StdMutex<Option<Bucket>>);

    impl Store for MemStore {
        fn load(&self, _bucket: &str) -> Result<Bucket, StoreError> {
            Ok(self.0.lock().unwrap().clone().unwrap_or_default())
        }
        fn save(&self, _bucket: &str, data: &Bucket) -> Result<(), StoreError> {
            *self.0.lock().unwrap() = Some(data.clone());
            Ok(())
        }
        fn reset(&self) -> Result<(), StoreError> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }
    }

    fn protocol() -> PinProtocolV1 {
        futures_block_on(PinProtocolV1::new(
            Arc::new(MemStore::default()),
            Arc::new(HostCrypto),
        ))
    }

    /// Tiny blocking helper: tests below run in `#[tokio::test]`, but the
    /// fixture needs an async constructor outside that context too.
    fn futures_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Handle::try_current()
            .map(|h| h.block_on(fut))
            .unwrap_or_else(|_| tokio::runtime::Runtime::new().unwrap().block_on(fut))
    }

    #[tokio::test]
    async fn set_pin_then_verify_round_trips() {
        let protocol = protocol();
        let crypto = HostCrypto;
        let platform = crypto.ec_generate_keypair().await;
        let authenticator_pub = protocol.get_key_agreement_pub_key().await;
        let shared = crypto
            .ec_shared_secret(&platform, &authenticator_pub)
            .await
            .unwrap();

        let pin = b"1234";
        let mut padded = vec![0u8; 64];
        padded[..pin.len()].copy_from_slice(pin);
        let new_pin_enc = crypto.aes256_cbc_encrypt(&shared, &padded, 64).await.unwrap();
        let auth = crypto.hmac_sha256(&shared, &new_pin_enc).await.unwrap();

        protocol
            .set_pin(&new_pin_enc, &auth[..16], &platform.public)
            .await
            .unwrap();

        assert!(protocol.is_pin_set());
        assert_eq!(protocol.get_retries().await, 8);

        // Now verify with a fresh platform ephemeral key, as a real client would.
        let platform2 = crypto.ec_generate_keypair().await;
        let authenticator_pub2 = protocol.get_key_agreement_pub_key().await;
        let shared2 = crypto
            .ec_shared_secret(&platform2, &authenticator_pub2)
            .await
            .unwrap();
        let pin_hash = crypto.sha256(pin).await;
        let mut padded_hash = vec![0u8; 64];
        padded_hash[..16].copy_from_slice(&pin_hash[..16]);
        let pin_hash_enc = crypto
            .aes256_cbc_encrypt(&shared2, &padded_hash, 64)
            .await
            .unwrap();

        let token = protocol.verify(&pin_hash_enc, &platform2.public).await.unwrap();
        assert_eq!(token.len(), 32);
        assert_eq!(protocol.get_retries().await, 8);
        assert!(!protocol.is_blocked().await);
    }

    #[tokio::test]
    async fn verify_wrong_pin_decrements_retries_and_mismatch_counter() {
        let protocol = protocol();
        let crypto = HostCrypto;
        let platform = crypto.ec_generate_keypair().await;
        let authenticator_pub = protocol.get_key_agreement_pub_key().await;
        let shared = crypto
            .ec_shared_secret(&platform, &authenticator_pub)
            .await
            .unwrap();

        let pin = b"1234";
        let mut padded = vec![0u8; 64];
        padded[..pin.len()].copy_from_slice(pin);
        let new_pin_enc = crypto.aes256_cbc_encrypt(&shared, &padded, 64).await.unwrap();
        let auth = crypto.hmac_sha256(&shared, &new_pin_enc).await.unwrap();
        protocol
            .set_pin(&new_pin_enc, &auth[..16], &platform.public)
            .await
            .unwrap();

        let platform2 = crypto.ec_generate_keypair().await;
        let authenticator_pub2 = protocol.get_key_agreement_pub_key().await;
        let shared2 = crypto
            .ec_shared_secret(&platform2, &authenticator_pub2)
            .await
            .unwrap();
        let mut wrong_padded = vec![0u8; 64];
        wrong_padded[..4].copy_from_slice(b"0000");
        let wrong_hash_enc = crypto
            .aes256_cbc_encrypt(&shared2, &wrong_padded, 64)
            .await
            .unwrap();

        let result = protocol.verify(&wrong_hash_enc, &platform2.public).await;
        assert!(result.is_err());
        assert_eq!(protocol.get_retries().await, 7);
    }

    #[tokio::test]
    async fn set_pin_rejects_too_short_pin() {
        let protocol = protocol();
        let crypto = HostCrypto;
        let platform = crypto.ec_generate_keypair().await;
        let authenticator_pub = protocol.get_key_agreement_pub_key().await;
        let shared = crypto
            .ec_shared_secret(&platform, &authenticator_pub)
            .await
            .unwrap();

        let mut padded = vec![0u8; 64];
        padded[..3].copy_from_slice(b"123");
        let new_pin_enc = crypto.aes256_cbc_encrypt(&shared, &padded, 64).await.unwrap();
        let auth = crypto.hmac_sha256(&shared, &new_pin_enc).await.unwrap();

        let err = protocol
            .set_pin(&new_pin_enc, &auth[..16], &platform.public)
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::PinPolicyViolation);
    }

    #[tokio::test]
    async fn set_pin_accepts_max_length_pin() {
        let protocol = protocol();
        let crypto = HostCrypto;
        let platform = crypto.ec_generate_keypair().await;
        let authenticator_pub = protocol.get_key_agreement_pub_key().await;
        let shared = crypto
            .ec_shared_secret(&platform, &authenticator_pub)
            .await
            .unwrap();

        let pin = vec![b'1'; 63];
        let mut padded = vec![0u8; 64];
        padded[..pin.len()].copy_from_slice(&pin);
        let new_pin_enc = crypto.aes256_cbc_encrypt(&shared, &padded, 64).await.unwrap();
        let auth = crypto.hmac_sha256(&shared, &new_pin_enc).await.unwrap();

        protocol
            .set_pin(&new_pin_enc, &auth[..16], &platform.public)
            .await
            .unwrap();

        assert!(protocol.is_pin_set());
    }
}
