// libs/emr-cell/src/services/codec.rs
use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use shared_config::{AppConfig, Environment};
use shared_models::EmrProvider;

use crate::error::CodecError;

const TAG_LEN: usize = 16;

/// Only ever used when development mode is explicitly flagged.
const INSECURE_DEV_SECRET: &str = "insecure-development-only-emr-credentials-key";

/// Symmetric AEAD codec for credential blobs.
///
/// Ciphertext layout, base64 encoded: `nonce (12) | tag (16) | ciphertext`.
/// A fresh random nonce is drawn for every call.
pub struct SecretCodec {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SecretCodec {
    /// Builds the codec from configuration. Without a configured secret this
    /// refuses to operate unless the environment is development *and*
    /// `EMR_ALLOW_INSECURE_DEV_KEY` is set.
    pub fn from_config(config: &AppConfig) -> Result<Self, CodecError> {
        match config.credentials_encryption_key.as_deref() {
            Some(secret) => Self::from_secret(secret),
            None if config.environment == Environment::Development && config.allow_insecure_dev_key => {
                warn!("Using the insecure development key for EMR credentials - never use this in production");
                Self::from_secret(INSECURE_DEV_SECRET)
            }
            None => {
                error!("EMR credential encryption key missing; refusing to start the credential codec");
                Err(CodecError::MissingKey)
            }
        }
    }

    /// Derives the 256-bit key as SHA-256 of the configured secret.
    pub fn from_secret(secret: &str) -> Result<Self, CodecError> {
        if secret.trim().is_empty() {
            return Err(CodecError::InvalidKey("secret is empty".to_string()));
        }

        let key_bytes = Sha256::digest(secret.as_bytes());
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes.as_slice())
            .map_err(|_| CodecError::InvalidKey("key derivation produced an unusable key".to_string()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    pub fn encrypt(&self, plaintext: &Value) -> Result<String, CodecError> {
        let mut in_out = serde_json::to_vec(plaintext)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CodecError::Encryption("random nonce generation failed".to_string()))?;

        let tag = self
            .key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CodecError::Encryption("seal failed".to_string()))?;

        let mut packed = Vec::with_capacity(NONCE_LEN + TAG_LEN + in_out.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(tag.as_ref());
        packed.extend_from_slice(&in_out);

        Ok(BASE64.encode(packed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Value, CodecError> {
        let packed = BASE64
            .decode(encoded.trim())
            .map_err(|e| CodecError::DecryptionFailed(format!("malformed ciphertext: {}", e)))?;

        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(CodecError::DecryptionFailed("ciphertext too short".to_string()));
        }

        let (nonce_bytes, rest) = packed.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CodecError::DecryptionFailed("invalid nonce".to_string()))?;

        // ring expects the tag appended to the ciphertext.
        let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::DecryptionFailed("authentication tag mismatch".to_string()))?;

        serde_json::from_slice(plaintext)
            .map_err(|e| CodecError::DecryptionFailed(format!("plaintext is not JSON: {}", e)))
    }

    /// Deterministic identity hash over the provider's identity fields.
    ///
    /// Absent, null and empty-string fields are dropped; keys are sorted before
    /// hashing, so field order and non-identity values never affect the result.
    pub fn fingerprint(provider: EmrProvider, credentials: &Value) -> String {
        let identity: BTreeMap<&str, &Value> = provider
            .identity_fields()
            .iter()
            .filter_map(|field| {
                credentials
                    .get(*field)
                    .filter(|value| !is_blank(value))
                    .map(|value| (*field, value))
            })
            .collect();

        let canonical = serde_json::json!({
            "provider": provider.as_str(),
            "identity": identity,
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        digest.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
