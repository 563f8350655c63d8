// libs/emr-cell/src/services/vault.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_database::CredentialStore;
use shared_models::{CredentialRecord, EmrProvider, User};

use crate::error::VaultError;
use crate::models::{CredentialPatch, CredentialSummary, NewCredential};
use crate::services::codec::{is_blank, SecretCodec};
use crate::services::providers::AdapterRegistry;

/// Encrypted credential storage with live validation and identity dedup.
///
/// The vault does not know who is calling. Handlers decide access with
/// [`CredentialVault::authorize`] from the `owner_id` on the summary, which
/// never requires decrypting anything.
pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    codec: Arc<SecretCodec>,
    adapters: AdapterRegistry,
    check_timeout: Duration,
}

impl CredentialVault {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: Arc<SecretCodec>,
        adapters: AdapterRegistry,
        check_timeout: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            adapters,
            check_timeout,
        }
    }

    #[instrument(skip(self, request), fields(owner_id = %request.owner_id, provider = %request.provider))]
    pub async fn create(&self, request: NewCredential) -> Result<CredentialSummary, VaultError> {
        debug!("Creating {} credential", request.provider);

        validate_required_fields(request.provider, &request.credentials)?;
        self.check_reachability(request.provider, &request.credentials).await?;

        let fingerprint = SecretCodec::fingerprint(request.provider, &request.credentials);
        if self.store.find_by_fingerprint(&fingerprint).await?.is_some() {
            warn!("Rejected duplicate {} credential", request.provider);
            return Err(VaultError::DuplicateCredential);
        }

        let encrypted_blob = self.codec.encrypt(&request.credentials)?;
        let now = Utc::now();

        let record = CredentialRecord {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            owner_type: request.owner_type,
            provider: request.provider,
            label: request.label,
            encrypted_blob,
            fingerprint,
            is_valid: true,
            last_validated_at: Some(now),
            validation_error: None,
            created_at: now,
            updated_at: now,
        };

        let stored = self.store.insert(record).await?;
        info!("Stored {} credential {}", stored.provider, stored.id);
        Ok(CredentialSummary::from(&stored))
    }

    /// Applies a patch. New credential values are merged over the stored ones
    /// and re-validated; a label-only patch touches neither the remote system
    /// nor the uniqueness check.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: CredentialPatch) -> Result<CredentialSummary, VaultError> {
        let mut record = self.store.get(id).await?.ok_or(VaultError::NotFound)?;

        if let Some(changes) = patch.credentials.as_ref() {
            let current = self.decrypt_credentials(&record).map_err(|e| {
                error!("Credential {} ({}) could not be decrypted: {}", record.id, record.provider, e);
                e
            })?;
            let merged = merge_credentials(current, changes);

            validate_required_fields(record.provider, &merged)?;
            self.check_reachability(record.provider, &merged).await?;

            let fingerprint = SecretCodec::fingerprint(record.provider, &merged);
            if fingerprint != record.fingerprint {
                let taken = self
                    .store
                    .find_by_fingerprint(&fingerprint)
                    .await?
                    .map_or(false, |other| other.id != record.id);
                if taken {
                    warn!("Update of credential {} would duplicate another record", id);
                    return Err(VaultError::DuplicateCredential);
                }
            }

            let now = Utc::now();
            record.encrypted_blob = self.codec.encrypt(&merged)?;
            record.fingerprint = fingerprint;
            record.is_valid = true;
            record.last_validated_at = Some(now);
            record.validation_error = None;
        }

        if let Some(label) = patch.label {
            record.label = label;
        }
        record.updated_at = Utc::now();

        let stored = self.store.update(record).await?;
        info!("Updated {} credential {}", stored.provider, stored.id);
        Ok(CredentialSummary::from(&stored))
    }

    pub async fn get(&self, id: Uuid) -> Result<CredentialSummary, VaultError> {
        let record = self.store.get(id).await?.ok_or(VaultError::NotFound)?;
        Ok(CredentialSummary::from(&record))
    }

    pub async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<CredentialSummary>, VaultError> {
        let records = self.store.list_by_owner(owner_id).await?;
        Ok(records.iter().map(CredentialSummary::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), VaultError> {
        if !self.store.delete(id).await? {
            return Err(VaultError::NotFound);
        }
        info!("Deleted credential {}", id);
        Ok(())
    }

    /// Most recently created valid credential for the owner.
    pub async fn find_active(
        &self,
        owner_id: Uuid,
        provider: Option<EmrProvider>,
    ) -> Result<Option<CredentialRecord>, VaultError> {
        Ok(self.store.latest_valid(owner_id, provider).await?)
    }

    /// Callers log the failure; on the sync path it carries the failure kind.
    pub fn decrypt_credentials(&self, record: &CredentialRecord) -> Result<Value, VaultError> {
        Ok(self.codec.decrypt(&record.encrypted_blob)?)
    }

    /// Owner-or-admin access check.
    pub fn authorize(caller: &User, credential: &CredentialSummary) -> Result<(), VaultError> {
        if caller.is_admin() || caller.is_owner(&credential.owner_id) {
            return Ok(());
        }
        warn!("User {} denied access to credential {}", caller.id, credential.id);
        Err(VaultError::Forbidden)
    }

    /// Decrypted credential values, for the owner or an admin only.
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn reveal(&self, id: Uuid, caller: &User) -> Result<Value, VaultError> {
        let record = self.store.get(id).await?.ok_or(VaultError::NotFound)?;
        Self::authorize(caller, &CredentialSummary::from(&record))?;
        self.decrypt_credentials(&record).map_err(|e| {
            error!("Credential {} ({}) could not be decrypted: {}", record.id, record.provider, e);
            e
        })
    }

    async fn check_reachability(&self, provider: EmrProvider, credentials: &Value) -> Result<(), VaultError> {
        let adapter = self.adapters.get(provider).ok_or_else(|| {
            warn!("No adapter registered for {}", provider);
            VaultError::unreachable(format!("{} integration is not available", provider.display_name()))
        })?;

        let check = tokio::time::timeout(self.check_timeout, adapter.check_credentials(credentials))
            .await
            .map_err(|_| {
                warn!("{} credential check timed out", provider);
                VaultError::unreachable(format!(
                    "{} did not respond within {:?}",
                    provider.display_name(),
                    self.check_timeout
                ))
            })?;

        if check.ok {
            return Ok(());
        }

        let message = check
            .message
            .unwrap_or_else(|| format!("{} rejected the credentials", provider.display_name()));
        warn!("{} credential check failed: {}", provider, message);
        Err(VaultError::unreachable(message))
    }
}

fn validate_required_fields(provider: EmrProvider, credentials: &Value) -> Result<(), VaultError> {
    let Some(fields) = credentials.as_object() else {
        return Err(VaultError::missing_field("credentials"));
    };

    for field in provider.required_fields() {
        if fields.get(*field).map_or(true, is_blank) {
            return Err(VaultError::missing_field(*field));
        }
    }
    Ok(())
}

/// Overlays `changes` on `current`; a `null` in `changes` removes the key.
fn merge_credentials(current: Value, changes: &Value) -> Value {
    let mut merged = match current {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    if let Some(changes) = changes.as_object() {
        for (key, value) in changes {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}
