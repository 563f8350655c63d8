use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use shared_models::{
    Appointment, CredentialRecord, EmrProvider, Patient, PracticeEmrSettings,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Database(format!("Failed to decode row: {}", err))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Result of a set-once write of a patient's remote identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// The slot already held a value; it was left untouched.
    AlreadyLinked(String),
    /// The deployed schema has no column for this provider.
    Unsupported,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with `Conflict` if another record already holds the fingerprint.
    async fn insert(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError>;

    /// Fails with `Conflict` if a different record already holds the new fingerprint.
    async fn update(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<CredentialRecord>, StoreError>;

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<CredentialRecord>, StoreError>;

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Most recently created valid record for this owner, optionally narrowed to one provider.
    async fn latest_valid(
        &self,
        owner_id: Uuid,
        provider: Option<EmrProvider>,
    ) -> Result<Option<CredentialRecord>, StoreError>;
}

#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>, StoreError>;

    /// Writes `external_id` only if the provider slot is empty.
    async fn link_external_id(
        &self,
        patient_id: Uuid,
        provider: EmrProvider,
        external_id: &str,
    ) -> Result<LinkOutcome, StoreError>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn set_emr_appointment_id(
        &self,
        appointment_id: Uuid,
        emr_appointment_id: &str,
    ) -> Result<(), StoreError>;

    /// Bookable appointments without a remote booking, earliest first.
    async fn list_unsynced(&self, limit: usize) -> Result<Vec<Appointment>, StoreError>;
}

#[async_trait]
pub trait PracticeStore: Send + Sync {
    async fn emr_settings(
        &self,
        practice_id: Uuid,
    ) -> Result<Option<PracticeEmrSettings>, StoreError>;
}
