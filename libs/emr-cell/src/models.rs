use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_models::{CredentialRecord, EmrProvider, OwnerType, Patient};

// ==============================================================================
// CREDENTIAL VAULT
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NewCredential {
    pub owner_id: Uuid,
    #[serde(default = "default_owner_type")]
    pub owner_type: OwnerType,
    pub provider: EmrProvider,
    /// Provider-specific credential JSON, e.g. `{"baseUrl", "username", "password"}`.
    pub credentials: Value,
    pub label: Option<String>,
}

fn default_owner_type() -> OwnerType {
    OwnerType::Practice
}

/// Partial update. `credentials` keys are merged over the stored values, so a
/// rotation only needs to carry the changed secret.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialPatch {
    pub credentials: Option<Value>,
    /// `Some(None)` clears the label.
    #[serde(default, with = "double_option")]
    pub label: Option<Option<String>>,
}

/// Credential metadata that is safe to hand to any caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialSummary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_type: OwnerType,
    pub provider: EmrProvider,
    pub label: Option<String>,
    pub is_valid: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub validation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CredentialRecord> for CredentialSummary {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            owner_type: record.owner_type,
            provider: record.provider,
            label: record.label.clone(),
            is_valid: record.is_valid,
            last_validated_at: record.last_validated_at,
            validation_error: record.validation_error.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Outcome of a live credential check against the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialCheck {
    pub ok: bool,
    pub message: Option<String>,
}

impl CredentialCheck {
    pub fn ok() -> Self {
        Self { ok: true, message: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

// ==============================================================================
// PROVIDER ADAPTERS
// ==============================================================================

/// Patient fields sent to the remote system when provisioning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl PatientData {
    /// `None` when the patient has no email, which is the remote dedup key.
    pub fn from_patient(patient: &Patient) -> Option<Self> {
        let email = patient.email.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
        Some(Self {
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            email: email.to_string(),
            phone: patient.phone.clone(),
            date_of_birth: patient.date_of_birth,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartialBookingParams {
    pub provider_id: Option<String>,
    pub location_id: Option<String>,
    pub appointment_type_id: Option<String>,
}

impl PartialBookingParams {
    /// All three parameters, when every one is already known.
    pub fn complete(&self) -> Option<BookingParams> {
        Some(BookingParams {
            provider_id: self.provider_id.clone()?,
            location_id: self.location_id.clone()?,
            appointment_type_id: self.appointment_type_id.clone()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingParams {
    pub provider_id: String,
    pub location_id: String,
    pub appointment_type_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRequest {
    pub external_patient_id: String,
    pub provider_id: Option<String>,
    pub location_id: Option<String>,
    pub appointment_type_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
}

impl BookingRequest {
    /// First required parameter that is absent, by its camelCase name.
    pub fn missing_param(&self) -> Option<&'static str> {
        if self.provider_id.as_deref().map_or(true, str::is_empty) {
            Some("providerId")
        } else if self.location_id.as_deref().map_or(true, str::is_empty) {
            Some("locationId")
        } else if self.appointment_type_id.as_deref().map_or(true, str::is_empty) {
            Some("appointmentTypeId")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingResult {
    pub success: bool,
    pub remote_appointment_id: Option<String>,
    pub error: Option<String>,
}

impl BookingResult {
    pub fn booked(remote_appointment_id: impl Into<String>) -> Self {
        Self {
            success: true,
            remote_appointment_id: Some(remote_appointment_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            remote_appointment_id: None,
            error: Some(error.into()),
        }
    }
}

/// A named entry from a remote list (staff, locations, appointment types).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteOption {
    pub id: String,
    pub name: String,
}

// ==============================================================================
// TOKEN CACHE
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub base_url: String,
    pub client_identity: String,
}

impl TokenKey {
    pub fn new(base_url: impl Into<String>, client_identity: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client_identity: client_identity.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ==============================================================================
// BOOKING ORCHESTRATOR
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SyncStatus {
    Skipped,
    Booked,
    Failed,
}

/// Why a sync attempt ended in `Failed`. Decryption and authentication point at
/// configuration or key problems rather than transient remote conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Storage,
    Decryption,
    Authentication,
    PatientProvisioning,
    PatientLinkConflict,
    BookingParams,
    Booking,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingOutcome {
    pub status: SyncStatus,
    pub provider: Option<EmrProvider>,
    pub remote_appointment_id: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub error: Option<String>,
}

impl BookingOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Skipped,
            provider: None,
            remote_appointment_id: None,
            failure_kind: None,
            error: Some(reason.into()),
        }
    }

    pub fn booked(provider: EmrProvider, remote_appointment_id: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Booked,
            provider: Some(provider),
            remote_appointment_id: Some(remote_appointment_id.into()),
            failure_kind: None,
            error: None,
        }
    }

    pub fn failed(
        provider: Option<EmrProvider>,
        kind: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: SyncStatus::Failed,
            provider,
            remote_appointment_id: None,
            failure_kind: Some(kind),
            error: Some(error.into()),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.failure_kind,
            Some(FailureKind::Decryption) | Some(FailureKind::Authentication)
        )
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
