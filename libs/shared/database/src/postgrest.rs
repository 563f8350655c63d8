use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::{AppConfig, SchemaCapabilities};
use shared_models::{
    Appointment, CredentialRecord, EmrProvider, Patient, PracticeEmrSettings,
};

use crate::store::{
    AppointmentStore, CredentialStore, LinkOutcome, PatientStore, PracticeStore, StoreError,
};
use crate::supabase::SupabaseClient;

const CREDENTIALS: &str = "/rest/v1/emr_credentials";
const PATIENTS: &str = "/rest/v1/patients";
const APPOINTMENTS: &str = "/rest/v1/appointments";
const PRACTICE_SETTINGS: &str = "/rest/v1/practice_emr_settings";

const VALIDATION_COLUMNS: [&str; 3] = ["is_valid", "last_validated_at", "validation_error"];

/// Store backed by Supabase tables. Column usage follows the schema
/// capabilities resolved at startup.
pub struct SupabaseStore {
    supabase: Arc<SupabaseClient>,
    capabilities: SchemaCapabilities,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            capabilities: config.schema_capabilities,
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, capabilities: SchemaCapabilities) -> Self {
        Self { supabase, capabilities }
    }

    fn credential_row(&self, record: &CredentialRecord) -> Result<Value, StoreError> {
        let mut row = serde_json::to_value(record)?;
        if !self.capabilities.credential_validation_columns {
            if let Some(columns) = row.as_object_mut() {
                for column in VALIDATION_COLUMNS {
                    columns.remove(column);
                }
            }
        }
        Ok(row)
    }

    fn supports_link(&self, provider: EmrProvider) -> bool {
        match provider {
            EmrProvider::Mindbody => true,
            EmrProvider::Nextech => self.capabilities.nextech_patient_link,
            EmrProvider::Modmed => self.capabilities.modmed_patient_link,
            EmrProvider::Patientnow => false,
        }
    }

    async fn first<T>(&self, path: &str) -> Result<Option<T>, StoreError>
    where T: serde::de::DeserializeOwned {
        let rows: Vec<T> = self.supabase.request(Method::GET, path, None).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl CredentialStore for SupabaseStore {
    async fn insert(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError> {
        let row = self.credential_row(&record)?;
        let inserted: Vec<CredentialRecord> = self
            .supabase
            .request_returning(Method::POST, CREDENTIALS, Some(row))
            .await?;

        inserted
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Database("insert returned no rows".to_string()))
    }

    async fn update(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError> {
        let path = format!("{}?id=eq.{}", CREDENTIALS, record.id);
        let row = self.credential_row(&record)?;
        let updated: Vec<CredentialRecord> = self
            .supabase
            .request_returning(Method::PATCH, &path, Some(row))
            .await?;

        updated
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", record.id)))
    }

    async fn get(&self, id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        self.first(&format!("{}?id=eq.{}&limit=1", CREDENTIALS, id)).await
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<CredentialRecord>, StoreError> {
        let path = format!("{}?owner_id=eq.{}&order=created_at.desc", CREDENTIALS, owner_id);
        self.supabase.request(Method::GET, &path, None).await
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.first(&format!("{}?fingerprint=eq.{}&limit=1", CREDENTIALS, fingerprint)).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}", CREDENTIALS, id);
        let removed: Vec<Value> = self
            .supabase
            .request_returning(Method::DELETE, &path, None)
            .await?;
        Ok(!removed.is_empty())
    }

    async fn latest_valid(
        &self,
        owner_id: Uuid,
        provider: Option<EmrProvider>,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let mut path = format!("{}?owner_id=eq.{}", CREDENTIALS, owner_id);
        if let Some(provider) = provider {
            path.push_str(&format!("&provider=eq.{}", provider.as_str()));
        }
        if self.capabilities.credential_validation_columns {
            path.push_str("&is_valid=is.true");
        }
        path.push_str("&order=created_at.desc&limit=1");

        self.first(&path).await
    }
}

#[async_trait]
impl PatientStore for SupabaseStore {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>, StoreError> {
        self.first(&format!("{}?id=eq.{}&limit=1", PATIENTS, id)).await
    }

    async fn link_external_id(
        &self,
        patient_id: Uuid,
        provider: EmrProvider,
        external_id: &str,
    ) -> Result<LinkOutcome, StoreError> {
        let column = match Patient::external_id_column(provider) {
            Some(column) if self.supports_link(provider) => column,
            _ => {
                warn!(
                    "Schema v{} has no {} patient link column, skipping link for patient {}",
                    self.capabilities.version, provider, patient_id
                );
                return Ok(LinkOutcome::Unsupported);
            }
        };

        // The is.null filter makes the write set-once even under concurrent bookings.
        let path = format!("{}?id=eq.{}&{}=is.null", PATIENTS, patient_id, column);
        let updated: Vec<Patient> = self
            .supabase
            .request_returning(Method::PATCH, &path, Some(json!({ column: external_id })))
            .await?;

        if !updated.is_empty() {
            debug!("Linked patient {} to {} id {}", patient_id, provider, external_id);
            return Ok(LinkOutcome::Linked);
        }

        let patient = PatientStore::get(self, patient_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("patient {}", patient_id)))?;

        match patient.external_id(provider) {
            Some(existing) => Ok(LinkOutcome::AlreadyLinked(existing.to_string())),
            None => Err(StoreError::Database(format!(
                "link of patient {} to {} affected no rows",
                patient_id, provider
            ))),
        }
    }
}

#[async_trait]
impl AppointmentStore for SupabaseStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.first(&format!("{}?id=eq.{}&limit=1", APPOINTMENTS, id)).await
    }

    async fn set_emr_appointment_id(
        &self,
        appointment_id: Uuid,
        emr_appointment_id: &str,
    ) -> Result<(), StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS, appointment_id);
        let updated: Vec<Value> = self
            .supabase
            .request_returning(
                Method::PATCH,
                &path,
                Some(json!({
                    "emr_appointment_id": emr_appointment_id,
                    "updated_at": Utc::now(),
                })),
            )
            .await?;

        if updated.is_empty() {
            return Err(StoreError::NotFound(format!("appointment {}", appointment_id)));
        }
        Ok(())
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "{}?emr_appointment_id=is.null&status=in.(scheduled,confirmed)&order=start_time.asc&limit={}",
            APPOINTMENTS, limit
        );
        self.supabase.request(Method::GET, &path, None).await
    }
}

#[async_trait]
impl PracticeStore for SupabaseStore {
    async fn emr_settings(
        &self,
        practice_id: Uuid,
    ) -> Result<Option<PracticeEmrSettings>, StoreError> {
        self.first(&format!("{}?practice_id=eq.{}&limit=1", PRACTICE_SETTINGS, practice_id))
            .await
    }
}
