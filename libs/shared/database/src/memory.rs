use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::{
    Appointment, CredentialRecord, EmrProvider, Patient, PracticeEmrSettings,
};

use crate::store::{
    AppointmentStore, CredentialStore, LinkOutcome, PatientStore, PracticeStore, StoreError,
};

/// Process-local implementation of every store trait. Used by tests and by
/// development runs without a database.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    credentials: Arc<RwLock<HashMap<Uuid, CredentialRecord>>>,
    patients: Arc<RwLock<HashMap<Uuid, Patient>>>,
    appointments: Arc<RwLock<HashMap<Uuid, Appointment>>>,
    settings: Arc<RwLock<HashMap<Uuid, PracticeEmrSettings>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_patient(&self, patient: Patient) {
        self.patients.write().await.insert(patient.id, patient);
    }

    pub async fn put_appointment(&self, appointment: Appointment) {
        self.appointments.write().await.insert(appointment.id, appointment);
    }

    pub async fn put_settings(&self, settings: PracticeEmrSettings) {
        self.settings.write().await.insert(settings.practice_id, settings);
    }

    pub async fn credential_count(&self) -> usize {
        self.credentials.read().await.len()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn insert(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError> {
        let mut credentials = self.credentials.write().await;

        if credentials.values().any(|existing| existing.fingerprint == record.fingerprint) {
            return Err(StoreError::Conflict("fingerprint already exists".to_string()));
        }

        debug!("Inserting credential {} for owner {}", record.id, record.owner_id);
        credentials.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError> {
        let mut credentials = self.credentials.write().await;

        if !credentials.contains_key(&record.id) {
            return Err(StoreError::NotFound(format!("credential {}", record.id)));
        }

        if credentials
            .values()
            .any(|existing| existing.id != record.id && existing.fingerprint == record.fingerprint)
        {
            return Err(StoreError::Conflict("fingerprint already exists".to_string()));
        }

        credentials.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.credentials.read().await.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<CredentialRecord>, StoreError> {
        let mut records: Vec<CredentialRecord> = self
            .credentials
            .read()
            .await
            .values()
            .filter(|record| record.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self
            .credentials
            .read()
            .await
            .values()
            .find(|record| record.fingerprint == fingerprint)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.credentials.write().await.remove(&id).is_some())
    }

    async fn latest_valid(
        &self,
        owner_id: Uuid,
        provider: Option<EmrProvider>,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self
            .credentials
            .read()
            .await
            .values()
            .filter(|record| record.owner_id == owner_id && record.is_valid)
            .filter(|record| provider.map_or(true, |p| record.provider == p))
            .max_by_key(|record| record.created_at)
            .cloned())
    }
}

#[async_trait]
impl PatientStore for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>, StoreError> {
        Ok(self.patients.read().await.get(&id).cloned())
    }

    async fn link_external_id(
        &self,
        patient_id: Uuid,
        provider: EmrProvider,
        external_id: &str,
    ) -> Result<LinkOutcome, StoreError> {
        let mut patients = self.patients.write().await;
        let patient = patients
            .get_mut(&patient_id)
            .ok_or_else(|| StoreError::NotFound(format!("patient {}", patient_id)))?;

        let Some(slot) = patient.external_id_slot(provider) else {
            return Ok(LinkOutcome::Unsupported);
        };

        if let Some(existing) = slot.as_ref() {
            return Ok(LinkOutcome::AlreadyLinked(existing.clone()));
        }

        *slot = Some(external_id.to_string());
        Ok(LinkOutcome::Linked)
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn set_emr_appointment_id(
        &self,
        appointment_id: Uuid,
        emr_appointment_id: &str,
    ) -> Result<(), StoreError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(&appointment_id)
            .ok_or_else(|| StoreError::NotFound(format!("appointment {}", appointment_id)))?;

        appointment.emr_appointment_id = Some(emr_appointment_id.to_string());
        appointment.updated_at = Utc::now();
        Ok(())
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<Appointment>, StoreError> {
        let mut pending: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|appointment| !appointment.is_synced() && appointment.status.is_bookable())
            .cloned()
            .collect();
        pending.sort_by_key(|appointment| appointment.start_time);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl PracticeStore for InMemoryStore {
    async fn emr_settings(
        &self,
        practice_id: Uuid,
    ) -> Result<Option<PracticeEmrSettings>, StoreError> {
        Ok(self.settings.read().await.get(&practice_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shared_models::{AppointmentStatus, OwnerType};

    fn credential(owner_id: Uuid, provider: EmrProvider, fingerprint: &str) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            id: Uuid::new_v4(),
            owner_id,
            owner_type: OwnerType::Practice,
            provider,
            label: None,
            encrypted_blob: "blob".to_string(),
            fingerprint: fingerprint.to_string(),
            is_valid: true,
            last_validated_at: Some(now),
            validation_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn patient() -> Patient {
        Patient {
            id: Uuid::new_v4(),
            practice_id: Uuid::new_v4(),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: Some("grace@example.com".to_string()),
            phone: None,
            date_of_birth: None,
            mindbody_client_id: None,
            nextech_patient_id: None,
            modmed_patient_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_fingerprint() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();

        store.insert(credential(owner, EmrProvider::Nextech, "fp-1")).await.unwrap();
        let result = store.insert(credential(owner, EmrProvider::Nextech, "fp-1")).await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.credential_count().await, 1);
    }

    #[tokio::test]
    async fn test_latest_valid_prefers_newest_and_skips_invalid() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();

        let mut older = credential(owner, EmrProvider::Modmed, "fp-old");
        older.created_at = Utc::now() - Duration::days(2);
        let newer = credential(owner, EmrProvider::Modmed, "fp-new");
        let mut invalid = credential(owner, EmrProvider::Modmed, "fp-bad");
        invalid.is_valid = false;
        invalid.created_at = Utc::now() + Duration::minutes(1);

        store.insert(older).await.unwrap();
        let newer = store.insert(newer).await.unwrap();
        store.insert(invalid).await.unwrap();

        let found = store
            .latest_valid(owner, Some(EmrProvider::Modmed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
        assert!(store
            .latest_valid(owner, Some(EmrProvider::Nextech))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_link_external_id_is_set_once() {
        let store = InMemoryStore::new();
        let patient = patient();
        let patient_id = patient.id;
        store.put_patient(patient).await;

        let first = store
            .link_external_id(patient_id, EmrProvider::Nextech, "NX-1")
            .await
            .unwrap();
        let second = store
            .link_external_id(patient_id, EmrProvider::Nextech, "NX-2")
            .await
            .unwrap();

        assert_eq!(first, LinkOutcome::Linked);
        assert_eq!(second, LinkOutcome::AlreadyLinked("NX-1".to_string()));
        let stored = PatientStore::get(&store, patient_id).await.unwrap().unwrap();
        assert_eq!(stored.nextech_patient_id.as_deref(), Some("NX-1"));
    }

    #[tokio::test]
    async fn test_list_unsynced_skips_booked_and_cancelled() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let make = |status: AppointmentStatus, emr: Option<&str>, offset: i64| Appointment {
            id: Uuid::new_v4(),
            practice_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            start_time: now + Duration::hours(offset),
            end_time: now + Duration::hours(offset + 1),
            status,
            notes: None,
            emr_appointment_id: emr.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        let later = make(AppointmentStatus::Scheduled, None, 5);
        let sooner = make(AppointmentStatus::Confirmed, None, 1);
        store.put_appointment(later.clone()).await;
        store.put_appointment(sooner.clone()).await;
        store.put_appointment(make(AppointmentStatus::Scheduled, Some("R-1"), 2)).await;
        store.put_appointment(make(AppointmentStatus::Cancelled, None, 3)).await;

        let pending = store.list_unsynced(10).await.unwrap();
        let ids: Vec<Uuid> = pending.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![sooner.id, later.id]);
    }
}
