// libs/emr-cell/src/services/orchestrator.rs
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_database::{AppointmentStore, LinkOutcome, PatientStore, PracticeStore, StoreError};
use shared_models::{Appointment, EmrProvider, Patient, PracticeEmrSettings};

use crate::error::EmrError;
use crate::models::{
    BookingOutcome, BookingParams, BookingRequest, FailureKind, PartialBookingParams, PatientData,
    SyncStatus, SyncTrigger,
};
use crate::services::providers::{AdapterRegistry, EmrAdapter};
use crate::services::vault::CredentialVault;

/// Early exit from a sync attempt. Every branch ends in a terminal outcome.
type Step<T> = Result<T, BookingOutcome>;

/// Pushes local appointments into the practice's EMR.
///
/// Sync is a best-effort side effect: no outcome here ever modifies or cancels
/// the local appointment, it only links ids once the remote side has them.
pub struct EmrBookingOrchestrator {
    vault: Arc<CredentialVault>,
    adapters: AdapterRegistry,
    patients: Arc<dyn PatientStore>,
    appointments: Arc<dyn AppointmentStore>,
    practices: Arc<dyn PracticeStore>,
}

/// Counts from one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub booked: usize,
    pub skipped: usize,
    pub failed: usize,
    pub fatal: usize,
}

impl SyncSummary {
    pub fn record(&mut self, outcome: &BookingOutcome) {
        match outcome.status {
            SyncStatus::Booked => self.booked += 1,
            SyncStatus::Skipped => self.skipped += 1,
            SyncStatus::Failed => {
                self.failed += 1;
                if outcome.is_fatal() {
                    self.fatal += 1;
                }
            }
        }
    }

    pub fn total(&self) -> usize {
        self.booked + self.skipped + self.failed
    }
}

impl EmrBookingOrchestrator {
    pub fn new(
        vault: Arc<CredentialVault>,
        adapters: AdapterRegistry,
        patients: Arc<dyn PatientStore>,
        appointments: Arc<dyn AppointmentStore>,
        practices: Arc<dyn PracticeStore>,
    ) -> Self {
        Self {
            vault,
            adapters,
            patients,
            appointments,
            practices,
        }
    }

    #[instrument(skip(self))]
    pub async fn sync_appointment(&self, appointment_id: Uuid, trigger: SyncTrigger) -> BookingOutcome {
        let outcome = match self.run(appointment_id, trigger).await {
            Ok(outcome) | Err(outcome) => outcome,
        };

        match outcome.status {
            SyncStatus::Booked => info!(
                "Appointment {} booked in {:?} as {:?}",
                appointment_id, outcome.provider, outcome.remote_appointment_id
            ),
            SyncStatus::Skipped => debug!(
                "Appointment {} not synced: {}",
                appointment_id,
                outcome.error.as_deref().unwrap_or_default()
            ),
            SyncStatus::Failed => {}
        }
        outcome
    }

    /// Syncs up to `limit` unsynced appointments concurrently.
    pub async fn sync_pending(&self, limit: usize) -> Result<Vec<(Uuid, BookingOutcome)>, StoreError> {
        let pending = self.appointments.list_unsynced(limit).await?;
        info!("Found {} unsynced appointments", pending.len());

        let attempts = pending.iter().map(|appointment| async move {
            let outcome = self.sync_appointment(appointment.id, SyncTrigger::Created).await;
            (appointment.id, outcome)
        });

        Ok(join_all(attempts).await)
    }

    async fn run(&self, appointment_id: Uuid, trigger: SyncTrigger) -> Step<BookingOutcome> {
        let appointment = self.load_appointment(appointment_id).await?;

        if appointment.is_synced() {
            // Remote rescheduling is not supported; never book a second time.
            return Ok(BookingOutcome::skipped(match trigger {
                SyncTrigger::Updated => "appointment already synced; remote updates are not supported",
                SyncTrigger::Created => "appointment already synced",
            }));
        }
        if !appointment.status.is_bookable() {
            return Ok(BookingOutcome::skipped(format!(
                "appointment status {:?} is not bookable",
                appointment.status
            )));
        }

        let settings = self
            .practices
            .emr_settings(appointment.practice_id)
            .await
            .map_err(|e| fail(None, FailureKind::Storage, e))?
            .unwrap_or_else(|| PracticeEmrSettings {
                practice_id: appointment.practice_id,
                ..Default::default()
            });

        // ResolveCredential
        let Some(record) = self
            .vault
            .find_active(appointment.practice_id, settings.provider)
            .await
            .map_err(|e| fail(settings.provider, FailureKind::Storage, e))?
        else {
            return Ok(BookingOutcome::skipped("practice has no active EMR credential"));
        };
        let provider = record.provider;

        let Some(adapter) = self.adapters.get(provider) else {
            return Ok(BookingOutcome::skipped(
                EmrError::UnsupportedProvider(provider).to_string(),
            ));
        };

        // DecryptCredential
        let credentials = self
            .vault
            .decrypt_credentials(&record)
            .map_err(|e| {
                fail(Some(provider), FailureKind::Decryption, format!("credential {}: {}", record.id, e))
            })?;

        // EnsureRemotePatient
        let patient = self.load_patient(appointment.patient_id, provider).await?;
        let external_patient_id = self
            .ensure_remote_patient(adapter.as_ref(), &credentials, &patient)
            .await?;

        // ResolveBookingParams
        let params = self
            .booking_params(adapter.as_ref(), &credentials, &settings)
            .await?;

        // Book
        let request = BookingRequest {
            external_patient_id,
            provider_id: Some(params.provider_id),
            location_id: Some(params.location_id),
            appointment_type_id: Some(params.appointment_type_id),
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            notes: appointment.notes.clone(),
        };

        let result = adapter
            .book_appointment(&credentials, &request)
            .await
            .map_err(|e| adapter_failure(provider, FailureKind::Booking, e))?;

        let remote_id = match (result.success, result.remote_appointment_id) {
            (true, Some(remote_id)) => remote_id,
            (_, _) => {
                let reason = result
                    .error
                    .unwrap_or_else(|| "remote system returned no appointment id".to_string());
                return Err(fail(Some(provider), FailureKind::Booking, reason));
            }
        };

        self.appointments
            .set_emr_appointment_id(appointment.id, &remote_id)
            .await
            .map_err(|e| {
                error!(
                    "Appointment {} was booked remotely as {} but the id could not be saved: {}",
                    appointment.id, remote_id, e
                );
                BookingOutcome::failed(Some(provider), FailureKind::Storage, e.to_string())
            })?;

        Ok(BookingOutcome::booked(provider, remote_id))
    }

    async fn load_appointment(&self, id: Uuid) -> Step<Appointment> {
        self.appointments
            .get(id)
            .await
            .map_err(|e| fail(None, FailureKind::Storage, e))?
            .ok_or_else(|| fail(None, FailureKind::NotFound, format!("appointment {} not found", id)))
    }

    async fn load_patient(&self, id: Uuid, provider: EmrProvider) -> Step<Patient> {
        self.patients
            .get(id)
            .await
            .map_err(|e| fail(Some(provider), FailureKind::Storage, e))?
            .ok_or_else(|| fail(Some(provider), FailureKind::NotFound, format!("patient {} not found", id)))
    }

    /// Reuses the stored link, or provisions remotely and links once.
    async fn ensure_remote_patient(
        &self,
        adapter: &dyn EmrAdapter,
        credentials: &Value,
        patient: &Patient,
    ) -> Step<String> {
        let provider = adapter.provider();

        if let Some(existing) = patient.external_id(provider) {
            debug!("Patient {} already linked to {} {}", patient.id, provider, existing);
            return Ok(existing.to_string());
        }

        let data = PatientData::from_patient(patient).ok_or_else(|| {
            fail(
                Some(provider),
                FailureKind::PatientProvisioning,
                format!("patient {} has no email address", patient.id),
            )
        })?;

        let external_id = adapter
            .find_or_create_patient(credentials, &data)
            .await
            .map_err(|e| adapter_failure(provider, FailureKind::PatientProvisioning, e))?;

        let link = self
            .patients
            .link_external_id(patient.id, provider, &external_id)
            .await
            .map_err(|e| fail(Some(provider), FailureKind::Storage, e))?;

        match link {
            LinkOutcome::Linked => {
                info!("Linked patient {} to {} {}", patient.id, provider, external_id);
                Ok(external_id)
            }
            LinkOutcome::AlreadyLinked(existing) if existing == external_id => Ok(external_id),
            LinkOutcome::AlreadyLinked(existing) => Err(fail(
                Some(provider),
                FailureKind::PatientLinkConflict,
                format!(
                    "patient {} is linked to {} {} but the remote lookup returned {}",
                    patient.id, provider, existing, external_id
                ),
            )),
            LinkOutcome::Unsupported => {
                warn!("Schema cannot store {} patient ids; booking without a link", provider);
                Ok(external_id)
            }
        }
    }

    /// Stored practice defaults win; the remote lists only fill the gaps.
    async fn booking_params(
        &self,
        adapter: &dyn EmrAdapter,
        credentials: &Value,
        settings: &PracticeEmrSettings,
    ) -> Step<BookingParams> {
        let partial = PartialBookingParams {
            provider_id: settings.default_provider_id.clone(),
            location_id: settings.default_location_id.clone(),
            appointment_type_id: settings.default_appointment_type_id.clone(),
        };

        if let Some(params) = partial.complete() {
            return Ok(params);
        }

        adapter
            .resolve_booking_params(credentials, &partial)
            .await
            .map_err(|e| adapter_failure(adapter.provider(), FailureKind::BookingParams, e))
    }
}

/// Authentication errors from an adapter are fatal whatever step raised them.
fn adapter_failure(provider: EmrProvider, kind: FailureKind, err: EmrError) -> BookingOutcome {
    let kind = if err.is_authentication() {
        FailureKind::Authentication
    } else {
        kind
    };
    fail(Some(provider), kind, err)
}

fn fail(provider: Option<EmrProvider>, kind: FailureKind, err: impl ToString) -> BookingOutcome {
    let outcome = BookingOutcome::failed(provider, kind, err.to_string());
    let message = outcome.error.as_deref().unwrap_or_default();

    if outcome.is_fatal() {
        error!(failure_kind = ?kind, provider = ?provider, "EMR sync failed: {}", message);
    } else {
        warn!(failure_kind = ?kind, provider = ?provider, "EMR sync failed: {}", message);
    }
    outcome
}
