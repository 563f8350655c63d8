// libs/shared/database/tests/postgrest_test.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::SchemaCapabilities;
use shared_database::{
    AppointmentStore, CredentialStore, LinkOutcome, PatientStore, StoreError, SupabaseClient, SupabaseStore,
};
use shared_models::{CredentialRecord, EmrProvider, OwnerType};
use shared_utils::test_utils::{TestConfig, TestFixtures};

async fn setup(schema_version: u32) -> (MockServer, SupabaseStore) {
    let server = MockServer::start().await;
    let config = TestConfig {
        schema_version,
        ..TestConfig::with_mock_server(&server.uri())
    }
    .to_app_config();
    let store = SupabaseStore::with_client(Arc::new(SupabaseClient::new(&config)), config.schema_capabilities);
    (server, store)
}

fn patient_row(id: Uuid, nextech_patient_id: Option<&str>) -> Value {
    let mut patient = TestFixtures::patient(Uuid::new_v4(), "jane.doe@example.com");
    patient.id = id;
    patient.nextech_patient_id = nextech_patient_id.map(str::to_string);
    serde_json::to_value(patient).unwrap()
}

fn credential(owner_id: Uuid) -> CredentialRecord {
    let now = Utc::now();
    CredentialRecord {
        id: Uuid::new_v4(),
        owner_id,
        owner_type: OwnerType::Practice,
        provider: EmrProvider::Modmed,
        label: None,
        encrypted_blob: "opaque".to_string(),
        fingerprint: "f".repeat(64),
        is_valid: true,
        last_validated_at: Some(now),
        validation_error: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_link_writes_only_empty_slot() {
    let (server, store) = setup(SchemaCapabilities::LATEST_VERSION).await;
    let patient_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", patient_id)))
        .and(query_param("nextech_patient_id", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([patient_row(patient_id, Some("NX-1"))])))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = store.link_external_id(patient_id, EmrProvider::Nextech, "NX-1").await.unwrap();

    assert_eq!(outcome, LinkOutcome::Linked);
}

#[tokio::test]
async fn test_link_reports_existing_id() {
    let (server, store) = setup(SchemaCapabilities::LATEST_VERSION).await;
    let patient_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", patient_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([patient_row(patient_id, Some("NX-OLD"))])))
        .mount(&server)
        .await;

    let outcome = store.link_external_id(patient_id, EmrProvider::Nextech, "NX-NEW").await.unwrap();

    assert_eq!(outcome, LinkOutcome::AlreadyLinked("NX-OLD".to_string()));
}

#[tokio::test]
async fn test_old_schema_skips_unsupported_link() {
    let (server, store) = setup(1).await;

    let outcome = store
        .link_external_id(Uuid::new_v4(), EmrProvider::Modmed, "MM-1")
        .await
        .unwrap();

    assert_eq!(outcome, LinkOutcome::Unsupported);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_insert_omits_validation_columns_on_old_schema() {
    let (server, store) = setup(1).await;
    let record = credential(Uuid::new_v4());
    let mut returned = serde_json::to_value(&record).unwrap();
    for column in ["is_valid", "last_validated_at", "validation_error"] {
        returned.as_object_mut().unwrap().remove(column);
    }

    Mock::given(method("POST"))
        .and(path("/rest/v1/emr_credentials"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([returned])))
        .mount(&server)
        .await;

    let stored = store.insert(record).await.unwrap();
    // Rows without validation columns read back as valid.
    assert!(stored.is_valid);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("is_valid").is_none());
    assert!(body.get("fingerprint").is_some());
}

#[tokio::test]
async fn test_unique_violation_is_conflict() {
    let (server, store) = setup(SchemaCapabilities::LATEST_VERSION).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/emr_credentials"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"emr_credentials_fingerprint_key\""
        })))
        .mount(&server)
        .await;

    let err = store.insert(credential(Uuid::new_v4())).await.unwrap_err();

    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn test_latest_valid_filters_provider_and_validity() {
    let (server, store) = setup(SchemaCapabilities::LATEST_VERSION).await;
    let owner_id = Uuid::new_v4();
    let record = credential(owner_id);

    Mock::given(method("GET"))
        .and(path("/rest/v1/emr_credentials"))
        .and(query_param("owner_id", format!("eq.{}", owner_id)))
        .and(query_param("provider", "eq.MODMED"))
        .and(query_param("is_valid", "is.true"))
        .and(query_param("order", "created_at.desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([record])))
        .expect(1)
        .mount(&server)
        .await;

    let found = store.latest_valid(owner_id, Some(EmrProvider::Modmed)).await.unwrap();

    assert_eq!(found.map(|r| r.id), Some(record.id));
}

#[tokio::test]
async fn test_unsynced_appointments_query() {
    let (server, store) = setup(SchemaCapabilities::LATEST_VERSION).await;
    let appointment = TestFixtures::appointment(Uuid::new_v4(), Uuid::new_v4());

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("emr_appointment_id", "is.null"))
        .and(query_param("status", "in.(scheduled,confirmed)"))
        .and(query_param("limit", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment])))
        .mount(&server)
        .await;

    let pending = store.list_unsynced(25).await.unwrap();

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, appointment.id);
}

#[tokio::test]
async fn test_emr_id_on_missing_appointment_is_not_found() {
    let (server, store) = setup(SchemaCapabilities::LATEST_VERSION).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = store.set_emr_appointment_id(Uuid::new_v4(), "APT-1").await.unwrap_err();

    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_oldest_schema_still_records_emr_appointment_id() {
    let (server, store) = setup(1).await;
    let appointment_id = Uuid::new_v4();
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(body_partial_json(json!({"emr_appointment_id": "APT-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": appointment_id}])))
        .expect(1)
        .mount(&server)
        .await;

    store.set_emr_appointment_id(appointment_id, "APT-1").await.unwrap();
}
