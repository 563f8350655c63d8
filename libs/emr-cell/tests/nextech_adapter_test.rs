// libs/emr-cell/tests/nextech_adapter_test.rs
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use emr_cell::models::{BookingRequest, PartialBookingParams, PatientData, TokenKey};
use emr_cell::services::providers::{EmrAdapter, NextechAdapter, ProviderHttp};
use emr_cell::services::token_cache::{InMemoryTokenCache, TokenCache};
use emr_cell::EmrError;
use shared_utils::test_utils::{MockProviderResponses, TestFixtures};

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    server: MockServer,
    tokens: Arc<InMemoryTokenCache>,
    adapter: NextechAdapter,
}

impl TestSetup {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let tokens = Arc::new(InMemoryTokenCache::new());
        let http = Arc::new(ProviderHttp::new(Duration::from_secs(2)).unwrap());
        let adapter = NextechAdapter::new(http, tokens.clone());
        Self { server, tokens, adapter }
    }

    fn credentials(&self) -> Value {
        TestFixtures::nextech_credentials(&self.server.uri())
    }

    async fn mount_token(&self, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=frontdesk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(MockProviderResponses::oauth_token("nx-token", 3600)))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    async fn mount_list(&self, resource: &str, items: &[(&str, &str)]) {
        Mock::given(method("GET"))
            .and(path(format!("/api/{}", resource)))
            .and(header("authorization", "Bearer nx-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(MockProviderResponses::data_list(items)))
            .mount(&self.server)
            .await;
    }
}

fn patient_data() -> PatientData {
    PatientData::from_patient(&TestFixtures::patient(Uuid::new_v4(), "jane.doe@example.com")).unwrap()
}

fn booking_request() -> BookingRequest {
    let start = Utc::now() + chrono::Duration::days(1);
    BookingRequest {
        external_patient_id: "NX-100".to_string(),
        provider_id: Some("DR-1".to_string()),
        location_id: Some("LOC-1".to_string()),
        appointment_type_id: Some("TYPE-2".to_string()),
        start_time: start,
        end_time: start + chrono::Duration::minutes(30),
        notes: Some("First visit".to_string()),
    }
}

// ==============================================================================
// CREDENTIAL CHECK
// ==============================================================================

#[tokio::test]
async fn test_check_credentials_reads_providers() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    setup.mount_list("providers", &[("DR-1", "Dr. Smith")]).await;

    let check = setup.adapter.check_credentials(&setup.credentials()).await;

    assert!(check.ok, "unexpected failure: {:?}", check.message);
}

#[tokio::test]
async fn test_check_credentials_reports_rejected_password() {
    let setup = TestSetup::new().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(MockProviderResponses::oauth_error("invalid_grant", "bad password")),
        )
        .mount(&setup.server)
        .await;

    let check = setup.adapter.check_credentials(&setup.credentials()).await;

    assert!(!check.ok);
    assert!(check.message.unwrap().contains("bad password"));
}

#[tokio::test]
async fn test_token_without_access_is_a_failed_check() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    Mock::given(method("GET"))
        .and(path("/api/providers"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&setup.server)
        .await;

    let check = setup.adapter.check_credentials(&setup.credentials()).await;

    assert!(!check.ok);
}

#[tokio::test]
async fn test_slow_remote_is_unreachable() {
    let setup = TestSetup::new().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockProviderResponses::oauth_token("nx-token", 3600))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&setup.server)
        .await;

    let err = setup
        .adapter
        .find_or_create_patient(&setup.credentials(), &patient_data())
        .await
        .unwrap_err();

    assert_matches!(err, EmrError::RemoteUnreachable { .. });
}

// ==============================================================================
// PATIENT PROVISIONING
// ==============================================================================

#[tokio::test]
async fn test_existing_patient_is_matched_case_insensitively() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    Mock::given(method("GET"))
        .and(path("/api/patients"))
        .and(query_param("email", "jane.doe@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": 7, "email": "jane.doe@example.com.au"},
                {"id": 100, "email": "Jane.Doe@Example.com"}
            ]
        })))
        .mount(&setup.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/patients"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&setup.server)
        .await;

    let id = setup
        .adapter
        .find_or_create_patient(&setup.credentials(), &patient_data())
        .await
        .unwrap();

    assert_eq!(id, "100");
}

#[tokio::test]
async fn test_new_patient_created_once_with_normalized_fields() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;

    // First search finds nothing, later searches see the created record.
    Mock::given(method("GET"))
        .and(path("/api/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .up_to_n_times(1)
        .mount(&setup.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "NX-555", "email": "jane.doe@example.com"}]
        })))
        .mount(&setup.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/patients"))
        .and(body_partial_json(json!({
            "first_name": "Jane",
            "email": "jane.doe@example.com",
            "phone": "15550102030",
            "date_of_birth": "1988-04-12"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "NX-555"})))
        .expect(1)
        .mount(&setup.server)
        .await;

    let first = setup
        .adapter
        .find_or_create_patient(&setup.credentials(), &patient_data())
        .await
        .unwrap();
    let second = setup
        .adapter
        .find_or_create_patient(&setup.credentials(), &patient_data())
        .await
        .unwrap();

    assert_eq!(first, "NX-555");
    assert_eq!(first, second);
}

// ==============================================================================
// BOOKING PARAMETERS
// ==============================================================================

#[tokio::test]
async fn test_resolve_prefers_consult_type() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    setup.mount_list("providers", &[("DR-1", "Dr. Smith"), ("DR-2", "Dr. Jones")]).await;
    setup.mount_list("locations", &[("LOC-1", "Downtown")]).await;
    setup
        .mount_list("appointment-types", &[("TYPE-1", "Botox Follow-up"), ("TYPE-2", "Consult Visit")])
        .await;

    let params = setup
        .adapter
        .resolve_booking_params(&setup.credentials(), &PartialBookingParams::default())
        .await
        .unwrap();

    assert_eq!(params.provider_id, "DR-1");
    assert_eq!(params.location_id, "LOC-1");
    assert_eq!(params.appointment_type_id, "TYPE-2");
}

#[tokio::test]
async fn test_resolve_keeps_supplied_values() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    setup.mount_list("appointment-types", &[("TYPE-1", "Laser"), ("TYPE-2", "Peel")]).await;

    let partial = PartialBookingParams {
        provider_id: Some("DR-9".to_string()),
        location_id: Some("LOC-9".to_string()),
        appointment_type_id: None,
    };
    let params = setup
        .adapter
        .resolve_booking_params(&setup.credentials(), &partial)
        .await
        .unwrap();

    assert_eq!(params.provider_id, "DR-9");
    assert_eq!(params.appointment_type_id, "TYPE-1");
}

#[tokio::test]
async fn test_resolve_fails_on_empty_locations() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    setup.mount_list("locations", &[]).await;

    let partial = PartialBookingParams {
        provider_id: Some("DR-1".to_string()),
        ..Default::default()
    };
    let err = setup
        .adapter
        .resolve_booking_params(&setup.credentials(), &partial)
        .await
        .unwrap_err();

    assert_matches!(err, EmrError::UnresolvableBookingParams { .. });
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn test_book_appointment_returns_remote_id() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    Mock::given(method("POST"))
        .and(path("/api/appointments"))
        .and(body_partial_json(json!({
            "patient_id": "NX-100",
            "provider_id": "DR-1",
            "appointment_type_id": "TYPE-2",
            "notes": "First visit"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001})))
        .expect(1)
        .mount(&setup.server)
        .await;

    let result = setup
        .adapter
        .book_appointment(&setup.credentials(), &booking_request())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.remote_appointment_id.as_deref(), Some("9001"));
}

#[tokio::test]
async fn test_remote_rejection_is_a_failed_result() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    Mock::given(method("POST"))
        .and(path("/api/appointments"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "Slot is no longer available"})))
        .mount(&setup.server)
        .await;

    let result = setup
        .adapter
        .book_appointment(&setup.credentials(), &booking_request())
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("Slot is no longer available"));
}

#[tokio::test]
async fn test_missing_param_is_reported_without_calling_remote() {
    let setup = TestSetup::new().await;
    setup.mount_token(0).await;

    let mut request = booking_request();
    request.location_id = None;
    let result = setup
        .adapter
        .book_appointment(&setup.credentials(), &request)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("locationId"));
}

#[tokio::test]
async fn test_auth_failure_propagates_and_drops_cached_token() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    Mock::given(method("POST"))
        .and(path("/api/appointments"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token revoked"})))
        .mount(&setup.server)
        .await;

    let err = setup
        .adapter
        .book_appointment(&setup.credentials(), &booking_request())
        .await
        .unwrap_err();

    assert_matches!(err, EmrError::AuthenticationFailed { .. });
    let key = TokenKey::new(setup.server.uri(), "frontdesk");
    assert!(setup.tokens.get(&key).is_none());
}

#[tokio::test]
async fn test_rejected_password_during_booking_is_auth_failure() {
    let setup = TestSetup::new().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(MockProviderResponses::oauth_error("invalid_grant", "bad password")),
        )
        .mount(&setup.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "APT-1"})))
        .expect(0)
        .mount(&setup.server)
        .await;

    let err = setup
        .adapter
        .book_appointment(&setup.credentials(), &booking_request())
        .await
        .unwrap_err();

    assert_matches!(err, EmrError::AuthenticationFailed { ref message } if message.contains("bad password"));
}

#[tokio::test]
async fn test_token_endpoint_outage_is_not_auth_failure() {
    let setup = TestSetup::new().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&setup.server)
        .await;

    let result = setup
        .adapter
        .book_appointment(&setup.credentials(), &booking_request())
        .await
        .unwrap();

    assert!(!result.success);
}

#[tokio::test]
async fn test_token_reused_across_calls() {
    let setup = TestSetup::new().await;
    setup.mount_token(1).await;
    setup.mount_list("providers", &[("DR-1", "Dr. Smith")]).await;
    setup.mount_list("locations", &[("LOC-1", "Downtown")]).await;
    setup.mount_list("appointment-types", &[("TYPE-1", "Consultation")]).await;

    for _ in 0..3 {
        setup
            .adapter
            .resolve_booking_params(&setup.credentials(), &PartialBookingParams::default())
            .await
            .unwrap();
    }

    assert_eq!(setup.tokens.len(), 1);
}
