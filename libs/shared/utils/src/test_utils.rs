use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::{AppConfig, Environment, SchemaCapabilities};
use shared_models::{Appointment, AppointmentStatus, Patient, PracticeEmrSettings, User};

pub const TEST_ENCRYPTION_KEY: &str = "test-emr-credentials-key-not-for-production";

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub encryption_key: Option<String>,
    pub mindbody_base_url: String,
    pub schema_version: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "test-service-role-key".to_string(),
            encryption_key: Some(TEST_ENCRYPTION_KEY.to_string()),
            mindbody_base_url: "http://localhost:9090/public/v6".to_string(),
            schema_version: SchemaCapabilities::LATEST_VERSION,
        }
    }
}

impl TestConfig {
    /// Points both Supabase and Mindbody at one mock server.
    pub fn with_mock_server(uri: &str) -> Self {
        Self {
            supabase_url: uri.to_string(),
            mindbody_base_url: uri.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            environment: Environment::Development,
            credentials_encryption_key: self.encryption_key.clone(),
            allow_insecure_dev_key: false,
            emr_request_timeout_secs: 5,
            emr_check_timeout_secs: 2,
            mindbody_base_url: self.mindbody_base_url.clone(),
            schema_capabilities: SchemaCapabilities::for_version(self.schema_version),
            sync_batch_size: 10,
        }
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl TestUser {
    pub fn new(id: Uuid, email: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    /// The practice account that owns credentials.
    pub fn practice(practice_id: Uuid) -> Self {
        Self::new(practice_id, "frontdesk@clinic.example.com", "practice")
    }

    pub fn admin() -> Self {
        Self::new(Uuid::new_v4(), "admin@example.com", "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct TestFixtures;

impl TestFixtures {
    pub fn patient(practice_id: Uuid, email: &str) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            practice_id,
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: Some(email.to_string()),
            phone: Some("+1 (555) 010-2030".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1988, 4, 12),
            mindbody_client_id: None,
            nextech_patient_id: None,
            modmed_patient_id: None,
        }
    }

    /// A scheduled 30 minute appointment two days out.
    pub fn appointment(practice_id: Uuid, patient_id: Uuid) -> Appointment {
        let start = Utc::now() + Duration::days(2);
        Appointment {
            id: Uuid::new_v4(),
            practice_id,
            patient_id,
            start_time: start,
            end_time: start + Duration::minutes(30),
            status: AppointmentStatus::Scheduled,
            notes: Some("New patient consultation".to_string()),
            emr_appointment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn settings(practice_id: Uuid) -> PracticeEmrSettings {
        PracticeEmrSettings {
            practice_id,
            ..Default::default()
        }
    }

    pub fn nextech_credentials(base_url: &str) -> Value {
        json!({
            "baseUrl": base_url,
            "username": "frontdesk",
            "password": "nextech-password",
        })
    }

    pub fn modmed_credentials(base_url: &str) -> Value {
        json!({
            "baseUrl": base_url,
            "clientId": "modmed-client",
            "clientSecret": "modmed-secret",
        })
    }

    pub fn mindbody_credentials() -> Value {
        json!({
            "apiKey": "mb-api-key",
            "username": "owner",
            "password": "mindbody-password",
            "siteId": "-99",
        })
    }
}

/// Canned third-party payloads for wiremock.
pub struct MockProviderResponses;

impl MockProviderResponses {
    pub fn oauth_token(token: &str, expires_in: i64) -> Value {
        json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": expires_in
        })
    }

    pub fn data_list(items: &[(&str, &str)]) -> Value {
        let data: Vec<Value> = items
            .iter()
            .map(|(id, name)| json!({"id": id, "name": name}))
            .collect();
        json!({ "data": data })
    }

    pub fn mindbody_token(token: &str) -> Value {
        json!({
            "TokenType": "Bearer",
            "AccessToken": token,
            "User": {"Id": 1, "FirstName": "Site", "LastName": "Owner", "Type": "Owner"}
        })
    }

    pub fn mindbody_sites(site_id: i64) -> Value {
        json!({
            "PaginationResponse": {"RequestedLimit": 100, "RequestedOffset": 0, "PageSize": 1, "TotalResults": 1},
            "Sites": [{"Id": site_id, "Name": "Demo Spa"}]
        })
    }

    pub fn mindbody_clients(clients: &[(&str, &str)]) -> Value {
        let clients: Vec<Value> = clients
            .iter()
            .map(|(id, email)| json!({"Id": id, "Email": email, "FirstName": "Jane", "LastName": "Doe"}))
            .collect();
        json!({ "Clients": clients })
    }

    pub fn mindbody_error(code: &str, message: &str) -> Value {
        json!({
            "Error": {
                "Message": message,
                "Code": code
            }
        })
    }

    pub fn oauth_error(error: &str, description: &str) -> Value {
        json!({
            "error": error,
            "error_description": description
        })
    }
}
