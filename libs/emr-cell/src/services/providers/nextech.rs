// libs/emr-cell/src/services/providers/nextech.rs
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use shared_models::EmrProvider;

use crate::error::EmrError;
use crate::models::{
    BookingParams, BookingRequest, BookingResult, CredentialCheck, PartialBookingParams,
    PatientData, RemoteOption, TokenKey,
};
use crate::services::providers::{
    cached_token, consult_or_first, email_matches, first_option, id_string, into_booking_result,
    optional_str, required_str, token_expiry, EmrAdapter, ProviderHttp,
};
use crate::services::token_cache::TokenCache;

#[derive(Debug, Clone)]
struct NextechCredentials {
    base_url: String,
    username: String,
    password: String,
    client_id: Option<String>,
}

impl NextechCredentials {
    fn parse(raw: &Value) -> Result<Self, EmrError> {
        Ok(Self {
            base_url: required_str(raw, "baseUrl")?.trim_end_matches('/').to_string(),
            username: required_str(raw, "username")?,
            password: required_str(raw, "password")?,
            client_id: optional_str(raw, "clientId"),
        })
    }

    fn token_key(&self) -> TokenKey {
        TokenKey::new(self.base_url.clone(), self.username.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: Vec<Value>,
}

/// Nextech practice-management API client.
///
/// Authenticates with the OAuth resource-owner password grant; payloads are snake_case.
pub struct NextechAdapter {
    http: Arc<ProviderHttp>,
    tokens: Arc<dyn TokenCache>,
}

impl NextechAdapter {
    pub fn new(http: Arc<ProviderHttp>, tokens: Arc<dyn TokenCache>) -> Self {
        Self { http, tokens }
    }

    /// POST {baseUrl}/connect/token (grant_type=password)
    async fn issue_token(&self, creds: &NextechCredentials) -> Result<(String, chrono::DateTime<chrono::Utc>), EmrError> {
        let url = format!("{}/connect/token", creds.base_url);

        let mut form = vec![
            ("grant_type", "password"),
            ("username", creds.username.as_str()),
            ("password", creds.password.as_str()),
        ];
        if let Some(client_id) = creds.client_id.as_deref() {
            form.push(("client_id", client_id));
        }

        let response: TokenResponse = self
            .http
            .send_token_json(self.http.client().post(&url).form(&form), "Nextech token")
            .await?;

        Ok((response.access_token, token_expiry(response.expires_in)))
    }

    async fn authenticate(&self, creds: &NextechCredentials) -> Result<String, EmrError> {
        cached_token(self.tokens.as_ref(), &creds.token_key(), || self.issue_token(creds)).await
    }

    async fn get_list(
        &self,
        creds: &NextechCredentials,
        token: &str,
        resource: &str,
    ) -> Result<Vec<RemoteOption>, EmrError> {
        let url = format!("{}/api/{}", creds.base_url, resource);
        let response: ListResponse = self
            .http
            .send_json(self.http.client().get(&url).bearer_auth(token), "Nextech list")
            .await?;

        Ok(response
            .data
            .iter()
            .filter_map(|item| {
                Some(RemoteOption {
                    id: id_string(item.get("id")?)?,
                    name: item.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn find_patient(
        &self,
        creds: &NextechCredentials,
        token: &str,
        email: &str,
    ) -> Result<Option<String>, EmrError> {
        let url = format!("{}/api/patients", creds.base_url);
        let response: ListResponse = self
            .http
            .send_json(
                self.http.client().get(&url).bearer_auth(token).query(&[("email", email)]),
                "Nextech patient search",
            )
            .await?;

        Ok(response
            .data
            .iter()
            .find(|item| email_matches(item.get("email").and_then(Value::as_str), email))
            .and_then(|item| item.get("id").and_then(id_string)))
    }

    async fn create_patient(
        &self,
        creds: &NextechCredentials,
        token: &str,
        patient: &PatientData,
    ) -> Result<String, EmrError> {
        let url = format!("{}/api/patients", creds.base_url);
        let body = json!({
            "first_name": patient.first_name,
            "last_name": patient.last_name,
            "email": patient.email,
            "phone": patient.phone.as_deref().map(normalize_phone),
            "date_of_birth": patient.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
        });

        let created: Value = self
            .http
            .send_json(
                self.http.client().post(&url).bearer_auth(token).json(&body),
                "Nextech patient create",
            )
            .await?;

        created
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| EmrError::RemoteBusinessError {
                status: 200,
                message: "Nextech patient create returned no id".to_string(),
            })
    }

    async fn try_book(
        &self,
        creds: &NextechCredentials,
        request: &BookingRequest,
    ) -> Result<String, EmrError> {
        let token = self.authenticate(creds).await?;
        let url = format!("{}/api/appointments", creds.base_url);
        let body = json!({
            "patient_id": request.external_patient_id,
            "provider_id": request.provider_id,
            "location_id": request.location_id,
            "appointment_type_id": request.appointment_type_id,
            "start_time": request.start_time.to_rfc3339(),
            "end_time": request.end_time.to_rfc3339(),
            "notes": request.notes,
        });

        let created: Value = self
            .http
            .send_json(
                self.http.client().post(&url).bearer_auth(&token).json(&body),
                "Nextech appointment create",
            )
            .await?;

        created
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| EmrError::RemoteBusinessError {
                status: 200,
                message: "Nextech appointment create returned no id".to_string(),
            })
    }
}

/// Nextech only accepts digits in phone numbers.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[async_trait]
impl EmrAdapter for NextechAdapter {
    fn provider(&self) -> EmrProvider {
        EmrProvider::Nextech
    }

    #[instrument(skip(self, raw))]
    async fn check_credentials(&self, raw: &Value) -> CredentialCheck {
        let creds = match NextechCredentials::parse(raw) {
            Ok(creds) => creds,
            Err(e) => return CredentialCheck::failed(e.to_string()),
        };

        // Always authenticate fresh here: a cached token would hide a wrong password.
        let token = match self.issue_token(&creds).await {
            Ok((token, expires_at)) => {
                self.tokens.put(creds.token_key(), token.clone(), expires_at);
                token
            }
            Err(e) => return CredentialCheck::failed(e.to_string()),
        };

        match self.get_list(&creds, &token, "providers").await {
            Ok(_) => {
                info!("Nextech credentials verified for {}", creds.base_url);
                CredentialCheck::ok()
            }
            Err(e) => {
                warn!("Nextech token issued but provider list failed: {}", e);
                CredentialCheck::failed(format!("Authenticated but could not read providers: {}", e))
            }
        }
    }

    #[instrument(skip(self, credentials, patient))]
    async fn find_or_create_patient(
        &self,
        credentials: &Value,
        patient: &PatientData,
    ) -> Result<String, EmrError> {
        let creds = NextechCredentials::parse(credentials)?;
        let token = self.authenticate(&creds).await?;

        if let Some(existing) = self.find_patient(&creds, &token, &patient.email).await? {
            info!("Found existing Nextech patient {}", existing);
            return Ok(existing);
        }

        let created = self.create_patient(&creds, &token, patient).await?;
        info!("Created Nextech patient {}", created);
        Ok(created)
    }

    #[instrument(skip(self, credentials))]
    async fn resolve_booking_params(
        &self,
        credentials: &Value,
        partial: &PartialBookingParams,
    ) -> Result<BookingParams, EmrError> {
        let creds = NextechCredentials::parse(credentials)?;
        let token = self.authenticate(&creds).await?;

        let provider_id = match &partial.provider_id {
            Some(id) => id.clone(),
            None => first_option(&self.get_list(&creds, &token, "providers").await?, "providers")?,
        };
        let location_id = match &partial.location_id {
            Some(id) => id.clone(),
            None => first_option(&self.get_list(&creds, &token, "locations").await?, "locations")?,
        };
        let appointment_type_id = match &partial.appointment_type_id {
            Some(id) => id.clone(),
            None => consult_or_first(&self.get_list(&creds, &token, "appointment-types").await?)?,
        };

        Ok(BookingParams {
            provider_id,
            location_id,
            appointment_type_id,
        })
    }

    #[instrument(skip(self, credentials, request), fields(patient = %request.external_patient_id))]
    async fn book_appointment(
        &self,
        credentials: &Value,
        request: &BookingRequest,
    ) -> Result<BookingResult, EmrError> {
        if let Some(missing) = request.missing_param() {
            return Ok(BookingResult::failed(format!("Missing required booking parameter: {}", missing)));
        }

        let creds = match NextechCredentials::parse(credentials) {
            Ok(creds) => creds,
            Err(e) => return Ok(BookingResult::failed(e.to_string())),
        };

        let result = self.try_book(&creds, request).await;
        if matches!(&result, Err(e) if e.is_authentication()) {
            self.tokens.invalidate(&creds.token_key());
        }
        into_booking_result(EmrProvider::Nextech, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_strips_non_digits() {
        assert_eq!(normalize_phone("+1 (555) 010-2030"), "15550102030");
        assert_eq!(normalize_phone("ext."), "");
    }

    #[test]
    fn test_credentials_require_base_url() {
        let err = NextechCredentials::parse(&json!({"username": "u", "password": "p"})).unwrap_err();
        assert_eq!(err, EmrError::validation("baseUrl"));
    }

    #[test]
    fn test_token_key_uses_trimmed_base_url() {
        let creds = NextechCredentials::parse(&json!({
            "baseUrl": "https://nx.example.com/",
            "username": "front-desk",
            "password": "p"
        }))
        .unwrap();
        assert_eq!(creds.token_key(), TokenKey::new("https://nx.example.com", "front-desk"));
    }
}
