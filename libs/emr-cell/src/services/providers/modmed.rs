// libs/emr-cell/src/services/providers/modmed.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
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
    required_str, token_expiry, EmrAdapter, ProviderHttp,
};
use crate::services::token_cache::TokenCache;

#[derive(Debug, Clone)]
struct ModMedCredentials {
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl ModMedCredentials {
    fn parse(raw: &Value) -> Result<Self, EmrError> {
        Ok(Self {
            base_url: required_str(raw, "baseUrl")?.trim_end_matches('/').to_string(),
            client_id: required_str(raw, "clientId")?,
            client_secret: required_str(raw, "clientSecret")?,
        })
    }

    /// The token scope is the API client, never the patient.
    fn token_key(&self) -> TokenKey {
        TokenKey::new(self.base_url.clone(), self.client_id.clone())
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
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

/// ModMed (Modernizing Medicine) API client using the client-credentials grant.
pub struct ModMedAdapter {
    http: Arc<ProviderHttp>,
    tokens: Arc<dyn TokenCache>,
}

impl ModMedAdapter {
    pub fn new(http: Arc<ProviderHttp>, tokens: Arc<dyn TokenCache>) -> Self {
        Self { http, tokens }
    }

    /// POST {baseUrl}/oauth2/token (grant_type=client_credentials)
    async fn issue_token(&self, creds: &ModMedCredentials) -> Result<(String, DateTime<Utc>), EmrError> {
        let url = format!("{}/oauth2/token", creds.base_url);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
        ];

        let response: TokenResponse = self
            .http
            .send_token_json(self.http.client().post(&url).form(&form), "ModMed token")
            .await?;

        Ok((response.access_token, token_expiry(response.expires_in)))
    }

    async fn authenticate(&self, creds: &ModMedCredentials) -> Result<String, EmrError> {
        cached_token(self.tokens.as_ref(), &creds.token_key(), || self.issue_token(creds)).await
    }

    async fn get_list(
        &self,
        creds: &ModMedCredentials,
        token: &str,
        resource: &str,
    ) -> Result<Vec<RemoteOption>, EmrError> {
        let response: ListResponse = self
            .http
            .send_json(
                self.http.client().get(creds.api(resource)).bearer_auth(token),
                "ModMed list",
            )
            .await?;

        Ok(response
            .data
            .iter()
            .filter_map(|item| {
                Some(RemoteOption {
                    id: id_string(item.get("id")?)?,
                    name: item
                        .get("name")
                        .or_else(|| item.get("display_name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }

    async fn find_patient(
        &self,
        creds: &ModMedCredentials,
        token: &str,
        email: &str,
    ) -> Result<Option<String>, EmrError> {
        let response: ListResponse = self
            .http
            .send_json(
                self.http
                    .client()
                    .get(creds.api("patients"))
                    .bearer_auth(token)
                    .query(&[("email", email)]),
                "ModMed patient search",
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
        creds: &ModMedCredentials,
        token: &str,
        patient: &PatientData,
    ) -> Result<String, EmrError> {
        let body = json!({
            "first_name": patient.first_name,
            "last_name": patient.last_name,
            "email": patient.email,
            "phone": patient.phone,
            "date_of_birth": patient.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
        });

        let created: Value = self
            .http
            .send_json(
                self.http.client().post(creds.api("patients")).bearer_auth(token).json(&body),
                "ModMed patient create",
            )
            .await?;

        created
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| EmrError::RemoteBusinessError {
                status: 200,
                message: "ModMed patient create returned no id".to_string(),
            })
    }

    async fn try_book(
        &self,
        creds: &ModMedCredentials,
        request: &BookingRequest,
    ) -> Result<String, EmrError> {
        let token = self.authenticate(creds).await?;
        let body = json!({
            "patient_id": request.external_patient_id,
            "practitioner_id": request.provider_id,
            "location_id": request.location_id,
            "appointment_type_id": request.appointment_type_id,
            "start_time": request.start_time.to_rfc3339(),
            "end_time": request.end_time.to_rfc3339(),
            "comment": request.notes,
        });

        let created: Value = self
            .http
            .send_json(
                self.http.client().post(creds.api("appointments")).bearer_auth(&token).json(&body),
                "ModMed appointment create",
            )
            .await?;

        created
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| EmrError::RemoteBusinessError {
                status: 200,
                message: "ModMed appointment create returned no id".to_string(),
            })
    }
}

#[async_trait]
impl EmrAdapter for ModMedAdapter {
    fn provider(&self) -> EmrProvider {
        EmrProvider::Modmed
    }

    #[instrument(skip(self, raw))]
    async fn check_credentials(&self, raw: &Value) -> CredentialCheck {
        let creds = match ModMedCredentials::parse(raw) {
            Ok(creds) => creds,
            Err(e) => return CredentialCheck::failed(e.to_string()),
        };

        let token = match self.issue_token(&creds).await {
            Ok((token, expires_at)) => {
                self.tokens.put(creds.token_key(), token.clone(), expires_at);
                token
            }
            Err(e) => return CredentialCheck::failed(e.to_string()),
        };

        match self.get_list(&creds, &token, "practitioners").await {
            Ok(_) => {
                info!("ModMed credentials verified for client {}", creds.client_id);
                CredentialCheck::ok()
            }
            Err(e) => {
                warn!("ModMed token issued but practitioner list failed: {}", e);
                CredentialCheck::failed(format!("Authenticated but could not read practitioners: {}", e))
            }
        }
    }

    #[instrument(skip(self, credentials, patient))]
    async fn find_or_create_patient(
        &self,
        credentials: &Value,
        patient: &PatientData,
    ) -> Result<String, EmrError> {
        let creds = ModMedCredentials::parse(credentials)?;
        let token = self.authenticate(&creds).await?;

        if let Some(existing) = self.find_patient(&creds, &token, &patient.email).await? {
            info!("Found existing ModMed patient {}", existing);
            return Ok(existing);
        }

        let created = self.create_patient(&creds, &token, patient).await?;
        info!("Created ModMed patient {}", created);
        Ok(created)
    }

    #[instrument(skip(self, credentials))]
    async fn resolve_booking_params(
        &self,
        credentials: &Value,
        partial: &PartialBookingParams,
    ) -> Result<BookingParams, EmrError> {
        let creds = ModMedCredentials::parse(credentials)?;
        let token = self.authenticate(&creds).await?;

        let provider_id = match &partial.provider_id {
            Some(id) => id.clone(),
            None => first_option(&self.get_list(&creds, &token, "practitioners").await?, "practitioners")?,
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

        let creds = match ModMedCredentials::parse(credentials) {
            Ok(creds) => creds,
            Err(e) => return Ok(BookingResult::failed(e.to_string())),
        };

        let result = self.try_book(&creds, request).await;
        if matches!(&result, Err(e) if e.is_authentication()) {
            self.tokens.invalidate(&creds.token_key());
        }
        into_booking_result(EmrProvider::Modmed, result)
    }
}
