// libs/emr-cell/src/services/providers/mindbody.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
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
struct MindbodyCredentials {
    api_key: String,
    username: String,
    password: String,
    site_id: String,
}

impl MindbodyCredentials {
    fn parse(raw: &Value) -> Result<Self, EmrError> {
        Ok(Self {
            api_key: required_str(raw, "apiKey")?,
            username: required_str(raw, "username")?,
            password: required_str(raw, "password")?,
            site_id: required_str(raw, "siteId")?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserTokenResponse {
    access_token: String,
    expires: Option<String>,
}

/// Mindbody Public API (v6) client. Every call carries the `Api-Key` and
/// `SiteId` headers; staff-scoped calls add the issued user token.
/// Payload fields are PascalCase.
pub struct MindbodyAdapter {
    base_url: String,
    http: Arc<ProviderHttp>,
    tokens: Arc<dyn TokenCache>,
}

impl MindbodyAdapter {
    pub fn new(base_url: String, http: Arc<ProviderHttp>, tokens: Arc<dyn TokenCache>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            tokens,
        }
    }

    fn token_key(&self, creds: &MindbodyCredentials) -> TokenKey {
        TokenKey::new(self.base_url.clone(), format!("{}:{}", creds.site_id, creds.username))
    }

    fn signed(&self, builder: RequestBuilder, creds: &MindbodyCredentials, token: Option<&str>) -> RequestBuilder {
        let builder = builder
            .header("Api-Key", &creds.api_key)
            .header("SiteId", &creds.site_id);
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// POST /usertoken/issue
    async fn issue_token(&self, creds: &MindbodyCredentials) -> Result<(String, DateTime<Utc>), EmrError> {
        let url = format!("{}/usertoken/issue", self.base_url);
        let body = json!({
            "Username": creds.username,
            "Password": creds.password,
        });

        let response: UserTokenResponse = self
            .http
            .send_token_json(
                self.signed(self.http.client().post(&url), creds, None).json(&body),
                "Mindbody user token",
            )
            .await?;

        let expires_at = response
            .expires
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| token_expiry(None));

        Ok((response.access_token, expires_at))
    }

    async fn authenticate(&self, creds: &MindbodyCredentials) -> Result<String, EmrError> {
        cached_token(self.tokens.as_ref(), &self.token_key(creds), || self.issue_token(creds)).await
    }

    async fn get(
        &self,
        creds: &MindbodyCredentials,
        token: &str,
        path: &str,
        query: &[(&str, &str)],
        context: &str,
    ) -> Result<Value, EmrError> {
        let url = format!("{}{}", self.base_url, path);
        self.http
            .send_json(
                self.signed(self.http.client().get(&url).query(query), creds, Some(token)),
                context,
            )
            .await
    }

    async fn get_list(
        &self,
        creds: &MindbodyCredentials,
        token: &str,
        path: &str,
        list_key: &str,
    ) -> Result<Vec<RemoteOption>, EmrError> {
        let response = self.get(creds, token, path, &[], "Mindbody list").await?;

        Ok(response
            .get(list_key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(remote_option).collect())
            .unwrap_or_default())
    }

    async fn find_client(
        &self,
        creds: &MindbodyCredentials,
        token: &str,
        email: &str,
    ) -> Result<Option<String>, EmrError> {
        let response = self
            .get(creds, token, "/client/clients", &[("SearchText", email)], "Mindbody client search")
            .await?;

        Ok(response
            .get("Clients")
            .and_then(Value::as_array)
            .and_then(|clients| {
                clients
                    .iter()
                    .find(|client| email_matches(client.get("Email").and_then(Value::as_str), email))
            })
            .and_then(|client| client.get("Id").and_then(id_string)))
    }

    async fn add_client(
        &self,
        creds: &MindbodyCredentials,
        token: &str,
        patient: &PatientData,
    ) -> Result<String, EmrError> {
        let url = format!("{}/client/addclient", self.base_url);
        let body = json!({
            "FirstName": patient.first_name,
            "LastName": patient.last_name,
            "Email": patient.email,
            "MobilePhone": patient.phone,
            "BirthDate": patient.date_of_birth.map(|d| format!("{}T00:00:00", d.format("%Y-%m-%d"))),
        });

        let created: Value = self
            .http
            .send_json(
                self.signed(self.http.client().post(&url), creds, Some(token)).json(&body),
                "Mindbody add client",
            )
            .await?;

        created
            .pointer("/Client/Id")
            .and_then(id_string)
            .ok_or_else(|| EmrError::RemoteBusinessError {
                status: 200,
                message: "Mindbody add client returned no Client.Id".to_string(),
            })
    }

    async fn try_book(
        &self,
        creds: &MindbodyCredentials,
        request: &BookingRequest,
    ) -> Result<String, EmrError> {
        let token = self.authenticate(creds).await?;
        let url = format!("{}/appointment/addappointment", self.base_url);
        let body = json!({
            "ClientId": request.external_patient_id,
            "StaffId": numeric_or_string(request.provider_id.as_deref()),
            "LocationId": numeric_or_string(request.location_id.as_deref()),
            "SessionTypeId": numeric_or_string(request.appointment_type_id.as_deref()),
            "StartDateTime": request.start_time.to_rfc3339(),
            "EndDateTime": request.end_time.to_rfc3339(),
            "Notes": request.notes,
        });

        let created: Value = self
            .http
            .send_json(
                self.signed(self.http.client().post(&url), creds, Some(&token)).json(&body),
                "Mindbody add appointment",
            )
            .await?;

        created
            .pointer("/Appointment/Id")
            .and_then(id_string)
            .ok_or_else(|| EmrError::RemoteBusinessError {
                status: 200,
                message: "Mindbody add appointment returned no Appointment.Id".to_string(),
            })
    }
}

/// Mindbody ids for staff, locations and session types are integers.
fn numeric_or_string(id: Option<&str>) -> Value {
    match id {
        Some(id) => id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(id)),
        None => Value::Null,
    }
}

fn remote_option(item: &Value) -> Option<RemoteOption> {
    let id = id_string(item.get("Id")?)?;
    let name = item
        .get("Name")
        .or_else(|| item.get("DisplayName"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let first = item.get("FirstName").and_then(Value::as_str).unwrap_or_default();
            let last = item.get("LastName").and_then(Value::as_str).unwrap_or_default();
            format!("{} {}", first, last).trim().to_string()
        });
    Some(RemoteOption { id, name })
}

#[async_trait]
impl EmrAdapter for MindbodyAdapter {
    fn provider(&self) -> EmrProvider {
        EmrProvider::Mindbody
    }

    #[instrument(skip(self, raw))]
    async fn check_credentials(&self, raw: &Value) -> CredentialCheck {
        let creds = match MindbodyCredentials::parse(raw) {
            Ok(creds) => creds,
            Err(e) => return CredentialCheck::failed(e.to_string()),
        };

        let token = match self.issue_token(&creds).await {
            Ok((token, expires_at)) => {
                self.tokens.put(self.token_key(&creds), token.clone(), expires_at);
                token
            }
            Err(e) => return CredentialCheck::failed(e.to_string()),
        };

        // A token alone is not enough: the site lookup has to succeed too.
        let sites = self
            .get(&creds, &token, "/site/sites", &[("SiteIds", creds.site_id.as_str())], "Mindbody sites")
            .await;

        match sites {
            Ok(body) => {
                let has_site = body
                    .get("Sites")
                    .and_then(Value::as_array)
                    .map_or(false, |sites| !sites.is_empty());
                if has_site {
                    info!("Mindbody credentials verified for site {}", creds.site_id);
                    CredentialCheck::ok()
                } else {
                    CredentialCheck::failed(format!("Token issued but site {} is not accessible", creds.site_id))
                }
            }
            Err(e) => {
                warn!("Mindbody token issued but site lookup failed: {}", e);
                CredentialCheck::failed(format!("Token issued but site lookup failed: {}", e))
            }
        }
    }

    #[instrument(skip(self, credentials, patient))]
    async fn find_or_create_patient(
        &self,
        credentials: &Value,
        patient: &PatientData,
    ) -> Result<String, EmrError> {
        let creds = MindbodyCredentials::parse(credentials)?;
        let token = self.authenticate(&creds).await?;

        if let Some(existing) = self.find_client(&creds, &token, &patient.email).await? {
            info!("Found existing Mindbody client {}", existing);
            return Ok(existing);
        }

        let created = self.add_client(&creds, &token, patient).await?;
        info!("Created Mindbody client {}", created);
        Ok(created)
    }

    #[instrument(skip(self, credentials))]
    async fn resolve_booking_params(
        &self,
        credentials: &Value,
        partial: &PartialBookingParams,
    ) -> Result<BookingParams, EmrError> {
        let creds = MindbodyCredentials::parse(credentials)?;
        let token = self.authenticate(&creds).await?;

        let provider_id = match &partial.provider_id {
            Some(id) => id.clone(),
            None => first_option(&self.get_list(&creds, &token, "/staff/staff", "StaffMembers").await?, "staff")?,
        };
        let location_id = match &partial.location_id {
            Some(id) => id.clone(),
            None => first_option(&self.get_list(&creds, &token, "/site/locations", "Locations").await?, "locations")?,
        };
        let appointment_type_id = match &partial.appointment_type_id {
            Some(id) => id.clone(),
            None => consult_or_first(&self.get_list(&creds, &token, "/site/sessiontypes", "SessionTypes").await?)?,
        };

        Ok(BookingParams {
            provider_id,
            location_id,
            appointment_type_id,
        })
    }

    #[instrument(skip(self, credentials, request), fields(client = %request.external_patient_id))]
    async fn book_appointment(
        &self,
        credentials: &Value,
        request: &BookingRequest,
    ) -> Result<BookingResult, EmrError> {
        if let Some(missing) = request.missing_param() {
            return Ok(BookingResult::failed(format!("Missing required booking parameter: {}", missing)));
        }

        let creds = match MindbodyCredentials::parse(credentials) {
            Ok(creds) => creds,
            Err(e) => return Ok(BookingResult::failed(e.to_string())),
        };

        let result = self.try_book(&creds, request).await;
        if matches!(&result, Err(e) if e.is_authentication()) {
            self.tokens.invalidate(&self.token_key(&creds));
        }
        into_booking_result(EmrProvider::Mindbody, result)
    }
}
