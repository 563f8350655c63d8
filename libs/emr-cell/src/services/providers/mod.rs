// libs/emr-cell/src/services/providers/mod.rs
//! Provider adapters.
//!
//! Every EMR is reached through [`EmrAdapter`]. The orchestrator and the vault
//! only ever see the trait; adding a provider means adding an adapter here and
//! its entries in the required/identity field tables on `EmrProvider`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use shared_config::AppConfig;
use shared_models::EmrProvider;

use crate::error::EmrError;
use crate::models::{
    BookingParams, BookingRequest, BookingResult, CredentialCheck, PartialBookingParams,
    PatientData, RemoteOption, TokenKey,
};
use crate::services::token_cache::TokenCache;

pub mod http;
pub mod mindbody;
pub mod modmed;
pub mod nextech;

pub use http::ProviderHttp;
pub use mindbody::MindbodyAdapter;
pub use modmed::ModMedAdapter;
pub use nextech::NextechAdapter;

/// Lifetime assumed for tokens whose issuer does not say.
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 3600;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmrAdapter: Send + Sync {
    fn provider(&self) -> EmrProvider;

    /// Authenticates and performs one cheap read to prove the credential has access.
    async fn check_credentials(&self, raw: &Value) -> CredentialCheck;

    /// Looks the patient up by email (case-insensitive exact match) and creates
    /// them only when no remote record exists.
    async fn find_or_create_patient(
        &self,
        credentials: &Value,
        patient: &PatientData,
    ) -> Result<String, EmrError>;

    /// Fills any missing parameter from the remote lists: first provider, first
    /// location, and the earliest appointment type whose name contains "consult".
    async fn resolve_booking_params(
        &self,
        credentials: &Value,
        partial: &PartialBookingParams,
    ) -> Result<BookingParams, EmrError>;

    /// Remote business failures and transport problems come back as
    /// `success: false`; only authentication failures are returned as `Err`.
    async fn book_appointment(
        &self,
        credentials: &Value,
        request: &BookingRequest,
    ) -> Result<BookingResult, EmrError>;
}

/// Closed set of adapters available to the vault and the orchestrator.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<EmrProvider, Arc<dyn EmrAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the Mindbody, Nextech and ModMed adapters over one HTTP client.
    pub fn with_defaults(config: &AppConfig, tokens: Arc<dyn TokenCache>) -> Result<Self, EmrError> {
        let http = Arc::new(ProviderHttp::new(config.emr_request_timeout())?);

        let mut registry = Self::new();
        registry.register(Arc::new(MindbodyAdapter::new(
            config.mindbody_base_url.clone(),
            Arc::clone(&http),
            Arc::clone(&tokens),
        )));
        registry.register(Arc::new(NextechAdapter::new(Arc::clone(&http), Arc::clone(&tokens))));
        registry.register(Arc::new(ModMedAdapter::new(http, tokens)));
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn EmrAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: EmrProvider) -> Option<Arc<dyn EmrAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn supports(&self, provider: EmrProvider) -> bool {
        self.adapters.contains_key(&provider)
    }
}

// ==============================================================================
// SHARED ADAPTER HELPERS
// ==============================================================================

/// Reads a required, non-empty string field from raw credential JSON.
pub(crate) fn required_str(raw: &Value, field: &str) -> Result<String, EmrError> {
    raw.get(field)
        .and_then(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|value| !value.is_empty())
        .ok_or_else(|| EmrError::validation(field))
}

pub(crate) fn optional_str(raw: &Value, field: &str) -> Option<String> {
    required_str(raw, field).ok()
}

/// Remote ids arrive as numbers or strings depending on the provider.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn email_matches(candidate: Option<&str>, email: &str) -> bool {
    candidate
        .map(|c| c.trim().eq_ignore_ascii_case(email.trim()))
        .unwrap_or(false)
}

pub(crate) fn first_option(options: &[RemoteOption], what: &str) -> Result<String, EmrError> {
    options
        .first()
        .map(|option| option.id.clone())
        .ok_or_else(|| EmrError::UnresolvableBookingParams {
            what: format!("no {} available", what),
        })
}

/// Earliest entry whose name contains "consult", else the first entry.
pub(crate) fn consult_or_first(options: &[RemoteOption]) -> Result<String, EmrError> {
    options
        .iter()
        .find(|option| option.name.to_lowercase().contains("consult"))
        .map(|option| option.id.clone())
        .map(Ok)
        .unwrap_or_else(|| first_option(options, "appointment types"))
}

/// Turns the outcome of a booking call into the adapter contract's result.
pub(crate) fn into_booking_result(
    provider: EmrProvider,
    result: Result<String, EmrError>,
) -> Result<BookingResult, EmrError> {
    match result {
        Ok(remote_id) => {
            debug!("{} booking created remote appointment {}", provider, remote_id);
            Ok(BookingResult::booked(remote_id))
        }
        Err(err) if err.is_authentication() => Err(err),
        Err(err) => {
            warn!("{} booking failed: {}", provider, err);
            Ok(BookingResult::failed(err.to_string()))
        }
    }
}

pub(crate) fn token_expiry(expires_in: Option<i64>) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECONDS))
}

/// Returns the cached token for `key`, or runs `issue` and caches the result.
pub(crate) async fn cached_token<F, Fut>(
    tokens: &dyn TokenCache,
    key: &TokenKey,
    issue: F,
) -> Result<String, EmrError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<(String, DateTime<Utc>), EmrError>>,
{
    if let Some(token) = tokens.get(key) {
        return Ok(token);
    }

    let (token, expires_at) = issue().await?;
    tokens.put(key.clone(), token.clone(), expires_at);
    Ok(token)
}
