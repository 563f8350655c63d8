// libs/emr-cell/src/services/providers/http.rs
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::EmrError;

const MAX_ERROR_BODY: usize = 300;

/// HTTP plumbing shared by all adapters: one client with a bounded timeout and
/// uniform mapping of responses onto `EmrError`.
pub struct ProviderHttp {
    client: Client,
}

impl ProviderHttp {
    pub fn new(timeout: Duration) -> Result<Self, EmrError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmrError::RemoteUnreachable {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends the request and decodes a JSON body.
    ///
    /// 401/403 become `AuthenticationFailed`, other non-success statuses
    /// `RemoteBusinessError`, and transport failures `RemoteUnreachable`.
    pub async fn send_json<T>(&self, request: RequestBuilder, context: &str) -> Result<T, EmrError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(|e| {
            warn!("{} request failed before a response: {}", context, e);
            EmrError::from(e)
        })?;

        let status = response.status();
        let body = response.text().await?;

        debug!("{} response: {}", context, status);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("{} rejected credentials: {}", context, status);
            return Err(EmrError::AuthenticationFailed {
                message: format!("{} rejected credentials ({}): {}", context, status, error_message(&body)),
            });
        }

        if !status.is_success() {
            warn!("{} returned {}: {}", context, status, error_message(&body));
            return Err(EmrError::RemoteBusinessError {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| EmrError::RemoteBusinessError {
            status: status.as_u16(),
            message: format!("{} returned an unexpected body: {}", context, e),
        })
    }

    /// Like [`send_json`](Self::send_json) for token endpoints. OAuth issuers
    /// answer bad credentials with 400 `invalid_grant`/`invalid_client`, so any
    /// client-error status here is an authentication failure.
    pub async fn send_token_json<T>(&self, request: RequestBuilder, context: &str) -> Result<T, EmrError>
    where
        T: DeserializeOwned,
    {
        match self.send_json(request, context).await {
            Err(EmrError::RemoteBusinessError { status, message }) if is_client_error(status) => {
                error!("{} rejected credentials: {}", context, status);
                Err(EmrError::AuthenticationFailed {
                    message: format!("{} rejected credentials ({}): {}", context, status, message),
                })
            }
            other => other,
        }
    }
}

fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}

/// Best-effort extraction of a human-readable message from an error body.
/// Understands Mindbody's `{"Error": {"Message"}}` and OAuth/REST
/// `{"error_description"}`, `{"message"}`, `{"error"}` shapes.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            json.pointer("/Error/Message"),
            json.get("error_description"),
            json.get("message"),
            json.get("Message"),
            json.get("error"),
        ];
        if let Some(message) = candidates
            .into_iter()
            .flatten()
            .find_map(|value| value.as_str())
        {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
