use thiserror::Error;

use shared_database::StoreError;
use shared_models::EmrProvider;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Credential encryption key is not configured")]
    MissingKey,

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by provider adapters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmrError {
    #[error("Validation failed for field '{field}'")]
    ValidationFailed { field: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Remote system unreachable: {message}")]
    RemoteUnreachable { message: String },

    #[error("Remote system declined the request ({status}): {message}")]
    RemoteBusinessError { status: u16, message: String },

    #[error("Could not resolve booking parameter: {what}")]
    UnresolvableBookingParams { what: String },

    #[error("{0} integration is not available")]
    UnsupportedProvider(EmrProvider),
}

impl EmrError {
    pub fn validation(field: impl Into<String>) -> Self {
        EmrError::ValidationFailed { field: field.into() }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, EmrError::AuthenticationFailed { .. })
    }
}

impl From<reqwest::Error> for EmrError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return EmrError::RemoteBusinessError {
                status: err.status().map(|s| s.as_u16()).unwrap_or_default(),
                message: format!("Unexpected response body: {}", err),
            };
        }
        EmrError::RemoteUnreachable {
            message: err.to_string(),
        }
    }
}

/// Which check rejected a credential submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    Field(String),
    Reachability(String),
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationFailure::Field(field) => write!(f, "missing or empty field '{}'", field),
            ValidationFailure::Reachability(message) => write!(f, "credential check failed: {}", message),
        }
    }
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Credential validation failed: {0}")]
    ValidationFailed(ValidationFailure),

    #[error("A credential with the same identity already exists for this provider")]
    DuplicateCredential,

    #[error("Credential not found")]
    NotFound,

    #[error("Caller is not allowed to access this credential")]
    Forbidden,

    #[error("Stored credential could not be decrypted: {0}")]
    DecryptionFailed(String),

    #[error("Credential encryption failed: {0}")]
    Encryption(String),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl VaultError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        VaultError::ValidationFailed(ValidationFailure::Field(field.into()))
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        VaultError::ValidationFailed(ValidationFailure::Reachability(message.into()))
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            // The store's unique index on fingerprint is the last line against races.
            StoreError::Conflict(_) => VaultError::DuplicateCredential,
            StoreError::NotFound(_) => VaultError::NotFound,
            other => VaultError::Store(other),
        }
    }
}

impl From<CodecError> for VaultError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::DecryptionFailed(message) => VaultError::DecryptionFailed(message),
            other => VaultError::Encryption(other.to_string()),
        }
    }
}
