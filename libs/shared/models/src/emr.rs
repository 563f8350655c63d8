use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// External EMR platforms a practice can sync bookings into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmrProvider {
    Mindbody,
    Nextech,
    Modmed,
    Patientnow,
}

impl EmrProvider {
    pub const ALL: [EmrProvider; 4] = [
        EmrProvider::Mindbody,
        EmrProvider::Nextech,
        EmrProvider::Modmed,
        EmrProvider::Patientnow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmrProvider::Mindbody => "MINDBODY",
            EmrProvider::Nextech => "NEXTECH",
            EmrProvider::Modmed => "MODMED",
            EmrProvider::Patientnow => "PATIENTNOW",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            EmrProvider::Mindbody => "Mindbody",
            EmrProvider::Nextech => "Nextech",
            EmrProvider::Modmed => "ModMed",
            EmrProvider::Patientnow => "PatientNow",
        }
    }

    /// Keys that must be present and non-empty in a credential submission.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            EmrProvider::Mindbody => &["apiKey", "username", "password", "siteId"],
            EmrProvider::Nextech => &["baseUrl", "username", "password"],
            EmrProvider::Modmed => &["baseUrl", "clientId", "clientSecret"],
            EmrProvider::Patientnow => &["baseUrl", "username", "password"],
        }
    }

    /// Keys that identify the remote account. Secrets are never part of this list,
    /// so rotating a password keeps the same fingerprint.
    pub fn identity_fields(&self) -> &'static [&'static str] {
        match self {
            EmrProvider::Mindbody => &["siteId", "username"],
            EmrProvider::Nextech => &["baseUrl", "username"],
            EmrProvider::Modmed => &["baseUrl", "clientId"],
            EmrProvider::Patientnow => &["baseUrl", "username"],
        }
    }
}

impl fmt::Display for EmrProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmrProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmrProvider::ALL
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown EMR provider: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
    Practice,
}

/// Stored provider credential. The secret part only ever exists as `encrypted_blob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_type: OwnerType,
    pub provider: EmrProvider,
    pub label: Option<String>,
    pub encrypted_blob: String,
    pub fingerprint: String,
    // Absent on schemas without validation columns; such rows are treated as valid.
    #[serde(default = "default_valid")]
    pub is_valid: bool,
    #[serde(default)]
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_valid() -> bool {
    true
}
