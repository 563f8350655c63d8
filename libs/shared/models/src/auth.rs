use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";

/// Authenticated caller as resolved by the application layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }

    /// Whether this user is the entity identified by `owner_id`.
    pub fn is_owner(&self, owner_id: &Uuid) -> bool {
        Uuid::parse_str(&self.id).map(|id| &id == owner_id).unwrap_or(false)
    }
}
