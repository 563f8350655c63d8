// libs/emr-cell/src/services/token_cache.rs
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::models::{CachedToken, TokenKey};

/// Tokens expiring within this margin are treated as already expired.
pub const EXPIRY_SAFETY_MARGIN_MINUTES: i64 = 5;

/// Cache of short-lived provider tokens keyed by credential identity.
///
/// Population is not serialized: concurrent bookings may each authenticate and
/// the last `put` wins, which is harmless since tokens are interchangeable.
pub trait TokenCache: Send + Sync {
    fn get(&self, key: &TokenKey) -> Option<String>;

    fn put(&self, key: TokenKey, token: String, expires_at: DateTime<Utc>);

    fn invalidate(&self, key: &TokenKey);
}

/// Process-lifetime in-memory cache. Starts empty on every restart.
#[derive(Default)]
pub struct InMemoryTokenCache {
    entries: DashMap<TokenKey, CachedToken>,
}

impl InMemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_fresh(entry: &CachedToken, now: DateTime<Utc>) -> bool {
        entry.expires_at - now > Duration::minutes(EXPIRY_SAFETY_MARGIN_MINUTES)
    }
}

impl TokenCache for InMemoryTokenCache {
    fn get(&self, key: &TokenKey) -> Option<String> {
        let now = Utc::now();

        if let Some(entry) = self.entries.get(key) {
            if Self::is_fresh(&entry, now) {
                return Some(entry.token.clone());
            }
        } else {
            return None;
        }

        // Only drop the entry if nobody refreshed it since we looked.
        self.entries.remove_if(key, |_, entry| !Self::is_fresh(entry, now));
        debug!("Cached token for {} is inside the expiry margin", key.base_url);
        None
    }

    fn put(&self, key: TokenKey, token: String, expires_at: DateTime<Utc>) {
        self.entries.insert(key, CachedToken { token, expires_at });
    }

    fn invalidate(&self, key: &TokenKey) {
        self.entries.remove(key);
    }
}
