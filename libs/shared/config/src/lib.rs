use std::env;
use std::time::Duration;
use tracing::warn;

mod schema;

pub use schema::SchemaCapabilities;

pub const DEFAULT_MINDBODY_BASE_URL: &str = "https://api.mindbodyonline.com/public/v6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" | "local" => Some(Environment::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub environment: Environment,
    pub credentials_encryption_key: Option<String>,
    pub allow_insecure_dev_key: bool,
    pub emr_request_timeout_secs: u64,
    pub emr_check_timeout_secs: u64,
    pub mindbody_base_url: String,
    pub schema_capabilities: SchemaCapabilities,
    pub sync_batch_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            environment: env::var("APP_ENV")
                .ok()
                .and_then(|value| {
                    let parsed = Environment::parse(&value);
                    if parsed.is_none() {
                        warn!("APP_ENV has unknown value '{}', assuming production", value);
                    }
                    parsed
                })
                .unwrap_or(Environment::Production),
            credentials_encryption_key: env::var("EMR_CREDENTIALS_ENCRYPTION_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            allow_insecure_dev_key: env::var("EMR_ALLOW_INSECURE_DEV_KEY")
                .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
            emr_request_timeout_secs: parse_or_default("EMR_REQUEST_TIMEOUT_SECS", 30),
            emr_check_timeout_secs: parse_or_default("EMR_CHECK_TIMEOUT_SECS", 10),
            mindbody_base_url: env::var("MINDBODY_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_MINDBODY_BASE_URL.to_string()),
            schema_capabilities: match env::var("EMR_SCHEMA_VERSION") {
                Ok(value) => match value.trim().parse::<u32>() {
                    Ok(version) => SchemaCapabilities::for_version(version),
                    Err(_) => {
                        warn!("EMR_SCHEMA_VERSION '{}' is not a number, using latest", value);
                        SchemaCapabilities::latest()
                    }
                },
                Err(_) => SchemaCapabilities::latest(),
            },
            sync_batch_size: parse_or_default("EMR_SYNC_BATCH_SIZE", 50),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.credentials_encryption_key.is_none() {
            warn!("EMR_CREDENTIALS_ENCRYPTION_KEY not set - credential vault will refuse to start outside development");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_service_key.is_empty()
    }

    pub fn is_emr_configured(&self) -> bool {
        self.credentials_encryption_key.is_some()
            || (self.environment == Environment::Development && self.allow_insecure_dev_key)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn emr_request_timeout(&self) -> Duration {
        Duration::from_secs(self.emr_request_timeout_secs)
    }

    pub fn emr_check_timeout(&self) -> Duration {
        Duration::from_secs(self.emr_check_timeout_secs)
    }
}

fn parse_or_default<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, value, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "service-key".to_string(),
            environment: Environment::Production,
            credentials_encryption_key: None,
            allow_insecure_dev_key: false,
            emr_request_timeout_secs: 30,
            emr_check_timeout_secs: 10,
            mindbody_base_url: DEFAULT_MINDBODY_BASE_URL.to_string(),
            schema_capabilities: SchemaCapabilities::latest(),
            sync_batch_size: 50,
        }
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::parse("Production"), Some(Environment::Production));
        assert_eq!(Environment::parse(" dev "), Some(Environment::Development));
        assert_eq!(Environment::parse("staging"), None);
    }

    #[test]
    fn test_emr_not_configured_in_production_without_key() {
        let mut config = base_config();
        config.allow_insecure_dev_key = true;
        assert!(!config.is_emr_configured());
    }

    #[test]
    fn test_emr_configured_with_dev_flag() {
        let mut config = base_config();
        config.environment = Environment::Development;
        config.allow_insecure_dev_key = true;
        assert!(config.is_emr_configured());
    }

    #[test]
    fn test_emr_configured_with_key() {
        let mut config = base_config();
        config.credentials_encryption_key = Some("a-secret".to_string());
        assert!(config.is_emr_configured());
        assert_eq!(config.emr_check_timeout(), Duration::from_secs(10));
    }
}
