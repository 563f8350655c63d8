use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emr_cell::services::{
    AdapterRegistry, CredentialVault, EmrBookingOrchestrator, InMemoryTokenCache, SecretCodec, SyncSummary,
    TokenCache,
};
use shared_config::AppConfig;
use shared_database::SupabaseStore;

#[tokio::main]
async fn main() -> ExitCode {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting EMR appointment sync");

    match run().await {
        Ok(summary) if summary.fatal > 0 => {
            warn!("Sync finished with {} credential or key problems", summary.fatal);
            ExitCode::from(2)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("EMR sync aborted: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<SyncSummary> {
    // Load configuration
    let config = AppConfig::from_env();
    if !config.is_configured() {
        anyhow::bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set");
    }

    let codec = SecretCodec::from_config(&config).context("credential codec unavailable")?;
    let store = Arc::new(SupabaseStore::new(&config));
    let tokens: Arc<dyn TokenCache> = Arc::new(InMemoryTokenCache::new());
    let registry = AdapterRegistry::with_defaults(&config, tokens).context("failed to build provider adapters")?;

    let vault = Arc::new(CredentialVault::new(
        store.clone(),
        Arc::new(codec),
        registry.clone(),
        config.emr_check_timeout(),
    ));
    let orchestrator = EmrBookingOrchestrator::new(vault, registry, store.clone(), store.clone(), store);

    let results = orchestrator
        .sync_pending(config.sync_batch_size)
        .await
        .context("failed to load unsynced appointments")?;

    let mut summary = SyncSummary::default();
    for (appointment_id, outcome) in &results {
        summary.record(outcome);
        if let Some(error) = outcome.error.as_deref() {
            info!(
                appointment_id = %appointment_id,
                status = ?outcome.status,
                "{}",
                error
            );
        }
    }

    info!(
        "EMR sync complete: {} booked, {} skipped, {} failed of {}",
        summary.booked,
        summary.skipped,
        summary.failed,
        summary.total()
    );
    info!("Summary: {}", serde_json::to_string(&summary)?);

    Ok(summary)
}
