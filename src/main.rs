//! Echosphere backend
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database, wires providers, cache and LLM together, and
//! serves the HTTP API until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use echosphere::api::{build_router, AppContext};
use echosphere::cache::{ProviderCache, SystemClock};
use echosphere::config::AppConfig;
use echosphere::data::ProviderRegistry;
use echosphere::engine::{Aggregator, NarrativeSettings, Narrator};
use echosphere::llm::openrouter::OpenRouterClient;
use echosphere::llm::{ChatModel, UnconfiguredModel};
use echosphere::storage::{SqliteStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load(&AppConfig::default_path())?;

    init_logging();

    info!(
        host = %cfg.server.host,
        port = cfg.server.port,
        model = %cfg.llm.model,
        "Echosphere starting up"
    );

    // -- Storage + cache -------------------------------------------------

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&cfg.database.resolved_url(), cfg.database.max_connections).await?,
    );
    let cache = Arc::new(ProviderCache::new(
        Arc::new(SystemClock),
        cfg.cache.persist.then(|| store.clone()),
    ));
    info!(persistent = cache.is_persistent(), "Provider cache ready");

    // -- Providers -------------------------------------------------------

    let registry = Arc::new(ProviderRegistry::from_config(&cfg, cache.clone())?);

    // -- LLM -------------------------------------------------------------

    let model: Arc<dyn ChatModel> = match AppConfig::resolve_secret(Some(&cfg.llm.api_key_env)) {
        Some(key) => {
            info!(model = %cfg.llm.model, "Using OpenRouter LLM provider");
            Arc::new(OpenRouterClient::new(key, &cfg.llm)?)
        }
        None => {
            warn!(
                env = %cfg.llm.api_key_env,
                "LLM API key not set; chat and analysis will return fallback text"
            );
            Arc::new(UnconfiguredModel::new(cfg.llm.model.clone()))
        }
    };
    let narrator = Arc::new(Narrator::new(model, NarrativeSettings::from(&cfg.llm)));

    let state = Arc::new(
        AppContext::new(Aggregator::new(registry), narrator, store, cache.clone())
            .with_cors_origin(cfg.server.cors_origin.clone()),
    );

    // -- Cache sweep -----------------------------------------------------

    let sweep_every = Duration::from_secs(cfg.cache.sweep_interval_secs);
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let report = cache.sweep().await;
            debug!(
                memory_purged = report.memory_purged,
                rows_deleted = report.rows_deleted,
                "Cache sweep finished"
            );
        }
    });

    // -- Serve -----------------------------------------------------------

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "API listening. Press Ctrl+C to stop.");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sweeper.abort();
    info!("Echosphere shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

/// Initialise tracing with env-filter and optional JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("echosphere=info"));

    let json_logging = std::env::var("ECHOSPHERE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
