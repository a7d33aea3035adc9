//! Veer: a domain-based redirect gateway.
//!
//! This is the application entry point. It loads configuration, initializes
//! tracing, seeds and warms the redirect cache, starts the periodic refresh and
//! certificate management, and runs the listeners until shutdown.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use veer::acme::CertificateManager;
use veer::admin::RuleAdmin;
use veer::cache::RedirectCache;
use veer::config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use veer::http::start_servers;
use veer::metrics::Metrics;
use veer::rule::Rule;
use veer::state::AppState;
use veer::store::{MemoryStore, RuleStore, SqliteStore};

/// Veer: domain-based HTTP/HTTPS redirects with automatic TLS
#[derive(Parser, Debug)]
#[command(name = "veer", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "veer=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The log format comes from the config file, so load it first
    let config = AppConfig::load(&args.config)?;

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(path = %args.config, "Loaded configuration");

    let sqlite = match &config.store.database {
        Some(path) => Some(SqliteStore::open(path).await?),
        None => {
            tracing::warn!("No store.database configured - rules and certificates are kept in memory only");
            None
        }
    };
    let store: Arc<dyn RuleStore> = match &sqlite {
        Some(store) => Arc::new(store.clone()),
        None => Arc::new(MemoryStore::new()),
    };
    let cache = RedirectCache::new(store.clone(), config.cache.store_timeout());

    if let Some(seed_file) = &config.store.seed_file {
        if store.scan_page(None, 1).await?.rules.is_empty() {
            let data = std::fs::read(seed_file)?;
            let rules: Vec<Rule> = serde_json::from_slice(&data)?;
            let count = RuleAdmin::new(cache.clone()).import(rules).await?;
            tracing::info!(path = %seed_file.display(), count, "Imported seed redirects");
        } else {
            tracing::info!(path = %seed_file.display(), "Store already holds redirects, seed file skipped");
        }
    }

    let count = cache.update().await?;
    tracing::info!(count, "Initialized redirect cache");

    cache.observe(config.cache.refresh_interval())?;

    let certs = if config.https.enabled {
        let manager = CertificateManager::new(cache.clone(), config.acme.clone());
        Some(manager)
    } else {
        None
    };
    let sync_task = certs.as_ref().map(|manager| manager.spawn_sync_loop());

    let metrics = Metrics::new()?;
    let state = AppState::new(cache.clone(), &config.admin.api_token, metrics);
    let result = start_servers(&config, state, certs.clone()).await;

    if let Some(task) = sync_task {
        task.abort();
    }
    if let Some(manager) = &certs {
        manager.shutdown();
    }
    cache.close_observer().await;
    if let Some(store) = &sqlite {
        store.close().await;
    }
    tracing::info!("Shutdown complete");

    result?;
    Ok(())
}
