//! Sharded Cache - An in-process TTL cache with idempotency-key deduplication
//!
//! Runs the cache engine and idempotency coordinator as a long-lived
//! process: restores a snapshot on startup, sweeps expired entries, reports
//! metrics, and saves a snapshot on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sharded_cache::{CacheStore, Config, IdempotencyCoordinator, PeriodicTask, TtlCache};

/// Main entry point for the cache process.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Create the cache engine, restoring a snapshot if one exists
/// 4. Start background TTL sweeps for the cache and the idempotency store
/// 5. Start the periodic metrics report
/// 6. Wait for SIGINT/SIGTERM, then stop tasks and save a snapshot
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sharded_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sharded Cache");

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: shards={}, max_entries={}, default_ttl={}s, cleanup_interval={}s, eviction={}",
        config.cache.shard_count,
        config.cache.max_entries,
        config.cache.default_ttl,
        config.cache.cleanup_interval,
        config.cache.eviction_policy
    );

    let cache: TtlCache<Value> = TtlCache::new(config.cache.clone())?;
    if let Some(path) = &config.snapshot_path {
        if path.exists() {
            match cache.load_snapshot(path).await {
                Ok(restored) => info!(path = %path.display(), restored, "Snapshot restored"),
                Err(err) => warn!(path = %path.display(), error = %err, "Ignoring unusable snapshot"),
            }
        }
    }
    cache.start();

    let store = CacheStore::from_config(&config.idempotency)?;
    store.cache().start();
    let coordinator = Arc::new(IdempotencyCoordinator::new(
        Arc::new(store.clone()),
        config.idempotency.clone(),
    ));
    info!("Cache engine and idempotency coordinator initialized");

    let reporter = {
        let cache = cache.clone();
        let coordinator = coordinator.clone();
        PeriodicTask::spawn(
            "metrics-report",
            Duration::from_secs(config.metrics_interval),
            move || {
                let cache = cache.clone();
                let coordinator = coordinator.clone();
                async move {
                    report_metrics(&cache, &coordinator);
                    Ok(0)
                }
            },
        )
    };

    shutdown_signal().await;

    reporter.stop().await;
    cache.stop().await;
    store.cache().stop().await;

    if let Some(path) = &config.snapshot_path {
        let saved = cache
            .save_snapshot(path)
            .await
            .with_context(|| format!("failed to save snapshot to {}", path.display()))?;
        info!(path = %path.display(), saved, "Snapshot saved");
    }

    report_metrics(&cache, &coordinator);
    info!("Shutdown complete");
    Ok(())
}

fn report_metrics(cache: &TtlCache<Value>, coordinator: &IdempotencyCoordinator) {
    let metrics = cache.get_detailed_metrics();
    info!(
        entries = metrics.total_entries,
        hit_rate = metrics.hit_rate,
        evictions = metrics.evictions,
        efficiency = metrics.efficiency_score,
        hot_shards = ?cache.get_hot_shards(90.0),
        contended_shards = ?cache.get_contended_shards(90.0),
        "Cache metrics"
    );

    let idem = coordinator.get_metrics();
    info!(
        requests = idem.total_requests,
        hits = idem.cache_hits,
        misses = idem.cache_misses,
        storage_errors = idem.storage_errors,
        expired_cleanups = idem.expired_cleanups,
        "Idempotency metrics"
    );
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
