//! vitality-worker binary — distributed diocese/parish extraction worker.

mod config;
mod context;
mod discovery;
mod extraction;
mod health;
mod heartbeat;
mod metrics;
mod reporting;
mod router;
mod schedule;
mod sweeper;
mod telemetry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vitality_ai::{ConfidenceGate, GateConfig, GeminiClient};
use vitality_breaker::BreakerRegistry;
use vitality_core::{AssignmentStatus, KeywordSets, PipelineError};
use vitality_db::PgStore;
use vitality_fetch::{
    BrowserPool, FetcherConfig, PolicyTable, RemoteRendererFactory, RespectfulFetcher,
    SuppressionList,
};
use vitality_frontier::NoopScorer;
use vitality_parsers::default_registry;

use config::{Cli, WorkerConfig};
use context::{spawn_config_refresh, WorkerContext};
use health::HealthState;
use metrics::WorkerMetrics;
use router::WorkerRole;
use telemetry::Telemetry;

const EXIT_OK: i32 = 0;
const EXIT_STARTUP_ERROR: i32 = 1;
const EXIT_CANCELLED: i32 = 2;

#[tokio::main]
async fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install tracing subscriber");
    }

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {}", e);
            return EXIT_STARTUP_ERROR;
        }
    };
    info!(
        "starting vitality-worker {} (role {})",
        config.worker_id,
        cli.worker_type.as_str()
    );

    // The schedule path cannot start without the AI credential.
    if matches!(cli.worker_type, WorkerRole::Schedule | WorkerRole::All) {
        if let Err(e) = config.require_gemini() {
            error!("configuration error: {}", e);
            return EXIT_STARTUP_ERROR;
        }
    }

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!("database unreachable: {}", e);
            return EXIT_STARTUP_ERROR;
        }
    };
    info!("connected to database");
    let store = PgStore::new(pool);

    if let Err(e) = store
        .register_worker(&config.worker_id, &config.pod_name)
        .await
    {
        error!("worker registration failed: {}", e);
        return EXIT_STARTUP_ERROR;
    }

    let cancel = CancellationToken::new();
    let breakers = Arc::new(BreakerRegistry::new());

    // Read-mostly config caches, loaded now and refreshed in the background.
    let keywords = Arc::new(RwLock::new(match store.load_schedule_keywords().await {
        Ok(rows) if !rows.is_empty() => KeywordSets::from_rows(&rows),
        Ok(_) => KeywordSets::default(),
        Err(e) => {
            warn!("keyword load failed, using defaults: {}", e);
            KeywordSets::default()
        }
    }));
    let suppression = Arc::new(SuppressionList::new());
    match store.load_suppression_urls().await {
        Ok(rows) => suppression.reload(&rows),
        Err(e) => warn!("suppression load failed: {}", e),
    }
    spawn_config_refresh(
        store.clone(),
        keywords.clone(),
        suppression.clone(),
        config.config_refresh_interval,
        cancel.clone(),
    );

    let fetcher = match RespectfulFetcher::new(
        FetcherConfig::default(),
        PolicyTable::default(),
        breakers.clone(),
        suppression.clone(),
        Arc::new(store.clone()),
        cancel.clone(),
    ) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("fetcher construction failed: {}", e);
            return EXIT_STARTUP_ERROR;
        }
    };
    let fetcher = match &config.browser_endpoint {
        Some(endpoint) => {
            let factory = RemoteRendererFactory {
                endpoint: endpoint.clone(),
                render_timeout: Duration::from_secs(60),
            };
            match BrowserPool::new(Box::new(factory), cli.pool_size, Duration::from_secs(30)).await
            {
                Ok(pool) => fetcher.with_browser_pool(Arc::new(pool)),
                Err(e) => {
                    error!("browser pool construction failed: {}", e);
                    return EXIT_STARTUP_ERROR;
                }
            }
        }
        None => fetcher,
    };
    let fetcher = Arc::new(fetcher);

    let gate = match &config.gemini_api_key {
        Some(key) => match GeminiClient::new(
            key.clone(),
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
        ) {
            Ok(client) => Some(Arc::new(ConfidenceGate::new(
                Arc::new(client),
                breakers.clone(),
                GateConfig::default(),
                cancel.clone(),
            ))),
            Err(e) => {
                error!("ai client construction failed: {}", e);
                return EXIT_STARTUP_ERROR;
            }
        },
        None => None,
    };

    let monitoring_url = if cli.disable_monitoring {
        None
    } else {
        cli.monitoring_url.clone()
    };
    let telemetry = Arc::new(Telemetry::new(
        config.worker_id.clone(),
        cli.worker_type.as_str(),
        monitoring_url,
    ));
    let worker_metrics = WorkerMetrics::new();

    // Health/metrics/status HTTP server.
    let ready = Arc::new(AtomicBool::new(true));
    let health_state = Arc::new(HealthState {
        metrics: worker_metrics.clone(),
        telemetry: telemetry.clone(),
        breakers: breakers.clone(),
        ready: ready.clone(),
    });
    let metrics_port = config.metrics_port;
    let health_router = health::health_router(health_state);
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", metrics_port);
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("metrics server listening on {}", addr);
                if let Err(e) = axum::serve(listener, health_router).await {
                    warn!("metrics server stopped: {}", e);
                }
            }
            Err(e) => warn!("metrics server bind failed on {}: {}", addr, e),
        }
    });

    // Background liveness and coordination tasks.
    let heartbeat_lost = Arc::new(AtomicBool::new(false));
    let _heartbeat = heartbeat::spawn_heartbeat(
        store.clone(),
        config.worker_id.clone(),
        config.pod_name.clone(),
        config.heartbeat_interval,
        config.heartbeat_fatal_after,
        cancel.clone(),
        heartbeat_lost.clone(),
    );
    sweeper::spawn_sweeper(
        store.clone(),
        config.worker_id.clone(),
        config.sweep_interval,
        config.worker_dead_after,
        worker_metrics.clone(),
        cancel.clone(),
    );
    info!(
        "heartbeat every {:?}, sweep every {:?}",
        config.heartbeat_interval, config.sweep_interval
    );

    spawn_signal_handler(cancel.clone());

    let ctx = Arc::new(WorkerContext {
        cli,
        config,
        store: store.clone(),
        breakers,
        fetcher,
        gate,
        parsers: Arc::new(default_registry()),
        keywords,
        suppression,
        scorer: Arc::new(NoopScorer),
        telemetry,
        metrics: worker_metrics,
        cancel: cancel.clone(),
    });

    let outcome = router::run_role(ctx.clone()).await;

    // Shutdown: fail anything still processing, then retire the worker row.
    ready.store(false, Ordering::SeqCst);
    cancel.cancel();
    shutdown(&ctx).await;

    match outcome {
        Err(PipelineError::Cancelled) => {
            info!("worker cancelled");
            EXIT_CANCELLED
        }
        Err(e) if heartbeat_lost.load(Ordering::SeqCst) => {
            error!("worker lost heartbeat: {}", e);
            EXIT_CANCELLED
        }
        Err(e) => {
            error!("worker failed: {}", e);
            EXIT_STARTUP_ERROR
        }
        Ok(()) => EXIT_OK,
    }
}

async fn shutdown(ctx: &WorkerContext) {
    let worker_id = &ctx.config.worker_id;
    match ctx.store.processing_assignments(worker_id).await {
        Ok(dioceses) => {
            for diocese_id in dioceses {
                if let Err(e) = ctx
                    .store
                    .complete_assignment(worker_id, diocese_id, AssignmentStatus::Failed)
                    .await
                {
                    warn!("failed to release diocese {}: {}", diocese_id, e);
                }
            }
        }
        Err(e) => warn!("could not list processing assignments: {}", e),
    }
    if let Err(e) = ctx.store.mark_inactive(worker_id).await {
        warn!("could not mark worker inactive: {}", e);
    }
    info!("worker {} shut down", worker_id);
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sig) => sig,
                    Err(e) => {
                        warn!("sigterm handler unavailable: {}", e);
                        if ctrl_c.await.is_ok() {
                            cancel.cancel();
                        }
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}
