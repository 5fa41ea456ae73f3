//! Shared worker state, constructed once in `main` and passed by reference
//! into every loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vitality_ai::ConfidenceGate;
use vitality_breaker::BreakerRegistry;
use vitality_core::KeywordSets;
use vitality_db::PgStore;
use vitality_fetch::{RespectfulFetcher, SuppressionList};
use vitality_frontier::UrlScorer;
use vitality_parsers::ParserRegistry;

use crate::config::{Cli, WorkerConfig};
use crate::metrics::WorkerMetrics;
use crate::telemetry::Telemetry;

pub struct WorkerContext {
    pub cli: Cli,
    pub config: WorkerConfig,
    pub store: PgStore,
    pub breakers: Arc<BreakerRegistry>,
    pub fetcher: Arc<RespectfulFetcher>,
    /// Present when the worker has an AI credential; the schedule loop
    /// requires it.
    pub gate: Option<Arc<ConfidenceGate>>,
    pub parsers: Arc<ParserRegistry>,
    pub keywords: Arc<RwLock<KeywordSets>>,
    pub suppression: Arc<SuppressionList>,
    pub scorer: Arc<dyn UrlScorer>,
    pub telemetry: Arc<Telemetry>,
    pub metrics: WorkerMetrics,
    pub cancel: CancellationToken,
}

impl WorkerContext {
    /// Best-effort heartbeat at the top of a loop iteration. The dedicated
    /// heartbeat task owns liveness; this just freshens the row.
    pub async fn beat(&self) {
        if let Err(e) = self.store.heartbeat(&self.config.worker_id).await {
            debug!("inline heartbeat failed: {}", e);
        }
    }

    pub async fn sleep_cancellable(&self, d: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

/// Reload schedule keywords and the suppression list on a fixed interval.
/// Both caches are replaced atomically; a failed reload keeps the old view.
pub fn spawn_config_refresh(
    store: PgStore,
    keywords: Arc<RwLock<KeywordSets>>,
    suppression: Arc<SuppressionList>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would race startup loading.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.load_schedule_keywords().await {
                        Ok(rows) => {
                            *keywords.write().await = KeywordSets::from_rows(&rows);
                            debug!("reloaded {} schedule keywords", rows.len());
                        }
                        Err(e) => warn!("keyword reload failed: {}", e),
                    }
                    match store.load_suppression_urls().await {
                        Ok(rows) => suppression.reload(&rows),
                        Err(e) => warn!("suppression reload failed: {}", e),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}
