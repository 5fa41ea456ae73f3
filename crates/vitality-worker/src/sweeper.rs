//! Sweep task — the lead worker reclaims work from dead workers.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vitality_db::PgStore;

use crate::metrics::WorkerMetrics;

/// Spawn the sweep as a background task. Every tick it checks leadership
/// (smallest active worker_id); only the lead sweeps, so exactly one worker
/// in the fleet runs it at a time.
pub fn spawn_sweeper(
    store: PgStore,
    worker_id: String,
    interval: Duration,
    dead_after: Duration,
    metrics: WorkerMetrics,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.is_lead(&worker_id).await {
                        Ok(true) => {
                            match store.sweep(dead_after.as_secs() as i64).await {
                                Ok(report) => {
                                    metrics
                                        .sweep_expired_workers
                                        .inc_by(report.expired_workers.len() as u64);
                                    metrics
                                        .sweep_reclaimed_dioceses
                                        .inc_by(report.reclaimed_dioceses.len() as u64);
                                }
                                Err(e) => warn!("sweep failed: {}", e),
                            }
                        }
                        Ok(false) => debug!("not lead, skipping sweep"),
                        Err(e) => warn!("lead check failed: {}", e),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}
