//! Heartbeat loop — keeps this worker's row alive in Postgres.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use vitality_core::PipelineError;
use vitality_db::PgStore;

/// Spawns the heartbeat loop. Re-registers on `UnknownWorker`; after
/// `fatal_after` of consecutive failures the worker gives up, sets
/// `heartbeat_lost` and cancels the whole process (exit code 2). Drop the
/// returned sender to stop the loop.
pub fn spawn_heartbeat(
    store: PgStore,
    worker_id: String,
    pod_name: String,
    interval: Duration,
    fatal_after: Duration,
    cancel: CancellationToken,
    heartbeat_lost: Arc<AtomicBool>,
) -> watch::Sender<()> {
    let (stop_tx, mut stop_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut failing_since: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.heartbeat(&worker_id).await {
                        Ok(()) => {
                            failing_since = None;
                            debug!("heartbeat sent for worker {}", worker_id);
                        }
                        Err(PipelineError::UnknownWorker(_)) => {
                            warn!("worker {} has no active row, re-registering", worker_id);
                            if let Err(e) = store.register_worker(&worker_id, &pod_name).await {
                                warn!("re-registration failed: {}", e);
                            }
                        }
                        Err(e) => {
                            warn!("heartbeat failed for worker {}: {}", worker_id, e);
                            let since = *failing_since.get_or_insert_with(Instant::now);
                            if since.elapsed() >= fatal_after {
                                error!(
                                    "no successful heartbeat for {:?}, shutting down",
                                    fatal_after
                                );
                                heartbeat_lost.store(true, Ordering::SeqCst);
                                cancel.cancel();
                                break;
                            }
                        }
                    }
                }
                _ = stop_rx.changed() => {
                    debug!("heartbeat stopped for worker {}", worker_id);
                    break;
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    stop_tx
}
