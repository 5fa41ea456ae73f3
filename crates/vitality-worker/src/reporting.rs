//! Reporting role: the lead worker summarizes pipeline progress.

use tracing::{info, warn};

use vitality_core::{PipelineError, Result};

use crate::context::WorkerContext;

pub async fn run(ctx: &WorkerContext) -> Result<()> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        ctx.beat().await;
        match ctx.store.is_lead(&ctx.config.worker_id).await {
            Ok(true) => {
                if let Err(e) = run_cycle(ctx).await {
                    warn!("reporting cycle failed: {}", e);
                    ctx.telemetry.record_error("reporting", &e.to_string());
                }
            }
            Ok(false) => info!("not lead, skipping report"),
            Err(e) => warn!("lead check failed: {}", e),
        }
        if !ctx.sleep_cancellable(ctx.config.reporting_interval).await {
            return Err(PipelineError::Cancelled);
        }
    }
}

pub async fn run_cycle(ctx: &WorkerContext) -> Result<()> {
    let summary = ctx.store.reporting_summary().await?;
    info!(
        "report: {}/{} dioceses have directories, {} parishes ({} with sites), \
         {} facts total ({} in the last day), {} urls visited, {} blocked",
        summary.dioceses_with_directory,
        summary.dioceses,
        summary.parishes,
        summary.parishes_with_website,
        summary.facts_total,
        summary.facts_last_day,
        summary.urls_visited,
        summary.urls_blocked
    );
    let payload = serde_json::to_value(&summary)
        .map_err(|e| PipelineError::InvalidOutput(e.to_string()))?;
    ctx.telemetry.record_report(payload);
    Ok(())
}
