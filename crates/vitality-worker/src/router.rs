//! Role router: one binary, four loops.

use std::sync::Arc;
use std::time::Instant;

use clap::ValueEnum;
use tracing::warn;

use vitality_core::{PipelineError, Result};

use crate::context::WorkerContext;
use crate::{discovery, extraction, reporting, schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkerRole {
    Discovery,
    Extraction,
    Schedule,
    Reporting,
    All,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Discovery => "discovery",
            WorkerRole::Extraction => "extraction",
            WorkerRole::Schedule => "schedule",
            WorkerRole::Reporting => "reporting",
            WorkerRole::All => "all",
        }
    }
}

/// Drive the loop for this worker's role until cancellation.
pub async fn run_role(ctx: Arc<WorkerContext>) -> Result<()> {
    match ctx.cli.worker_type {
        WorkerRole::Discovery => discovery::run(&ctx).await,
        WorkerRole::Extraction => extraction::run(&ctx).await,
        WorkerRole::Schedule => schedule::run(&ctx).await,
        WorkerRole::Reporting => reporting::run(&ctx).await,
        WorkerRole::All => run_all(&ctx).await,
    }
}

/// Single-machine development mode: the four loop bodies run sequentially
/// in one process. Coordination still goes through the store.
async fn run_all(ctx: &WorkerContext) -> Result<()> {
    let mut last_report: Option<Instant> = None;
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        for (name, cycle) in [
            ("discovery", discovery::run_cycle(ctx).await),
            ("extraction", extraction::run_cycle(ctx).await.map(|_| ())),
            ("schedule", schedule::run_cycle(ctx).await.map(|_| ())),
        ] {
            match cycle {
                Ok(()) => {}
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!("{} cycle failed: {}", name, e);
                    ctx.telemetry.record_error(name, &e.to_string());
                }
            }
        }

        let report_due = last_report
            .map(|at| at.elapsed() >= ctx.config.reporting_interval)
            .unwrap_or(true);
        if report_due && ctx.store.is_lead(&ctx.config.worker_id).await.unwrap_or(false) {
            if let Err(e) = reporting::run_cycle(ctx).await {
                warn!("reporting cycle failed: {}", e);
            }
            last_report = Some(Instant::now());
        }

        if !ctx.sleep_cancellable(std::time::Duration::from_secs(30)).await {
            return Err(PipelineError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_match_the_cli_contract() {
        assert_eq!(WorkerRole::Discovery.as_str(), "discovery");
        assert_eq!(WorkerRole::All.as_str(), "all");
    }
}
