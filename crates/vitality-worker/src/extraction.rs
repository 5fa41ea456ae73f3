//! Extraction role: claim dioceses, pull their parish directories apart and
//! upsert every parish found.

use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{info, warn};
use url::Url;

use vitality_core::{AssignmentStatus, Parish, PipelineError, Result};
use vitality_db::ClaimedDiocese;
use vitality_fetch::FetchKind;

use crate::context::WorkerContext;
use crate::metrics::OutcomeLabel;
use crate::telemetry::CompletionRecord;

const IDLE_SLEEP: Duration = Duration::from_secs(60);

pub async fn run(ctx: &WorkerContext) -> Result<()> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let claimed = match run_cycle(ctx).await {
            Ok(count) => count,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!("extraction cycle failed: {}", e);
                ctx.telemetry.record_error("extraction", &e.to_string());
                0
            }
        };
        if claimed == 0 && !ctx.sleep_cancellable(IDLE_SLEEP).await {
            return Err(PipelineError::Cancelled);
        }
    }
}

/// Claim and process one batch. Returns how many dioceses were claimed.
pub async fn run_cycle(ctx: &WorkerContext) -> Result<usize> {
    ctx.beat().await;
    let claimed = ctx
        .store
        .claim_next(&ctx.config.worker_id, ctx.config.claim_batch_size)
        .await?;

    for diocese in &claimed {
        if ctx.cancel.is_cancelled() {
            // Shutdown fails the remaining assignments before exit.
            return Err(PipelineError::Cancelled);
        }
        ctx.metrics.active_dioceses.inc();
        let started = Instant::now();
        let outcome = match extract_diocese(ctx, diocese).await {
            Ok(stats) => {
                ctx.telemetry.record_completion(CompletionRecord {
                    at: chrono::Utc::now(),
                    diocese_id: diocese.diocese_id,
                    parishes_processed: stats.parishes,
                    facts_written: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    outcome: "completed".to_string(),
                });
                AssignmentStatus::Completed
            }
            Err(PipelineError::Cancelled) => {
                ctx.metrics.active_dioceses.dec();
                ctx.store
                    .complete_assignment(
                        &ctx.config.worker_id,
                        diocese.diocese_id,
                        AssignmentStatus::Failed,
                    )
                    .await?;
                return Err(PipelineError::Cancelled);
            }
            Err(e) => {
                warn!("diocese {} extraction failed: {}", diocese.diocese_id, e);
                ctx.telemetry.record_error("extraction", &e.to_string());
                AssignmentStatus::Failed
            }
        };
        ctx.store
            .complete_assignment(&ctx.config.worker_id, diocese.diocese_id, outcome)
            .await?;
        ctx.metrics.active_dioceses.dec();
        ctx.metrics
            .dioceses_processed
            .get_or_create(&OutcomeLabel(outcome.as_str().to_string()))
            .inc();
        ctx.telemetry.incr_processed();
    }
    ctx.telemetry.set_current(None, None);
    Ok(claimed.len())
}

struct DioceseStats {
    parishes: u64,
}

async fn extract_diocese(ctx: &WorkerContext, diocese: &ClaimedDiocese) -> Result<DioceseStats> {
    ctx.telemetry.set_current(Some(diocese.name.clone()), None);

    let directory = ctx
        .store
        .directory_for(diocese.diocese_id)
        .await?
        .filter(|d| d.found)
        .ok_or_else(|| {
            PipelineError::InvalidOutput(format!(
                "diocese {} has no usable parish directory",
                diocese.diocese_id
            ))
        })?;

    let base = Url::parse(&directory.directory_url)
        .map_err(|e| PipelineError::InvalidOutput(format!("bad directory url: {e}")))?;
    let page = ctx
        .fetcher
        .fetch(&directory.directory_url, FetchKind::DiocesePage)
        .await?;

    let (mut parser_name, mut parsed) = ctx.parsers.parse_directory(&page.body, &base)?;
    if parsed.is_empty() {
        // Script-rendered directories need the browser pool.
        match ctx.fetcher.fetch_js(&directory.directory_url).await {
            Ok(rendered) => {
                let (name, reparsed) = ctx.parsers.parse_directory(&rendered.body, &base)?;
                parser_name = name;
                parsed = reparsed;
            }
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => info!(
                "rendered fallback unavailable for diocese {}: {}",
                diocese.diocese_id, e
            ),
        }
    }

    let cap = ctx.cli.max_parishes_per_diocese;
    if cap > 0 && parsed.len() > cap {
        parsed.truncate(cap);
    }
    info!(
        "diocese {}: parsed {} parish(es) via '{}'",
        diocese.diocese_id,
        parsed.len(),
        parser_name
    );

    let mut parishes = Vec::with_capacity(parsed.len());
    for entry in parsed {
        let parish = Parish {
            parish_id: 0,
            diocese_id: diocese.diocese_id,
            name: entry.name,
            street: entry.street,
            city: entry.city,
            state: entry.state,
            postal_code: entry.postal_code,
            website_url: entry.website_url,
            phone: entry.phone,
            extraction_method: Some(parser_name.to_string()),
        };
        let parish_id = ctx.store.upsert_parish(&parish).await?;
        ctx.metrics.parishes_extracted.inc();
        if let Some(url) = &parish.website_url {
            parishes.push((parish_id, parish.name.clone(), url.clone()));
        }
    }
    let total = parishes.len() as u64;

    // Probe parish sites concurrently, bounded by batch_size; the per-origin
    // caps inside the fetcher still apply.
    futures::stream::iter(parishes)
        .for_each_concurrent(ctx.cli.batch_size.max(1), |(parish_id, name, url)| async move {
            ctx.telemetry
                .set_current(Some(diocese.name.clone()), Some(name));
            match ctx
                .fetcher
                .fetch_for_parish(parish_id, &url, FetchKind::ParishDetail)
                .await
            {
                Ok(_) => ctx.metrics.record_fetch_outcome("ok"),
                Err(e) => ctx.metrics.record_fetch_outcome(e.error_type()),
            }
        })
        .await;

    Ok(DioceseStats { parishes: total })
}
