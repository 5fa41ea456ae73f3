//! Schedule role: prioritize parishes, walk their scored URL frontier and
//! gate AI-extracted schedules into the store.

use std::time::Duration;

use tracing::{debug, info, warn};

use vitality_ai::to_parish_data;
use vitality_core::{ExtractionMarks, FactType, Parish, PipelineError, Result, VisitSink};
use vitality_fetch::FetchKind;
use vitality_frontier::{analyze_content, discover_candidates};

use crate::context::WorkerContext;

const IDLE_SLEEP: Duration = Duration::from_secs(120);
/// Candidates actually visited per parish per cycle.
const MAX_CANDIDATE_VISITS: usize = 10;

pub async fn run(ctx: &WorkerContext) -> Result<()> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let worked = match run_cycle(ctx).await {
            Ok(count) => count,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!("schedule cycle failed: {}", e);
                ctx.telemetry.record_error("schedule", &e.to_string());
                0
            }
        };
        if worked == 0 && !ctx.sleep_cancellable(IDLE_SLEEP).await {
            return Err(PipelineError::Cancelled);
        }
    }
}

/// One pass over the prioritized parish batch. Returns how many parishes
/// were selected.
pub async fn run_cycle(ctx: &WorkerContext) -> Result<usize> {
    ctx.beat().await;
    let suppressed_hosts = ctx.suppression.hosts();
    let parishes = ctx
        .store
        .select_parishes_for_schedule(
            ctx.cli.num_parishes_for_schedule,
            ctx.config.stale_after_days,
            &suppressed_hosts,
        )
        .await?;
    if parishes.is_empty() {
        return Ok(0);
    }
    info!("schedule: processing {} parish(es)", parishes.len());

    for parish in &parishes {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        match process_parish(ctx, parish).await {
            Ok(()) => {}
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            // Any other failure moves on to the next parish.
            Err(e) => {
                debug!("parish {} failed: {}", parish.parish_id, e);
                ctx.telemetry.record_error("schedule", &e.to_string());
            }
        }
        ctx.telemetry.incr_processed();
    }
    ctx.telemetry.set_current(None, None);
    Ok(parishes.len())
}

async fn process_parish(ctx: &WorkerContext, parish: &Parish) -> Result<()> {
    let Some(website) = parish.website_url.as_deref() else {
        return Ok(());
    };
    let gate = ctx
        .gate
        .as_ref()
        .ok_or_else(|| PipelineError::Config("schedule role requires GEMINI_API_KEY".to_string()))?;
    ctx.telemetry.set_current(None, Some(parish.name.clone()));

    let keywords = ctx.keywords.read().await.clone();
    let candidates = discover_candidates(
        &ctx.fetcher,
        parish.parish_id,
        website,
        &keywords,
        ctx.scorer.as_ref(),
    )
    .await?;

    for candidate in &candidates {
        ctx.store
            .record_discovery(parish.parish_id, candidate.url.as_str(), candidate.score as i16)
            .await?;
    }

    // Visit order comes from the ledger, so scores persisted in earlier
    // cycles keep their ranking.
    let stored = ctx
        .store
        .url_candidates(parish.parish_id, MAX_CANDIDATE_VISITS as i64)
        .await?;

    let mut facts_written = 0u64;
    for candidate in &stored {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let Ok(candidate_url) = url::Url::parse(&candidate.url) else {
            continue;
        };
        let page = match ctx
            .fetcher
            .fetch_for_parish(parish.parish_id, &candidate.url, FetchKind::SchedulePage)
            .await
        {
            Ok(page) => {
                ctx.metrics.record_fetch_outcome("ok");
                page
            }
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                // Exhausting candidates, not aborting the parish.
                ctx.metrics.record_fetch_outcome(e.error_type());
                continue;
            }
        };

        // A near-empty body usually means a script-rendered page.
        let page = if page.content_size_bytes < 512 {
            match ctx
                .fetcher
                .fetch_js_for_parish(parish.parish_id, &candidate.url)
                .await
            {
                Ok(rendered) => rendered,
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    debug!("rendered fetch unavailable for {}: {}", candidate.url, e);
                    page
                }
            }
        } else {
            page
        };

        let analysis = analyze_content(&page.body, &keywords);
        let mut marks = ExtractionMarks {
            extraction_success: true,
            schedule_data_found: false,
            schedule_keywords_count: analysis.schedule_keywords_count,
            quality_score: Some(analysis.quality_score),
        };

        for fact_type in FactType::ALL {
            match gate
                .extract(
                    &parish.name,
                    fact_type,
                    &candidate_url,
                    &analysis.text,
                    &keywords,
                )
                .await
            {
                Ok(Some(schedule)) => {
                    let row =
                        to_parish_data(parish.parish_id, fact_type, &candidate_url, &schedule);
                    ctx.store.append_parish_data(&row).await?;
                    ctx.metrics.facts_written.inc();
                    facts_written += 1;
                    marks.schedule_data_found = true;
                }
                Ok(None) => {}
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    // Breaker open or quota gone; stop burning AI calls on
                    // this page.
                    debug!("ai extraction stopped on {}: {}", candidate.url, e);
                    ctx.telemetry.record_error("ai", &e.to_string());
                    break;
                }
            }
        }

        ctx.store
            .record_extraction(parish.parish_id, &candidate.url, &marks)
            .await?;

        if facts_written > 0 {
            info!(
                "parish {} ({}): {} fact(s) from {}",
                parish.parish_id, parish.name, facts_written, candidate.url
            );
            return Ok(());
        }
    }

    // Candidates exhausted with nothing accepted; the diocese carries on.
    ctx.telemetry.record_error(
        "schedule",
        &format!("no schedule extracted for parish {}", parish.parish_id),
    );
    Ok(())
}
