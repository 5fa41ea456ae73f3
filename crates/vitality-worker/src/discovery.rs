//! Discovery role: find each diocese's parish directory page.

use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use vitality_core::types::stable_diocese_id;
use vitality_core::{DetectedBy, Diocese, PipelineError, Result};
use vitality_fetch::FetchKind;
use vitality_frontier::extract_links;
use vitality_parsers::parse_diocese_registry;

use crate::context::WorkerContext;

const SWEEP_SLEEP: Duration = Duration::from_secs(5 * 60);
const DIOCESES_PER_CYCLE: i64 = 25;

/// Tokens that mark a link as a likely parish directory.
const DIRECTORY_TOKENS: [&str; 7] = [
    "parish-finder",
    "find-a-parish",
    "parish-directory",
    "parishes",
    "directory",
    "churches",
    "parish-search",
];

pub async fn run(ctx: &WorkerContext) -> Result<()> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        match run_cycle(ctx).await {
            Ok(()) => {}
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!("discovery cycle failed: {}", e);
                ctx.telemetry.record_error("discovery", &e.to_string());
            }
        }
        if !ctx.sleep_cancellable(SWEEP_SLEEP).await {
            return Err(PipelineError::Cancelled);
        }
    }
}

pub async fn run_cycle(ctx: &WorkerContext) -> Result<()> {
    ctx.beat().await;

    // Diocese discovery precedes directory detection: new registry entries
    // become rows before this sweep looks for their directories.
    match seed_dioceses(ctx).await {
        Ok(()) => {}
        Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
        Err(e) => {
            warn!("diocese registry seeding failed: {}", e);
            ctx.telemetry.record_error("discovery", &e.to_string());
        }
    }

    let dioceses = ctx.store.dioceses_missing_directory(DIOCESES_PER_CYCLE).await?;
    if dioceses.is_empty() {
        return Ok(());
    }
    info!("discovery: {} diocese(s) without a directory", dioceses.len());

    for (diocese_id, name, website_url) in dioceses {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        ctx.telemetry.set_current(Some(name.clone()), None);
        match detect_directory(ctx, diocese_id, &name, &website_url).await {
            Ok(found) => {
                ctx.telemetry.incr_processed();
                if !found {
                    ctx.telemetry
                        .record_error("discovery", &format!("no directory found for {name}"));
                }
            }
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!("directory detection failed for {}: {}", name, e);
                ctx.telemetry.record_error("discovery", &e.to_string());
            }
        }
    }
    ctx.telemetry.set_current(None, None);
    Ok(())
}

/// Upsert a Diocese row for every entry on the configured registry page.
/// Ids are derived from the diocese's website host, so re-seeding and
/// concurrent workers converge on the same rows.
async fn seed_dioceses(ctx: &WorkerContext) -> Result<()> {
    let Some(registry_url) = ctx.config.diocese_registry_url.clone() else {
        return Ok(());
    };
    let base = Url::parse(&registry_url)
        .map_err(|e| PipelineError::InvalidOutput(format!("bad registry url: {e}")))?;
    let page = ctx
        .fetcher
        .fetch(&registry_url, FetchKind::DiocesePage)
        .await?;

    let entries = parse_diocese_registry(&page.body, &base);
    if entries.is_empty() {
        warn!("diocese registry at {} yielded no entries", registry_url);
        return Ok(());
    }

    let mut seeded = 0usize;
    for entry in entries {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let Some(host) = Url::parse(&entry.website_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        else {
            continue;
        };
        let diocese = Diocese {
            diocese_id: stable_diocese_id(&host),
            name: entry.name,
            address: None,
            website_url: entry.website_url,
        };
        ctx.store.upsert_diocese(&diocese).await?;
        seeded += 1;
    }
    info!("registry seeding upserted {} diocese(s)", seeded);
    Ok(())
}

async fn detect_directory(
    ctx: &WorkerContext,
    diocese_id: i64,
    name: &str,
    website_url: &str,
) -> Result<bool> {
    let base = Url::parse(website_url)
        .map_err(|e| PipelineError::InvalidOutput(format!("bad diocese url: {e}")))?;
    let page = ctx.fetcher.fetch(website_url, FetchKind::DiocesePage).await?;

    let (directory_url, detected_by) = match find_directory_link(&page.body, &base) {
        Some(url) => (Some(url), DetectedBy::Heuristic),
        None => (
            search_directory(ctx, name).await,
            DetectedBy::SearchFallback,
        ),
    };

    let Some(directory_url) = directory_url else {
        ctx.store
            .upsert_parish_directory(diocese_id, website_url, false, DetectedBy::Heuristic)
            .await?;
        return Ok(false);
    };

    // Probe the candidate so `found` reflects a reachable page.
    let found = ctx
        .fetcher
        .fetch(directory_url.as_str(), FetchKind::DiocesePage)
        .await
        .is_ok();
    ctx.store
        .upsert_parish_directory(diocese_id, directory_url.as_str(), found, detected_by)
        .await?;
    if found {
        info!("diocese {} directory: {}", diocese_id, directory_url);
    }
    Ok(found)
}

/// Search-API fallback for directories the diocese site does not link
/// prominently. Returns the top result, if the credentials are configured.
async fn search_directory(ctx: &WorkerContext, diocese_name: &str) -> Option<Url> {
    let (key, engine) = match (
        &ctx.config.search_api_key,
        &ctx.config.search_engine_id,
    ) {
        (Some(key), Some(engine)) => (key.clone(), engine.clone()),
        _ => return None,
    };
    let query = format!("{diocese_name} parish directory");

    let result = ctx
        .breakers
        .guard("search_api", async {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .map_err(|e| PipelineError::TransportError(e.to_string()))?;
            let response = client
                .get("https://www.googleapis.com/customsearch/v1")
                .query(&[("key", key.as_str()), ("cx", engine.as_str()), ("q", &query)])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(PipelineError::ServerError(response.status().as_u16()));
            }
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PipelineError::InvalidOutput(e.to_string()))?;
            Ok(body)
        })
        .await;

    match result {
        Ok(body) => first_search_link(&body),
        Err(e) => {
            warn!("directory search failed for '{}': {}", diocese_name, e);
            None
        }
    }
}

fn first_search_link(body: &serde_json::Value) -> Option<Url> {
    body.get("items")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("link")?.as_str())
        .find_map(|link| Url::parse(link).ok())
}

/// Pick the most directory-looking internal link. Href tokens outrank anchor
/// text; earlier tokens in the list outrank later ones.
pub fn find_directory_link(html: &str, base: &Url) -> Option<Url> {
    let mut best: Option<(usize, Url)> = None;
    for (url, anchor) in extract_links(html, base) {
        let href = url.path().to_ascii_lowercase();
        let anchor = anchor.to_ascii_lowercase();
        let score = DIRECTORY_TOKENS
            .iter()
            .enumerate()
            .filter_map(|(i, token)| {
                let token_weight = DIRECTORY_TOKENS.len() - i;
                if href.contains(token) {
                    Some(token_weight * 2)
                } else if anchor.contains(&token.replace('-', " ")) || anchor.contains(token) {
                    Some(token_weight)
                } else {
                    None
                }
            })
            .max();
        let Some(score) = score else { continue };
        match &best {
            Some((best_score, _)) if *best_score >= score => {}
            _ => best = Some((score, url)),
        }
    }
    best.map(|(_, url)| url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_href_token_over_anchor_text() {
        let base = Url::parse("https://diocese.example/").unwrap();
        let html = r#"
            <a href="/about">Parishes of our diocese</a>
            <a href="/parish-finder">Search</a>
        "#;
        let link = find_directory_link(html, &base).unwrap();
        assert_eq!(link.path(), "/parish-finder");
    }

    #[test]
    fn falls_back_to_anchor_text() {
        let base = Url::parse("https://diocese.example/").unwrap();
        let html = r#"<a href="/p123">Find a Parish</a><a href="/news">News</a>"#;
        let link = find_directory_link(html, &base).unwrap();
        assert_eq!(link.path(), "/p123");
    }

    #[test]
    fn none_when_no_link_qualifies() {
        let base = Url::parse("https://diocese.example/").unwrap();
        let html = r#"<a href="/news">News</a><a href="/contact">Contact</a>"#;
        assert!(find_directory_link(html, &base).is_none());
    }

    #[test]
    fn search_response_yields_first_parseable_link() {
        let body = serde_json::json!({
            "items": [
                {"link": "not a url"},
                {"link": "https://diocese.example/parishes"},
                {"link": "https://other.example/"},
            ]
        });
        let url = first_search_link(&body).unwrap();
        assert_eq!(url.as_str(), "https://diocese.example/parishes");
    }

    #[test]
    fn empty_search_response_yields_none() {
        assert!(first_search_link(&serde_json::json!({})).is_none());
        assert!(first_search_link(&serde_json::json!({"items": []})).is_none());
    }
}
