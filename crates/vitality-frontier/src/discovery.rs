//! Candidate discovery for one parish: sitemaps, robots hints, root links.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use url::Url;

use vitality_core::{KeywordSets, PipelineError, Result};
use vitality_fetch::{FetchKind, RespectfulFetcher};

use crate::links::extract_links;
use crate::score::{score_candidate, UrlScorer};
use crate::sitemap::{parse_sitemap, SitemapDocument, SITEMAP_CANDIDATES};

/// How many nested sitemaps an index may contribute.
const MAX_CHILD_SITEMAPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Sitemap,
    RobotsHint,
    Link,
    Root,
}

/// One scored URL pending a visit.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub url: Url,
    pub anchor: String,
    pub score: u8,
    pub source: CandidateSource,
}

/// Discover and score candidate URLs for a parish website.
///
/// Individual fetch failures are tolerated; only cancellation aborts the
/// whole discovery. Sitemap-declared URLs are kept as-is (the site curates
/// them); crawled links must pass the schedule-relevance filter.
pub async fn discover_candidates(
    fetcher: &RespectfulFetcher,
    parish_id: i64,
    root_url: &str,
    keywords: &KeywordSets,
    scorer: &dyn UrlScorer,
) -> Result<Vec<Candidate>> {
    let root = Url::parse(root_url)
        .map_err(|e| PipelineError::InvalidOutput(format!("bad parish url: {e}")))?;
    let host = root
        .host_str()
        .ok_or_else(|| PipelineError::InvalidOutput("parish url has no host".to_string()))?
        .to_string();

    // url -> (anchor, source); BTreeMap keeps enumeration deterministic.
    let mut seen: BTreeMap<String, (Url, String, CandidateSource)> = BTreeMap::new();

    // 1. Well-known sitemap locations.
    for path in SITEMAP_CANDIDATES {
        let sitemap_url = match root.join(path) {
            Ok(u) => u,
            Err(_) => continue,
        };
        collect_sitemap(fetcher, sitemap_url.as_str(), &root, CandidateSource::Sitemap, &mut seen)
            .await?;
    }

    // 2. robots.txt Sitemap hints (cached by the fetcher during step 1).
    for hint in fetcher.robots_sitemaps(&host) {
        collect_sitemap(fetcher, &hint, &root, CandidateSource::RobotsHint, &mut seen).await?;
    }

    // 3. Root page links.
    match fetcher
        .fetch_for_parish(parish_id, root.as_str(), FetchKind::SchedulePage)
        .await
    {
        Ok(page) => {
            for (link, anchor) in extract_links(&page.body, &root) {
                let is_root = link.path() == "/" || link.path().is_empty();
                if !is_root && !keywords.is_schedule_path(link.path()) {
                    continue;
                }
                seen.entry(link.as_str().to_string())
                    .and_modify(|(_, existing_anchor, _)| {
                        if existing_anchor.is_empty() {
                            *existing_anchor = anchor.clone();
                        }
                    })
                    .or_insert((link, anchor, CandidateSource::Link));
            }
        }
        Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
        Err(e) => debug!("root page fetch failed for {}: {}", root, e),
    }

    // The root itself is always a candidate.
    let mut root_entry = root.clone();
    root_entry.set_fragment(None);
    seen.entry(root_entry.as_str().to_string())
        .or_insert((root_entry, String::new(), CandidateSource::Root));

    let mut candidates: Vec<Candidate> = seen
        .into_values()
        .map(|(url, anchor, source)| {
            let score = score_candidate(&url, &anchor, keywords, scorer);
            Candidate {
                url,
                anchor,
                score,
                source,
            }
        })
        .collect();
    order_candidates(&mut candidates);
    Ok(candidates)
}

async fn collect_sitemap(
    fetcher: &RespectfulFetcher,
    sitemap_url: &str,
    root: &Url,
    source: CandidateSource,
    seen: &mut BTreeMap<String, (Url, String, CandidateSource)>,
) -> Result<()> {
    let Some(doc) = fetch_sitemap(fetcher, sitemap_url).await? else {
        return Ok(());
    };
    match doc {
        SitemapDocument::UrlSet(urls) => {
            add_sitemap_urls(urls, root, source, seen);
        }
        SitemapDocument::Index(children) => {
            // Depth is bounded at two: children of an index must be urlsets.
            for child in children.into_iter().take(MAX_CHILD_SITEMAPS) {
                if let Some(SitemapDocument::UrlSet(urls)) =
                    fetch_sitemap(fetcher, &child).await?
                {
                    add_sitemap_urls(urls, root, source, seen);
                }
            }
        }
    }
    Ok(())
}

async fn fetch_sitemap(
    fetcher: &RespectfulFetcher,
    url: &str,
) -> Result<Option<SitemapDocument>> {
    match fetcher.fetch(url, FetchKind::Sitemap).await {
        Ok(res) => match parse_sitemap(&res.body) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                debug!("unparseable sitemap at {}: {}", url, e);
                Ok(None)
            }
        },
        Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
        Err(PipelineError::ClientError(_)) => Ok(None),
        Err(e) => {
            warn!("sitemap fetch failed at {}: {}", url, e);
            Ok(None)
        }
    }
}

fn add_sitemap_urls(
    urls: Vec<String>,
    root: &Url,
    source: CandidateSource,
    seen: &mut BTreeMap<String, (Url, String, CandidateSource)>,
) {
    for raw in urls {
        let Ok(mut url) = Url::parse(&raw) else {
            continue;
        };
        if url.host_str() != root.host_str() {
            continue;
        }
        url.set_fragment(None);
        seen.entry(url.as_str().to_string())
            .or_insert((url, String::new(), source));
    }
}

/// Visit order: descending score, then shorter path, then alphabetical.
pub fn order_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.url.path().len().cmp(&b.url.path().len()))
            .then(a.url.as_str().cmp(b.url.as_str()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::NoopScorer;

    fn candidate(url: &str, score: u8) -> Candidate {
        Candidate {
            url: Url::parse(url).unwrap(),
            anchor: String::new(),
            score,
            source: CandidateSource::Link,
        }
    }

    #[test]
    fn ordering_is_score_then_path_length_then_alpha() {
        let mut candidates = vec![
            candidate("https://p.example/events/longer-path", 10),
            candidate("https://p.example/b", 10),
            candidate("https://p.example/a", 10),
            candidate("https://p.example/mass-times", 40),
        ];
        order_candidates(&mut candidates);
        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://p.example/mass-times",
                "https://p.example/a",
                "https://p.example/b",
                "https://p.example/events/longer-path",
            ]
        );
    }

    #[test]
    fn sitemap_urls_outside_origin_are_dropped() {
        let root = Url::parse("https://p.example/").unwrap();
        let mut seen = BTreeMap::new();
        add_sitemap_urls(
            vec![
                "https://p.example/mass-times".to_string(),
                "https://evil.example/mass-times".to_string(),
                "not a url".to_string(),
            ],
            &root,
            CandidateSource::Sitemap,
            &mut seen,
        );
        assert_eq!(seen.len(), 1);
        assert!(seen.contains_key("https://p.example/mass-times"));
    }

    #[test]
    fn noop_scorer_contributes_nothing() {
        let kw = vitality_core::KeywordSets::default();
        let url = Url::parse("https://p.example/random").unwrap();
        assert_eq!(score_candidate(&url, "", &kw, &NoopScorer), 0);
    }
}
