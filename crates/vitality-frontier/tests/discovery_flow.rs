//! End-to-end discovery against a local site: robots.txt declares a sitemap
//! that lists a dedicated schedule page and an events page.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;

use vitality_breaker::BreakerRegistry;
use vitality_core::{
    ExtractionMarks, KeywordSets, Result, VisitOutcome, VisitSink,
};
use vitality_fetch::{
    FetcherConfig, OriginPolicy, PolicyTable, RespectfulFetcher, SuppressionList,
};
use vitality_frontier::{discover_candidates, CandidateSource, NoopScorer};

#[derive(Default)]
struct MemorySink {
    visits: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl VisitSink for MemorySink {
    async fn record_visit(&self, parish_id: i64, url: &str, _outcome: &VisitOutcome) -> Result<()> {
        self.visits
            .lock()
            .unwrap()
            .push((parish_id, url.to_string()));
        Ok(())
    }

    async fn record_extraction(
        &self,
        _parish_id: i64,
        _url: &str,
        _marks: &ExtractionMarks,
    ) -> Result<()> {
        Ok(())
    }
}

async fn spawn_parish_site() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let robots = format!("User-agent: *\nSitemap: {base}/alt-sitemap.xml\n");
    let sitemap = format!(
        r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/mass-times</loc></url>
  <url><loc>{base}/events</loc></url>
</urlset>"#
    );

    let app = Router::new()
        .route("/robots.txt", get(move || async move { robots }))
        .route("/alt-sitemap.xml", get(move || async move { sitemap }))
        .route(
            "/",
            get(|| async { "<html><body>Welcome to our parish.</body></html>" }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

fn test_fetcher(sink: Arc<dyn VisitSink>) -> RespectfulFetcher {
    let table = PolicyTable::new(OriginPolicy {
        rate_per_sec: 200.0,
        burst: 100,
        max_concurrency: 4,
        base_delay: Duration::from_millis(0),
    });
    RespectfulFetcher::new(
        FetcherConfig {
            max_retries: 0,
            ..FetcherConfig::default()
        },
        table,
        Arc::new(BreakerRegistry::new()),
        Arc::new(SuppressionList::new()),
        sink,
        CancellationToken::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn robots_sitemap_hints_feed_discovery() {
    let base = spawn_parish_site().await;
    let sink = Arc::new(MemorySink::default());
    let fetcher = test_fetcher(sink.clone());
    let keywords = KeywordSets::default();

    let candidates = discover_candidates(&fetcher, 42, &base, &keywords, &NoopScorer)
        .await
        .unwrap();

    let mass_times = candidates
        .iter()
        .find(|c| c.url.path() == "/mass-times")
        .expect("mass-times discovered");
    let events = candidates
        .iter()
        .find(|c| c.url.path() == "/events")
        .expect("events discovered");

    assert!(mass_times.score >= 40, "score was {}", mass_times.score);
    assert!(events.score < 40, "score was {}", events.score);
    assert_eq!(mass_times.source, CandidateSource::RobotsHint);

    // Highest score is visited first.
    assert_eq!(candidates[0].url.path(), "/mass-times");

    // The root-page visit went through the ledger for parish 42.
    let visits = sink.visits.lock().unwrap();
    assert!(visits.iter().any(|(pid, url)| *pid == 42 && url.ends_with('/')));
}
