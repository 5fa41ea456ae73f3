//! The respectful fetcher: every outbound request runs the same gauntlet of
//! suppression, robots, rate limiting, pacing, breakers and classification,
//! and every attempt lands in the visit ledger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use vitality_breaker::BreakerRegistry;
use vitality_core::{BlockKind, PipelineError, Result, VisitOutcome, VisitSink};

use crate::browser::BrowserPool;
use crate::classify::{classify_response, ChallengeMarkers};
use crate::limiter::OriginGates;
use crate::policy::PolicyTable;
use crate::robots::{RobotsCache, RobotsRules};
use crate::suppression::SuppressionList;
use crate::timing::{BlockedCooldown, ResponseTracker};

/// What a fetch is for; selects the purpose breaker consulted alongside the
/// origin breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    DiocesePage,
    ParishDetail,
    SchedulePage,
    Sitemap,
    Robots,
}

impl FetchKind {
    fn breaker_name(&self) -> Option<&'static str> {
        match self {
            FetchKind::DiocesePage => Some("diocese_page_load"),
            FetchKind::ParishDetail | FetchKind::SchedulePage => Some("parish_detail_load"),
            FetchKind::Sitemap | FetchKind::Robots => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub response_time_ms: u64,
    pub content_size_bytes: u64,
    pub rendered: bool,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub robots_ttl: Duration,
    pub blocked_cooldown: Duration,
    pub timeout_pin_window: Duration,
    pub max_retries: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "VitalityBot/1.0 (+https://github.com/your-org/vitality; parish schedule research)"
                .to_string(),
            robots_ttl: Duration::from_secs(24 * 60 * 60),
            blocked_cooldown: Duration::from_secs(30 * 60),
            timeout_pin_window: Duration::from_secs(10 * 60),
            max_retries: 2,
        }
    }
}

pub struct RespectfulFetcher {
    http: reqwest::Client,
    config: FetcherConfig,
    gates: OriginGates,
    robots: RobotsCache,
    tracker: ResponseTracker,
    cooldown: BlockedCooldown,
    suppression: Arc<SuppressionList>,
    breakers: Arc<BreakerRegistry>,
    markers: ChallengeMarkers,
    sink: Arc<dyn VisitSink>,
    browser_pool: Option<Arc<BrowserPool>>,
    cancel: CancellationToken,
}

impl RespectfulFetcher {
    pub fn new(
        config: FetcherConfig,
        policies: PolicyTable,
        breakers: Arc<BreakerRegistry>,
        suppression: Arc<SuppressionList>,
        sink: Arc<dyn VisitSink>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| PipelineError::TransportError(e.to_string()))?;
        Ok(Self {
            http,
            robots: RobotsCache::new(config.robots_ttl),
            tracker: ResponseTracker::new(config.timeout_pin_window),
            cooldown: BlockedCooldown::new(config.blocked_cooldown),
            gates: OriginGates::new(policies),
            config,
            suppression,
            breakers,
            markers: ChallengeMarkers::default(),
            sink,
            browser_pool: None,
            cancel,
        })
    }

    pub fn with_browser_pool(mut self, pool: Arc<BrowserPool>) -> Self {
        self.browser_pool = Some(pool);
        self
    }

    /// Sitemap hints robots.txt declared for this origin, if we have seen it.
    pub fn robots_sitemaps(&self, origin: &str) -> Vec<String> {
        self.robots
            .get(origin)
            .map(|r| r.sitemaps.clone())
            .unwrap_or_default()
    }

    /// Fetch without a parish context (diocese pages, directory detection).
    pub async fn fetch(&self, url: &str, kind: FetchKind) -> Result<FetchResult> {
        self.fetch_inner(url, kind, None).await
    }

    /// Fetch a parish URL; the outcome is recorded in the visit ledger.
    pub async fn fetch_for_parish(
        &self,
        parish_id: i64,
        url: &str,
        kind: FetchKind,
    ) -> Result<FetchResult> {
        self.fetch_inner(url, kind, Some(parish_id)).await
    }

    /// Fetch through the headless-browser pool, with the same courtesy checks.
    pub async fn fetch_js(&self, url: &str) -> Result<FetchResult> {
        self.fetch_js_inner(url, None).await
    }

    pub async fn fetch_js_for_parish(&self, parish_id: i64, url: &str) -> Result<FetchResult> {
        self.fetch_js_inner(url, Some(parish_id)).await
    }

    async fn fetch_inner(
        &self,
        url: &str,
        kind: FetchKind,
        parish_id: Option<i64>,
    ) -> Result<FetchResult> {
        let started = Instant::now();
        let result = self.fetch_checked(url, kind).await;
        self.record_ledger(parish_id, url, &result, started).await;
        result
    }

    async fn fetch_js_inner(&self, url: &str, parish_id: Option<i64>) -> Result<FetchResult> {
        let started = Instant::now();
        let result = self.fetch_js_checked(url).await;
        self.record_ledger(parish_id, url, &result, started).await;
        result
    }

    async fn record_ledger(
        &self,
        parish_id: Option<i64>,
        url: &str,
        result: &Result<FetchResult>,
        started: Instant,
    ) {
        let Some(parish_id) = parish_id else { return };
        let outcome = match result {
            Ok(res) => VisitOutcome {
                http_status: Some(res.status),
                response_time_ms: res.response_time_ms,
                content_type: res.content_type.clone(),
                content_size_bytes: Some(res.content_size_bytes),
                error_type: None,
                error_message: None,
                extraction_success: false,
                schedule_data_found: false,
                schedule_keywords_count: 0,
                quality_score: None,
                fetched_at: chrono::Utc::now(),
            },
            Err(e) => VisitOutcome::failure(
                e.error_type(),
                &e.to_string(),
                started.elapsed().as_millis() as u64,
            ),
        };
        // Ledger failures are logged, never allowed to mask the fetch result.
        if let Err(e) = self.sink.record_visit(parish_id, url, &outcome).await {
            warn!("visit ledger write failed for {}: {}", url, e);
        }
    }

    async fn fetch_checked(&self, url: &str, kind: FetchKind) -> Result<FetchResult> {
        let parsed =
            Url::parse(url).map_err(|e| PipelineError::InvalidOutput(format!("bad url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| PipelineError::InvalidOutput("url has no host".to_string()))?
            .to_string();

        self.preflight(&parsed, &host)?;

        let crawl_delay = if kind == FetchKind::Robots {
            None
        } else {
            let rules = self.robots_for(&parsed, &host).await?;
            let mut target = parsed.path().to_string();
            if let Some(query) = parsed.query() {
                target.push('?');
                target.push_str(query);
            }
            if !rules.is_allowed(&target) {
                return Err(PipelineError::RobotsDisallowed);
            }
            rules.crawl_delay
        };

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&parsed, &host, kind, crawl_delay).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = retry_backoff(attempt);
                    debug!(
                        "retrying {} after {:?} ({}): attempt {}",
                        url,
                        backoff,
                        e.error_type(),
                        attempt + 1
                    );
                    self.sleep_cancellable(backoff).await?;
                    attempt += 1;
                }
                Err(e) => {
                    if let PipelineError::Blocked(kind) = &e {
                        debug!("origin {} blocked us ({}), cooling down", host, kind);
                        self.cooldown.mark(&host);
                    }
                    return Err(e);
                }
            }
        }
    }

    fn preflight(&self, url: &Url, host: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if self.suppression.is_suppressed(url) {
            return Err(PipelineError::Suppressed);
        }
        if self.cooldown.is_cooling(host) {
            return Err(PipelineError::Blocked(BlockKind::RateLimited));
        }
        Ok(())
    }

    async fn attempt(
        &self,
        url: &Url,
        host: &str,
        kind: FetchKind,
        crawl_delay: Option<Duration>,
    ) -> Result<FetchResult> {
        let _permit = self.gates.acquire(host, &self.cancel).await?;

        // Courtesy delay, jittered into [base, base * 1.5]; robots crawl-delay
        // is a lower bound on the base.
        let policy = self.gates.policy_for(host);
        let base = crawl_delay
            .map(|d| d.max(policy.base_delay))
            .unwrap_or(policy.base_delay);
        if !base.is_zero() {
            let factor = rand::thread_rng().gen_range(1.0f64..1.5f64);
            self.sleep_cancellable(base.mul_f64(factor)).await?;
        }

        let origin_breaker = self.breakers.get_or_create(&format!("origin:{host}"));
        let kind_breaker = kind.breaker_name().map(|n| self.breakers.get_or_create(n));
        if let Some(kb) = &kind_breaker {
            if !kb.try_acquire() {
                return Err(PipelineError::CircuitOpen(kb.name().to_string()));
            }
        }
        if !origin_breaker.try_acquire() {
            return Err(PipelineError::CircuitOpen(format!("origin:{host}")));
        }

        let record_failure = |e: &PipelineError| {
            if matches!(
                e,
                PipelineError::Blocked(_)
                    | PipelineError::ServerError(_)
                    | PipelineError::TransportError(_)
            ) {
                origin_breaker.record_failure();
                if let Some(kb) = &kind_breaker {
                    kb.record_failure();
                }
            }
        };

        let timeout = self.tracker.timeout_for(host);
        let started = Instant::now();
        let send = self.http.get(url.clone()).timeout(timeout).send();
        let response = tokio::select! {
            r = send => r,
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    self.tracker.record_timeout(host);
                }
                let err = PipelineError::TransportError(e.to_string());
                record_failure(&err);
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = tokio::select! {
            b = response.text() => match b {
                Ok(b) => b,
                Err(e) => {
                    let err = PipelineError::TransportError(e.to_string());
                    record_failure(&err);
                    return Err(err);
                }
            },
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match classify_response(status, &body, &self.markers) {
            Ok(()) => {
                self.tracker.record_success(host, elapsed_ms);
                origin_breaker.record_success();
                if let Some(kb) = &kind_breaker {
                    kb.record_success();
                }
                Ok(FetchResult {
                    url: url.to_string(),
                    status,
                    content_size_bytes: body.len() as u64,
                    body,
                    content_type,
                    response_time_ms: elapsed_ms,
                    rendered: false,
                })
            }
            Err(e) => {
                record_failure(&e);
                Err(e)
            }
        }
    }

    async fn fetch_js_checked(&self, url: &str) -> Result<FetchResult> {
        let pool = self
            .browser_pool
            .as_ref()
            .ok_or_else(|| {
                PipelineError::ResourceExhausted("no browser pool configured".to_string())
            })?
            .clone();

        let parsed =
            Url::parse(url).map_err(|e| PipelineError::InvalidOutput(format!("bad url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| PipelineError::InvalidOutput("url has no host".to_string()))?
            .to_string();

        self.preflight(&parsed, &host)?;
        let rules = self.robots_for(&parsed, &host).await?;
        if !rules.is_allowed(parsed.path()) {
            return Err(PipelineError::RobotsDisallowed);
        }

        let _permit = self.gates.acquire(&host, &self.cancel).await?;
        let policy = self.gates.policy_for(&host);
        let base = rules
            .crawl_delay
            .map(|d| d.max(policy.base_delay))
            .unwrap_or(policy.base_delay);
        if !base.is_zero() {
            let factor = rand::thread_rng().gen_range(1.0f64..1.5f64);
            self.sleep_cancellable(base.mul_f64(factor)).await?;
        }

        let origin_name = format!("origin:{host}");
        let origin_breaker = self.breakers.get_or_create(&origin_name);
        let webdriver = self.breakers.get_or_create("webdriver_requests");
        let js_exec = self.breakers.get_or_create("javascript_execution");
        for breaker in [&webdriver, &js_exec] {
            if !breaker.try_acquire() {
                return Err(PipelineError::CircuitOpen(breaker.name().to_string()));
            }
        }
        if !origin_breaker.try_acquire() {
            return Err(PipelineError::CircuitOpen(origin_name));
        }

        let started = Instant::now();
        let rendered = tokio::select! {
            r = pool.render(url) => r,
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match rendered {
            Ok(html) => match classify_response(200, &html, &self.markers) {
                Ok(()) => {
                    self.tracker.record_success(&host, elapsed_ms);
                    for breaker in [&origin_breaker, &webdriver, &js_exec] {
                        breaker.record_success();
                    }
                    Ok(FetchResult {
                        url: url.to_string(),
                        status: 200,
                        content_size_bytes: html.len() as u64,
                        body: html,
                        content_type: Some("text/html".to_string()),
                        response_time_ms: elapsed_ms,
                        rendered: true,
                    })
                }
                Err(e) => {
                    self.cooldown.mark(&host);
                    origin_breaker.record_failure();
                    Err(e)
                }
            },
            Err(e) => {
                for breaker in [&webdriver, &js_exec] {
                    breaker.record_failure();
                }
                Err(e)
            }
        }
    }

    async fn robots_for(&self, url: &Url, host: &str) -> Result<Arc<RobotsRules>> {
        if let Some(rules) = self.robots.get(host) {
            return Ok(rules);
        }
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), authority(url));
        let fetched = Box::pin(self.fetch_checked(&robots_url, FetchKind::Robots)).await;
        let rules = match fetched {
            Ok(res) if res.status == 200 => {
                RobotsRules::parse(&res.body, &self.config.user_agent)
            }
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            // Missing or unreadable robots.txt means no restrictions.
            Ok(_) | Err(_) => RobotsRules::allow_all(),
        };
        Ok(self.robots.insert(host, rules))
    }

    async fn sleep_cancellable(&self, d: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(d) => Ok(()),
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }
}

fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

/// 1s, 2s, 4s with ±25% jitter.
fn retry_backoff(attempt: u32) -> Duration {
    let base_ms = 1000u64 << attempt.min(2);
    let jitter = rand::thread_rng().gen_range(0.75f64..1.25f64);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{extract::State, routing::get, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use vitality_core::ExtractionMarks;

    #[derive(Default)]
    struct MemorySink {
        visits: Mutex<Vec<(i64, String, VisitOutcome)>>,
    }

    #[async_trait]
    impl VisitSink for MemorySink {
        async fn record_visit(
            &self,
            parish_id: i64,
            url: &str,
            outcome: &VisitOutcome,
        ) -> Result<()> {
            self.visits
                .lock()
                .unwrap()
                .push((parish_id, url.to_string(), outcome.clone()));
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

    struct AppState {
        hits: AtomicU32,
        status: u16,
    }

    async fn page(State(state): State<Arc<AppState>>) -> (axum::http::StatusCode, &'static str) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        (
            axum::http::StatusCode::from_u16(state.status).unwrap(),
            "<html>Mass Schedule</html>",
        )
    }

    async fn spawn_server(status: u16) -> (String, Arc<AppState>) {
        let state = Arc::new(AppState {
            hits: AtomicU32::new(0),
            status,
        });
        let app = Router::new()
            .route("/", get(page))
            .route("/page", get(page))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    fn fast_fetcher(sink: Arc<dyn VisitSink>) -> RespectfulFetcher {
        let config = FetcherConfig {
            blocked_cooldown: Duration::from_secs(60),
            max_retries: 0,
            ..FetcherConfig::default()
        };
        let mut table = PolicyTable::new(crate::policy::OriginPolicy {
            rate_per_sec: 100.0,
            burst: 50,
            max_concurrency: 4,
            base_delay: Duration::from_millis(0),
        });
        table.push(
            crate::policy::PolicyRule::Exact("never.example".to_string()),
            crate::policy::OriginPolicy::default(),
        );
        RespectfulFetcher::new(
            config,
            table,
            Arc::new(BreakerRegistry::new()),
            Arc::new(SuppressionList::new()),
            sink,
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ok_fetch_records_visit_and_stats() {
        let (base, state) = spawn_server(200).await;
        let sink = Arc::new(MemorySink::default());
        let fetcher = fast_fetcher(sink.clone());

        let result = fetcher
            .fetch_for_parish(7, &format!("{base}/page"), FetchKind::SchedulePage)
            .await
            .unwrap();
        assert_eq!(result.status, 200);
        assert!(result.body.contains("Mass Schedule"));
        assert_eq!(state.hits.load(Ordering::SeqCst), 1);

        let visits = sink.visits.lock().unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].0, 7);
        assert!(visits[0].2.is_usable());
    }

    #[tokio::test]
    async fn blocked_origin_cools_down_and_short_circuits() {
        let (base, state) = spawn_server(429).await;
        let sink = Arc::new(MemorySink::default());
        let fetcher = fast_fetcher(sink.clone());

        let first = fetcher
            .fetch_for_parish(1, &format!("{base}/page"), FetchKind::ParishDetail)
            .await;
        assert!(matches!(
            first,
            Err(PipelineError::Blocked(BlockKind::RateLimited))
        ));
        let after_first = state.hits.load(Ordering::SeqCst);

        // Second fetch to the same origin must not touch the network.
        let second = fetcher
            .fetch_for_parish(1, &format!("{base}/other"), FetchKind::ParishDetail)
            .await;
        assert!(matches!(second, Err(PipelineError::Blocked(_))));
        assert_eq!(state.hits.load(Ordering::SeqCst), after_first);

        let visits = sink.visits.lock().unwrap();
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].2.error_type.as_deref(), Some("blocked"));
        assert_eq!(visits[1].2.error_type.as_deref(), Some("blocked"));
    }

    #[tokio::test]
    async fn suppressed_urls_are_rejected_without_network() {
        let sink = Arc::new(MemorySink::default());
        let fetcher = fast_fetcher(sink.clone());
        let suppression = SuppressionList::new();
        suppression.reload(&[vitality_core::SuppressionUrl {
            url: "https://never.example".to_string(),
            reason: Some("operator request".to_string()),
            added_at: chrono::Utc::now(),
        }]);
        let fetcher = RespectfulFetcher {
            suppression: Arc::new(suppression),
            ..fetcher
        };

        let out = fetcher
            .fetch("https://never.example/page", FetchKind::ParishDetail)
            .await;
        assert!(matches!(out, Err(PipelineError::Suppressed)));
    }

    #[tokio::test]
    async fn server_errors_trip_the_origin_breaker_eventually() {
        let (base, _state) = spawn_server(500).await;
        let sink = Arc::new(MemorySink::default());
        let fetcher = fast_fetcher(sink.clone());
        let host = Url::parse(&base).unwrap().host_str().unwrap().to_string();

        for _ in 0..5 {
            let _ = fetcher
                .fetch(&format!("{base}/page"), FetchKind::Sitemap)
                .await;
        }
        let name = format!("origin:{host}");
        assert_eq!(
            fetcher.breakers.state(&name),
            Some(vitality_breaker::CircuitState::Open)
        );

        let out = fetcher
            .fetch(&format!("{base}/page"), FetchKind::Sitemap)
            .await;
        assert!(matches!(out, Err(PipelineError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn cancellation_interrupts_promptly() {
        let (base, _state) = spawn_server(200).await;
        let sink = Arc::new(MemorySink::default());
        let fetcher = Arc::new(fast_fetcher(sink));
        fetcher.cancel.cancel();

        let out = fetcher.fetch(&format!("{base}/page"), FetchKind::DiocesePage).await;
        assert!(matches!(out, Err(PipelineError::Cancelled)));
    }
}
