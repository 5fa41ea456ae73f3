//! Telemetry surface: extraction status, bounded error/log ring buffers,
//! completion records and the best-effort monitoring push.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use vitality_breaker::BreakerSnapshot;

const ERROR_RING_SIZE: usize = 20;
const LOG_RING_SIZE: usize = 100;
const COMPLETION_RING_SIZE: usize = 50;
const PUSH_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionStatus {
    pub role: String,
    pub current_diocese: Option<String>,
    pub current_parish: Option<String>,
    pub processed: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub at: DateTime<Utc>,
    pub context: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRecord {
    pub at: DateTime<Utc>,
    pub diocese_id: i64,
    pub parishes_processed: u64,
    pub facts_written: u64,
    pub duration_ms: u64,
    pub outcome: String,
}

/// One wire event on the monitoring stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Status(ExtractionStatus),
    Error(ErrorEvent),
    Completion(CompletionRecord),
    Report(serde_json::Value),
}

/// Everything an external observer can see about this worker.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub worker_id: String,
    pub status: ExtractionStatus,
    pub breakers: Vec<BreakerSnapshot>,
    pub recent_errors: Vec<ErrorEvent>,
    pub recent_completions: Vec<CompletionRecord>,
    pub recent_log_lines: Vec<String>,
}

pub struct Telemetry {
    worker_id: String,
    status: Mutex<ExtractionStatus>,
    errors: Mutex<VecDeque<ErrorEvent>>,
    log_lines: Mutex<VecDeque<String>>,
    completions: Mutex<VecDeque<CompletionRecord>>,
    push_tx: Option<mpsc::Sender<TelemetryEvent>>,
}

impl Telemetry {
    /// Build the telemetry surface. When `monitoring_url` is set, a
    /// background pusher POSTs newline-delimited JSON events to
    /// `<url>/events`; the queue is bounded and overflow is dropped.
    pub fn new(worker_id: String, role: &str, monitoring_url: Option<String>) -> Self {
        let push_tx = monitoring_url.map(|url| {
            let (tx, rx) = mpsc::channel::<TelemetryEvent>(PUSH_QUEUE_SIZE);
            tokio::spawn(push_loop(url, rx));
            tx
        });
        Self {
            worker_id,
            status: Mutex::new(ExtractionStatus {
                role: role.to_string(),
                ..ExtractionStatus::default()
            }),
            errors: Mutex::new(VecDeque::with_capacity(ERROR_RING_SIZE)),
            log_lines: Mutex::new(VecDeque::with_capacity(LOG_RING_SIZE)),
            completions: Mutex::new(VecDeque::with_capacity(COMPLETION_RING_SIZE)),
            push_tx,
        }
    }

    pub fn set_current(&self, diocese: Option<String>, parish: Option<String>) {
        let mut status = self.status.lock().unwrap();
        status.current_diocese = diocese;
        status.current_parish = parish;
    }

    pub fn incr_processed(&self) {
        let status = {
            let mut status = self.status.lock().unwrap();
            status.processed += 1;
            status.clone()
        };
        self.push(TelemetryEvent::Status(status));
    }

    pub fn record_error(&self, context: &str, message: &str) {
        let event = ErrorEvent {
            at: Utc::now(),
            context: context.to_string(),
            message: message.to_string(),
        };
        {
            let mut status = self.status.lock().unwrap();
            status.errors += 1;
        }
        push_bounded(&self.errors, event.clone(), ERROR_RING_SIZE);
        self.push(TelemetryEvent::Error(event));
    }

    pub fn record_completion(&self, record: CompletionRecord) {
        push_bounded(&self.completions, record.clone(), COMPLETION_RING_SIZE);
        self.push(TelemetryEvent::Completion(record));
    }

    pub fn record_report(&self, report: serde_json::Value) {
        self.push(TelemetryEvent::Report(report));
    }

    pub fn log_line(&self, line: String) {
        push_bounded(&self.log_lines, line, LOG_RING_SIZE);
    }

    pub fn snapshot(&self, breakers: Vec<BreakerSnapshot>) -> StatusSnapshot {
        StatusSnapshot {
            worker_id: self.worker_id.clone(),
            status: self.status.lock().unwrap().clone(),
            breakers,
            recent_errors: self.errors.lock().unwrap().iter().cloned().collect(),
            recent_completions: self.completions.lock().unwrap().iter().cloned().collect(),
            recent_log_lines: self.log_lines.lock().unwrap().iter().cloned().collect(),
        }
    }

    /// Never blocks: a full queue drops the event.
    fn push(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.push_tx {
            let _ = tx.try_send(event);
        }
    }
}

fn push_bounded<T>(ring: &Mutex<VecDeque<T>>, item: T, cap: usize) {
    let mut ring = ring.lock().unwrap();
    if ring.len() == cap {
        ring.pop_front();
    }
    ring.push_back(item);
}

async fn push_loop(url: String, mut rx: mpsc::Receiver<TelemetryEvent>) {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            debug!("telemetry push disabled: {}", e);
            return;
        }
    };
    let endpoint = format!("{}/events", url.trim_end_matches('/'));
    while let Some(event) = rx.recv().await {
        let Ok(mut line) = serde_json::to_string(&event) else {
            continue;
        };
        line.push('\n');
        // Fire-and-forget; a down monitor must never slow extraction.
        if let Err(e) = client
            .post(&endpoint)
            .header("content-type", "application/x-ndjson")
            .body(line)
            .send()
            .await
        {
            debug!("telemetry push failed: {}", e);
        }
    }
}
