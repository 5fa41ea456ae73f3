//! Single circuit breaker: state machine and counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Per-purpose defaults. Unknown names (including every dynamic
    /// `origin:<host>` breaker) use the standard config.
    pub fn for_name(name: &str) -> Self {
        match name {
            "diocese_page_load" => Self {
                failure_threshold: 3,
                failure_window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(60),
            },
            "parish_detail_load" | "webdriver_requests" => Self {
                failure_threshold: 5,
                failure_window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(30),
            },
            "javascript_execution" => Self {
                failure_threshold: 5,
                failure_window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(60),
            },
            "ai_content_analysis" => Self {
                failure_threshold: 5,
                failure_window: Duration::from_secs(120),
                recovery_timeout: Duration::from_secs(60),
            },
            _ => Self::default(),
        }
    }
}

/// Telemetry view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub total_blocked: u64,
}

struct Inner {
    state: CircuitState,
    /// Failure timestamps inside the current window.
    window: VecDeque<Instant>,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    failure_count: u64,
    success_count: u64,
    total_requests: u64,
    total_blocked: u64,
}

/// A named circuit breaker. State lives behind a `std::sync::Mutex` with
/// short critical sections; none of the operations suspend.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                opened_at_wall: None,
                last_failure_at: None,
                failure_count: 0,
                success_count: 0,
                total_requests: 0,
                total_blocked: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed right now. An open breaker past its
    /// recovery timeout transitions to half-open and admits the probe call.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            let recovered = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(false);
            if recovered {
                debug!("breaker '{}' open -> half-open", self.name);
                inner.state = CircuitState::HalfOpen;
            } else {
                inner.total_blocked += 1;
                return false;
            }
        }
        inner.total_requests += 1;
        true
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.success_count += 1;
        if inner.state == CircuitState::HalfOpen {
            debug!("breaker '{}' half-open -> closed", self.name);
            inner.state = CircuitState::Closed;
            inner.window.clear();
            inner.opened_at = None;
            inner.opened_at_wall = None;
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Utc::now());
        while let Some(front) = inner.window.front() {
            if now.duration_since(*front) > self.config.failure_window {
                inner.window.pop_front();
            } else {
                break;
            }
        }
        inner.window.push_back(now);

        match inner.state {
            CircuitState::HalfOpen => {
                warn!("breaker '{}' half-open -> open", self.name);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.opened_at_wall = Some(Utc::now());
            }
            CircuitState::Closed => {
                if inner.window.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        "breaker '{}' closed -> open ({} failures in window)",
                        self.name,
                        inner.window.len()
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.opened_at_wall = Some(Utc::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            opened_at: inner.opened_at_wall,
            total_requests: inner.total_requests,
            total_blocked: inner.total_blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn opens_on_third_consecutive_failure() {
        let breaker = CircuitBreaker::new("diocese_page_load", fast_config(3));
        for _ in 0..2 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fourth call is rejected without invoking anything.
        assert!(!breaker.try_acquire());
        assert_eq!(breaker.snapshot().total_blocked, 1);
    }

    #[test]
    fn open_recovers_to_half_open_then_closed() {
        let breaker = CircuitBreaker::new("t", fast_config(1));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("t", fast_config(1));
        breaker.try_acquire();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn no_direct_closed_to_half_open() {
        let breaker = CircuitBreaker::new("t", fast_config(3));
        breaker.try_acquire();
        breaker.record_failure();
        // Still closed after a sub-threshold failure and the recovery delay.
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn window_prunes_stale_failures() {
        let config = BreakerConfig {
            failure_threshold: 2,
            failure_window: Duration::from_millis(10),
            recovery_timeout: Duration::from_secs(60),
        };
        let breaker = CircuitBreaker::new("t", config);
        breaker.try_acquire();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        breaker.try_acquire();
        breaker.record_failure();
        // The first failure fell out of the window; threshold not met.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn named_defaults_table() {
        assert_eq!(BreakerConfig::for_name("diocese_page_load").failure_threshold, 3);
        assert_eq!(
            BreakerConfig::for_name("parish_detail_load").recovery_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(
            BreakerConfig::for_name("ai_content_analysis").failure_window,
            Duration::from_secs(120)
        );
        assert_eq!(
            BreakerConfig::for_name("origin:parish.example.org").failure_threshold,
            5
        );
    }
}
