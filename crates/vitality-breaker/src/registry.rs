//! Registry of named breakers. Constructed once at worker start and shared
//! by reference into every component.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use vitality_core::{PipelineError, Result};

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};

pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a breaker, creating it with its per-name default config on
    /// first use. Readers take the shared lock; creation is the only write.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(name) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().unwrap();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, BreakerConfig::for_name(name)))
            })
            .clone()
    }

    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.breakers
            .read()
            .unwrap()
            .get(name)
            .map(|b| b.state())
    }

    /// Snapshot every breaker for the telemetry surface.
    pub fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .read()
            .unwrap()
            .values()
            .map(|b| b.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Run `fut` under the named breaker: reject with `CircuitOpen` when the
    /// breaker is open, otherwise execute and record the outcome.
    pub async fn guard<T, F>(&self, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let breaker = self.get_or_create(name);
        if !breaker.try_acquire() {
            return Err(PipelineError::CircuitOpen(name.to_string()));
        }
        match fut.await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                if counts_as_breaker_failure(&e) {
                    breaker.record_failure();
                }
                Err(e)
            }
        }
    }
}

/// Which errors trip a breaker. Client errors are the caller's problem, a
/// cancel is ours, and an already-open circuit must not double-count.
fn counts_as_breaker_failure(e: &PipelineError) -> bool {
    !matches!(
        e,
        PipelineError::ClientError(_)
            | PipelineError::Cancelled
            | PipelineError::CircuitOpen(_)
            | PipelineError::Suppressed
            | PipelineError::RobotsDisallowed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_executes_and_records_success() {
        let registry = BreakerRegistry::new();
        let out: Result<u32> = registry.guard("ai_content_analysis", async { Ok(7) }).await;
        assert_eq!(out.unwrap(), 7);
        let snap = &registry.snapshot_all()[0];
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.total_requests, 1);
    }

    #[tokio::test]
    async fn guard_rejects_when_open_without_invoking() {
        let registry = BreakerRegistry::new();
        // diocese_page_load trips at 3 failures.
        for _ in 0..3 {
            let _: Result<()> = registry
                .guard("diocese_page_load", async {
                    Err(PipelineError::ServerError(500))
                })
                .await;
        }
        assert_eq!(
            registry.state("diocese_page_load"),
            Some(CircuitState::Open)
        );

        let mut invoked = false;
        let out: Result<()> = registry
            .guard("diocese_page_load", async {
                invoked = true;
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(PipelineError::CircuitOpen(_))));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn client_errors_do_not_trip() {
        let registry = BreakerRegistry::new();
        for _ in 0..10 {
            let _: Result<()> = registry
                .guard("parish_detail_load", async {
                    Err(PipelineError::ClientError(404))
                })
                .await;
        }
        assert_eq!(
            registry.state("parish_detail_load"),
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn dynamic_origin_breakers_register_on_first_use() {
        let registry = BreakerRegistry::new();
        registry.get_or_create("origin:parish.example.org");
        registry.get_or_create("origin:cathedral.example.org");
        let names: Vec<String> = registry
            .snapshot_all()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "origin:cathedral.example.org".to_string(),
                "origin:parish.example.org".to_string()
            ]
        );
    }

    #[test]
    fn get_or_create_returns_same_instance() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create("webdriver_requests");
        let b = registry.get_or_create("webdriver_requests");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
