//! Per-origin admission: a token bucket plus a concurrency cap. Waits are
//! cooperative and cancel promptly.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use vitality_core::{PipelineError, Result};

use crate::policy::{OriginPolicy, PolicyTable};

struct OriginGate {
    limiter: DefaultDirectRateLimiter,
    slots: Arc<Semaphore>,
}

impl OriginGate {
    fn new(policy: &OriginPolicy) -> Self {
        let period = if policy.rate_per_sec > 0.0 {
            Duration::from_secs_f32(1.0 / policy.rate_per_sec)
        } else {
            Duration::from_secs(1)
        };
        let burst = NonZeroU32::new(policy.burst.max(1)).unwrap();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::direct(quota),
            slots: Arc::new(Semaphore::new(policy.max_concurrency.max(1))),
        }
    }
}

/// Map of origin host to gate, created lazily from the policy table.
pub struct OriginGates {
    policies: PolicyTable,
    gates: RwLock<HashMap<String, Arc<OriginGate>>>,
}

impl OriginGates {
    pub fn new(policies: PolicyTable) -> Self {
        Self {
            policies,
            gates: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy_for(&self, host: &str) -> OriginPolicy {
        self.policies.resolve(host)
    }

    fn gate_for(&self, host: &str) -> Arc<OriginGate> {
        if let Some(gate) = self.gates.read().unwrap().get(host) {
            return gate.clone();
        }
        let policy = self.policies.resolve(host);
        let mut gates = self.gates.write().unwrap();
        gates
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(OriginGate::new(&policy)))
            .clone()
    }

    /// Wait for a concurrency slot and a rate-limit token on `host`.
    /// The returned permit holds the slot until dropped.
    pub async fn acquire(
        &self,
        host: &str,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        let gate = self.gate_for(host);

        let permit = tokio::select! {
            permit = gate.slots.clone().acquire_owned() => {
                permit.map_err(|_| PipelineError::Cancelled)?
            }
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        tokio::select! {
            _ = gate.limiter.until_ready() => {}
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        }

        Ok(permit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyRule;
    use std::time::Instant;

    fn gates_with_policy(policy: OriginPolicy) -> OriginGates {
        let mut table = PolicyTable::new(policy);
        table.push(PolicyRule::Exact("unused.example".to_string()), policy);
        OriginGates::new(table)
    }

    #[tokio::test]
    async fn burst_admits_without_waiting() {
        let gates = gates_with_policy(OriginPolicy {
            rate_per_sec: 2.0,
            burst: 3,
            max_concurrency: 3,
            base_delay: Duration::from_secs(0),
        });
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..3 {
            let permit = gates.acquire("a.example", &cancel).await.unwrap();
            drop(permit);
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn refill_paces_requests_beyond_burst() {
        let gates = gates_with_policy(OriginPolicy {
            rate_per_sec: 10.0,
            burst: 2,
            max_concurrency: 2,
            base_delay: Duration::from_secs(0),
        });
        let cancel = CancellationToken::new();
        let start = Instant::now();
        // burst of 2 is free; the next 4 must wait ~100ms each.
        for _ in 0..6 {
            let permit = gates.acquire("b.example", &cancel).await.unwrap();
            drop(permit);
        }
        assert!(
            start.elapsed() >= Duration::from_millis(350),
            "elapsed {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn concurrency_cap_is_enforced() {
        let gates = gates_with_policy(OriginPolicy {
            rate_per_sec: 100.0,
            burst: 100,
            max_concurrency: 1,
            base_delay: Duration::from_secs(0),
        });
        let cancel = CancellationToken::new();
        let held = gates.acquire("c.example", &cancel).await.unwrap();

        // Second acquire on the same origin cannot complete while the first
        // permit is held.
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            gates.acquire("c.example", &cancel),
        )
        .await;
        assert!(second.is_err(), "expected timeout while slot is held");

        drop(held);
        let permit = gates.acquire("c.example", &cancel).await.unwrap();
        drop(permit);
    }

    #[tokio::test]
    async fn cancel_aborts_the_wait() {
        let gates = gates_with_policy(OriginPolicy {
            rate_per_sec: 100.0,
            burst: 100,
            max_concurrency: 1,
            base_delay: Duration::from_secs(0),
        });
        let cancel = CancellationToken::new();
        let _held = gates.acquire("d.example", &cancel).await.unwrap();

        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { gates.acquire("d.example", &cancel).await.map(|_| ()) }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let out = waiter.await.unwrap();
        assert!(matches!(out, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn origins_do_not_share_buckets() {
        let gates = gates_with_policy(OriginPolicy {
            rate_per_sec: 5.0,
            burst: 1,
            max_concurrency: 1,
            base_delay: Duration::from_secs(0),
        });
        let cancel = CancellationToken::new();
        let start = Instant::now();
        drop(gates.acquire("one.example", &cancel).await.unwrap());
        drop(gates.acquire("two.example", &cancel).await.unwrap());
        // Both spent their own burst token; no cross-origin pacing.
        assert!(start.elapsed() < Duration::from_millis(150));
    }
}
