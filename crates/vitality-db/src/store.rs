//! Store handle and the serialization-conflict retry helper.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use sqlx::PgPool;
use tracing::debug;

use vitality_core::{PipelineError, Result};

const MAX_CONFLICT_RETRIES: u32 = 3;

/// Handle to the relational store. Cheap to clone; all methods borrow the
/// inner pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Run `op`, retrying serialization conflicts (SQLSTATE 40001/40P01) up to
/// three times with 50–250 ms jittered backoff.
pub async fn retry_serialization<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(PipelineError::SerializationConflict) if attempt < MAX_CONFLICT_RETRIES => {
                let backoff = Duration::from_millis(rand::thread_rng().gen_range(50..=250));
                debug!(
                    "serialization conflict, retrying in {:?} (attempt {})",
                    backoff,
                    attempt + 1
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn conflicts_are_retried_then_succeed() {
        let calls = AtomicU32::new(0);
        let out = retry_serialization(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PipelineError::SerializationConflict)
            } else {
                Ok(42u32)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_conflict_gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let out: Result<()> = retry_serialization(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::SerializationConflict)
        })
        .await;
        assert!(matches!(out, Err(PipelineError::SerializationConflict)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<()> = retry_serialization(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::UnknownWorker("w1".to_string()))
        })
        .await;
        assert!(matches!(out, Err(PipelineError::UnknownWorker(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
