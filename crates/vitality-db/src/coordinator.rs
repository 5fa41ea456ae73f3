//! Worker coordination: registration, heartbeats, diocese claims, sweeps.
//!
//! All cross-worker coordination is rows in `pipeline_workers` and
//! `diocese_work_assignments`; the at-most-one-processing-per-diocese
//! invariant is enforced by a partial unique index plus `FOR UPDATE SKIP
//! LOCKED` claiming.

use sqlx::Row;
use tracing::{info, warn};

use vitality_core::{AssignmentStatus, PipelineError, Result};

use crate::store::{retry_serialization, PgStore};

#[derive(Debug, Clone)]
pub struct ClaimedDiocese {
    pub diocese_id: i64,
    pub name: String,
    pub website_url: String,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired_workers: Vec<String>,
    pub reclaimed_dioceses: Vec<i64>,
}

impl PgStore {
    /// Upsert this worker as active. Idempotent; safe to call on every
    /// startup and after a lost heartbeat.
    pub async fn register_worker(&self, worker_id: &str, pod_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO pipeline_workers
                 (worker_id, pod_name, status, last_heartbeat, assigned_dioceses, created_at, updated_at)
             VALUES ($1, $2, 'active', now(), '{}', now(), now())
             ON CONFLICT (worker_id) DO UPDATE
                 SET status = 'active', pod_name = $2, last_heartbeat = now(), updated_at = now()",
        )
        .bind(worker_id)
        .bind(pod_name)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Update `last_heartbeat`. Fails with `UnknownWorker` when no active
    /// row exists; the caller must re-register.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipeline_workers SET last_heartbeat = now(), updated_at = now()
             WHERE worker_id = $1 AND status = 'active'",
        )
        .bind(worker_id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::UnknownWorker(worker_id.to_string()));
        }
        Ok(())
    }

    /// Claim up to `batch_size` dioceses not currently assigned to any
    /// worker. Selection prefers dioceses with no directory yet, then those
    /// whose parishes have the fewest recorded facts, then ascending id.
    /// Under contention fewer rows (possibly none) are returned.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        batch_size: i64,
    ) -> Result<Vec<ClaimedDiocese>> {
        retry_serialization(|| self.claim_next_once(worker_id, batch_size)).await
    }

    async fn claim_next_once(
        &self,
        worker_id: &str,
        batch_size: i64,
    ) -> Result<Vec<ClaimedDiocese>> {
        let mut tx = self.pool().begin().await?;

        let rows = sqlx::query(
            "SELECT d.diocese_id, d.name, d.website_url
             FROM dioceses d
             LEFT JOIN parish_directories pd ON pd.diocese_id = d.diocese_id
             WHERE NOT EXISTS (
                 SELECT 1 FROM diocese_work_assignments a
                 WHERE a.diocese_id = d.diocese_id AND a.status = 'processing'
             )
             ORDER BY (pd.diocese_id IS NULL) DESC,
                      (SELECT count(*) FROM parish_data f
                       JOIN parishes p ON p.parish_id = f.parish_id
                       WHERE p.diocese_id = d.diocese_id) ASC,
                      d.diocese_id ASC
             LIMIT $1
             FOR UPDATE OF d SKIP LOCKED",
        )
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let diocese_id: i64 = row.get("diocese_id");
            // The partial unique index on (diocese_id) WHERE processing makes
            // a concurrent duplicate claim a no-op rather than a violation.
            let inserted = sqlx::query(
                "INSERT INTO diocese_work_assignments
                     (id, diocese_id, worker_id, status, assigned_at, estimated_completion)
                 VALUES (gen_random_uuid(), $1, $2, 'processing', now(), now() + interval '30 minutes')
                 ON CONFLICT (diocese_id) WHERE status = 'processing' DO NOTHING",
            )
            .bind(diocese_id)
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 1 {
                claimed.push(ClaimedDiocese {
                    diocese_id,
                    name: row.get("name"),
                    website_url: row.get("website_url"),
                });
            }
        }

        if !claimed.is_empty() {
            let ids: Vec<i64> = claimed.iter().map(|c| c.diocese_id).collect();
            sqlx::query(
                "UPDATE pipeline_workers
                 SET assigned_dioceses = (
                     SELECT coalesce(array_agg(DISTINCT x), '{}')
                     FROM unnest(assigned_dioceses || $2::bigint[]) AS x
                 ),
                 updated_at = now()
                 WHERE worker_id = $1",
            )
            .bind(worker_id)
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        if !claimed.is_empty() {
            info!(
                "worker {} claimed {} diocese(s)",
                worker_id,
                claimed.len()
            );
        }
        Ok(claimed)
    }

    /// Terminate this worker's `processing` assignment for a diocese. A
    /// missing assignment is a no-op.
    pub async fn complete_assignment(
        &self,
        worker_id: &str,
        diocese_id: i64,
        outcome: AssignmentStatus,
    ) -> Result<()> {
        debug_assert!(outcome != AssignmentStatus::Processing);
        retry_serialization(|| async {
            let mut tx = self.pool().begin().await?;
            sqlx::query(
                "UPDATE diocese_work_assignments
                 SET status = $3, completed_at = now()
                 WHERE diocese_id = $1 AND worker_id = $2 AND status = 'processing'",
            )
            .bind(diocese_id)
            .bind(worker_id)
            .bind(outcome.as_str())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE pipeline_workers
                 SET assigned_dioceses = array_remove(assigned_dioceses, $2), updated_at = now()
                 WHERE worker_id = $1",
            )
            .bind(worker_id)
            .bind(diocese_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Expire workers whose heartbeat is older than `dead_after_secs` and
    /// free every diocese they held. Idempotent; runs on the lead only.
    pub async fn sweep(&self, dead_after_secs: i64) -> Result<SweepReport> {
        retry_serialization(|| async {
            let mut tx = self.pool().begin().await?;

            let expired: Vec<(String,)> = sqlx::query_as(
                "UPDATE pipeline_workers
                 SET status = 'inactive', updated_at = now()
                 WHERE status = 'active'
                   AND last_heartbeat < now() - make_interval(secs => $1)
                 RETURNING worker_id",
            )
            .bind(dead_after_secs as f64)
            .fetch_all(&mut *tx)
            .await?;
            let expired: Vec<String> = expired.into_iter().map(|(w,)| w).collect();

            let mut reclaimed = Vec::new();
            if !expired.is_empty() {
                let freed: Vec<(i64,)> = sqlx::query_as(
                    "UPDATE diocese_work_assignments
                     SET status = 'failed', completed_at = now()
                     WHERE worker_id = ANY($1) AND status = 'processing'
                     RETURNING diocese_id",
                )
                .bind(&expired)
                .fetch_all(&mut *tx)
                .await?;
                reclaimed = freed.into_iter().map(|(d,)| d).collect();

                sqlx::query(
                    "UPDATE pipeline_workers SET assigned_dioceses = '{}', updated_at = now()
                     WHERE worker_id = ANY($1)",
                )
                .bind(&expired)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;

            for worker in &expired {
                warn!("sweep expired worker {}", worker);
            }
            for diocese in &reclaimed {
                info!("sweep reclaimed diocese {}", diocese);
            }
            Ok(SweepReport {
                expired_workers: expired,
                reclaimed_dioceses: reclaimed,
            })
        })
        .await
    }

    /// The lead is the smallest lexicographic worker_id among active rows.
    pub async fn lead_worker(&self) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT worker_id FROM pipeline_workers
             WHERE status = 'active' ORDER BY worker_id ASC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(w,)| w))
    }

    pub async fn is_lead(&self, worker_id: &str) -> Result<bool> {
        Ok(self.lead_worker().await?.as_deref() == Some(worker_id))
    }

    /// Flip this worker's row to inactive on shutdown.
    pub async fn mark_inactive(&self, worker_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE pipeline_workers SET status = 'inactive', updated_at = now()
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Dioceses this worker still holds in `processing`; used on shutdown to
    /// fail them out before exit.
    pub async fn processing_assignments(&self, worker_id: &str) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT diocese_id FROM diocese_work_assignments
             WHERE worker_id = $1 AND status = 'processing'",
        )
        .bind(worker_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }
}
