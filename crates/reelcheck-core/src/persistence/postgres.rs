// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed run store.
//!
//! Under READ COMMITTED a concurrent `UPDATE ... WHERE status = 'queued'`
//! blocks on the first writer's row lock and re-evaluates its predicate
//! after commit, so exactly one claimer sees an affected row.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::error::CoreError;
use crate::migrations;
use crate::models::{
    FrameRecord, NewRun, Run, RunOutcome, RunStatus, StaleSweep, SummaryKind, SummaryRecord,
};

use super::{RunStore, duplicate_run, stale_failure_message, status_list};

const RUN_COLUMNS: &str = r#"
    id, owner_id, status, progress_percentage, progress_message, error_message,
    cancel_requested, video_path, video_size_bytes, video_content_type, attempt,
    attempt_base, claimed_by, created_at, updated_at, queued_at, claimed_at, heartbeat_at, finished_at
"#;

/// PostgreSQL-backed run store.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Create a store from an existing, already migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url`, then run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to PostgreSQL: {}", e),
            })?;

        migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RunStore for PostgresRunStore {
    async fn create_run(&self, new_run: &NewRun) -> Result<Run, CoreError> {
        let run_id = new_run
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let sql = format!(
            r#"
            INSERT INTO runs (id, owner_id, status, video_path, video_size_bytes,
                              video_content_type, created_at, updated_at)
            VALUES ($1, $2, 'uploaded', $3, $4, $5, $6, $6)
            RETURNING {}
            "#,
            RUN_COLUMNS
        );

        let run = sqlx::query_as::<_, Run>(&sql)
            .bind(&run_id)
            .bind(&new_run.owner_id)
            .bind(&new_run.video_path)
            .bind(new_run.video_size_bytes)
            .bind(&new_run.video_content_type)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| duplicate_run(e, &run_id))?;

        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, CoreError> {
        let sql = format!("SELECT {} FROM runs WHERE id = $1", RUN_COLUMNS);
        let run = sqlx::query_as::<_, Run>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(run)
    }

    async fn mark_queued(&self, run_id: &str, from: &[RunStatus]) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'queued', queued_at = $2, updated_at = $2,
                progress_percentage = 0, progress_message = NULL, error_message = NULL,
                cancel_requested = FALSE, claimed_by = NULL, claimed_at = NULL,
                heartbeat_at = NULL, finished_at = NULL, attempt_base = attempt
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(run_id)
        .bind(Utc::now())
        .bind(status_list(from))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim(&self, run_id: &str, worker_id: &str) -> Result<Option<i32>, CoreError> {
        let attempt: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE runs
            SET status = 'processing', claimed_by = $2, claimed_at = $3,
                heartbeat_at = $3, updated_at = $3, attempt = attempt + 1
            WHERE id = $1 AND status = 'queued'
            RETURNING attempt
            "#,
        )
        .bind(run_id)
        .bind(worker_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn oldest_queued_run_id(&self) -> Result<Option<String>, CoreError> {
        let run_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM runs
            WHERE status = 'queued'
            ORDER BY queued_at ASC, created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(run_id)
    }

    async fn request_cancel(&self, run_id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'cancel_requested', cancel_requested = TRUE, updated_at = $2
            WHERE id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(run_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_for_retry(&self, run_id: &str, from: &[RunStatus]) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'queued', queued_at = $2, updated_at = $2,
                progress_percentage = 0, progress_message = NULL, error_message = NULL,
                cancel_requested = FALSE, claimed_by = NULL, claimed_at = NULL,
                heartbeat_at = NULL, finished_at = NULL, attempt_base = attempt
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(run_id)
        .bind(Utc::now())
        .bind(status_list(from))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM run_frames WHERE run_id = $1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM run_summaries WHERE run_id = $1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn update_progress(
        &self,
        run_id: &str,
        attempt: i32,
        percentage: i32,
        message: Option<&str>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET progress_percentage = GREATEST(progress_percentage, $3),
                progress_message = COALESCE($4, progress_message),
                heartbeat_at = $5, updated_at = $5
            WHERE id = $1 AND attempt = $2 AND status IN ('processing', 'cancel_requested')
            "#,
        )
        .bind(run_id)
        .bind(attempt)
        .bind(percentage.clamp(0, 100))
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_cancel_requested(&self, run_id: &str) -> Result<bool, CoreError> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM runs WHERE id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        flag.ok_or_else(|| CoreError::RunNotFound {
            run_id: run_id.to_string(),
        })
    }

    async fn record_frame(
        &self,
        run_id: &str,
        attempt: i32,
        frame_index: i32,
        timestamp_ms: i64,
        analysis: &Value,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO run_frames (run_id, frame_index, timestamp_ms, analysis, created_at)
            SELECT $1, $2, $3, $4, $5
            WHERE EXISTS (
                SELECT 1 FROM runs
                WHERE id = $1 AND attempt = $6 AND status IN ('processing', 'cancel_requested')
            )
            ON CONFLICT (run_id, frame_index) DO UPDATE
            SET timestamp_ms = EXCLUDED.timestamp_ms,
                analysis = EXCLUDED.analysis,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(run_id)
        .bind(frame_index)
        .bind(timestamp_ms)
        .bind(sqlx::types::Json(analysis))
        .bind(Utc::now())
        .bind(attempt)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish_run(
        &self,
        run_id: &str,
        attempt: i32,
        outcome: &RunOutcome,
    ) -> Result<Option<RunStatus>, CoreError> {
        let now = Utc::now();
        let error_message = match outcome {
            RunOutcome::Failed { error } => Some(error.as_str()),
            _ => None,
        };

        let mut tx = self.pool.begin().await?;

        let written: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE runs
            SET status = CASE WHEN cancel_requested THEN 'cancelled' ELSE $3 END,
                error_message = CASE WHEN cancel_requested THEN NULL ELSE $4 END,
                progress_percentage = CASE
                    WHEN NOT cancel_requested AND $3 = 'completed' THEN 100
                    ELSE progress_percentage
                END,
                heartbeat_at = NULL, finished_at = $5, updated_at = $5
            WHERE id = $1 AND attempt = $2 AND status IN ('processing', 'cancel_requested')
            RETURNING status
            "#,
        )
        .bind(run_id)
        .bind(attempt)
        .bind(outcome.status().as_str())
        .bind(error_message)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(written) = written else {
            tx.rollback().await?;
            return Ok(None);
        };
        let status: RunStatus = written.parse().map_err(|e: crate::models::UnknownStatus| {
            CoreError::Database {
                operation: "finish_run".to_string(),
                details: e.to_string(),
            }
        })?;

        if status == RunStatus::Completed
            && let RunOutcome::Completed {
                summary,
                shadow_summary,
            } = outcome
        {
            let summaries = std::iter::once((SummaryKind::Primary, summary))
                .chain(shadow_summary.iter().map(|s| (SummaryKind::Shadow, s)));
            for (kind, body) in summaries {
                sqlx::query(
                    r#"
                    INSERT INTO run_summaries (run_id, kind, body, created_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (run_id, kind) DO UPDATE
                    SET body = EXCLUDED.body, created_at = EXCLUDED.created_at
                    "#,
                )
                .bind(run_id)
                .bind(kind.as_str())
                .bind(sqlx::types::Json(body))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(Some(status))
    }

    async fn reclaim_stale_runs(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<StaleSweep, CoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'cancelled', heartbeat_at = NULL, finished_at = $1, updated_at = $1
            WHERE status = 'cancel_requested' AND claimed_by IS NOT NULL AND heartbeat_at < $2
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'failed', error_message = $1, heartbeat_at = NULL,
                finished_at = $2, updated_at = $2
            WHERE status = 'processing' AND heartbeat_at < $3 AND attempt - attempt_base >= $4
            "#,
        )
        .bind(stale_failure_message(max_attempts))
        .bind(now)
        .bind(cutoff)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM run_frames
            WHERE run_id IN (
                SELECT id FROM runs
                WHERE status = 'processing' AND heartbeat_at < $1 AND attempt - attempt_base < $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?;

        let requeued = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'queued', queued_at = $1, updated_at = $1,
                claimed_by = NULL, claimed_at = NULL, heartbeat_at = NULL,
                progress_percentage = 0, progress_message = NULL
            WHERE status = 'processing' AND heartbeat_at < $2 AND attempt - attempt_base < $3
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(StaleSweep {
            requeued,
            failed,
            cancelled,
        })
    }

    async fn resolve_unclaimed_cancellations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'cancelled', finished_at = $1, updated_at = $1
            WHERE status = 'cancel_requested' AND claimed_by IS NULL AND updated_at < $2
            "#,
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_frames(&self, run_id: &str) -> Result<Vec<FrameRecord>, CoreError> {
        let frames = sqlx::query_as::<_, FrameRecord>(
            r#"
            SELECT run_id, frame_index, timestamp_ms, analysis, created_at
            FROM run_frames
            WHERE run_id = $1
            ORDER BY frame_index ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(frames)
    }

    async fn list_summaries(&self, run_id: &str) -> Result<Vec<SummaryRecord>, CoreError> {
        let summaries = sqlx::query_as::<_, SummaryRecord>(
            r#"
            SELECT run_id, kind, body, created_at
            FROM run_summaries
            WHERE run_id = $1
            ORDER BY CASE kind WHEN 'primary' THEN 0 ELSE 1 END
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(summaries)
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(one == 1)
    }
}
