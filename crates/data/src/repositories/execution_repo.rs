use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{ScheduleExecutionRecord, ScheduleKind};

/// Audit trail of scheduler-driven runs.
#[derive(Debug, Clone)]
pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records one execution.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert(&self, record: &ScheduleExecutionRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO schedule_executions
                (kind, started_at, duration_ms, items_processed, items_failed, error, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ",
        )
        .bind(record.kind.as_str())
        .bind(record.started_at)
        .bind(record.duration_ms)
        .bind(record.items_processed)
        .bind(record.items_failed)
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .context("Failed to insert execution record")?;
        Ok(())
    }

    /// Most recent executions, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ScheduleExecutionRecord>> {
        let rows: Vec<(String, DateTime<Utc>, i64, i64, i64, Option<String>)> = sqlx::query_as(
            r"
            SELECT kind, started_at, duration_ms, items_processed, items_failed, error
            FROM schedule_executions
            WHERE is_active
            ORDER BY started_at DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query executions")?;

        rows.into_iter()
            .map(|(kind, started_at, duration_ms, items_processed, items_failed, error)| {
                Ok(ScheduleExecutionRecord {
                    kind: parse_kind(&kind)?,
                    started_at,
                    duration_ms,
                    items_processed,
                    items_failed,
                    error,
                })
            })
            .collect()
    }
}

fn parse_kind(raw: &str) -> Result<ScheduleKind> {
    match raw {
        "price" => Ok(ScheduleKind::Price),
        "news" => Ok(ScheduleKind::News),
        "signals" => Ok(ScheduleKind::Signals),
        "outcomes" => Ok(ScheduleKind::Outcomes),
        other => anyhow::bail!("Unknown schedule kind in store: {other}"),
    }
}
