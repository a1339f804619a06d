//! OHLCV bar repository.
//!
//! Bars are append-only; duplicate `(symbol, timestamp)` writes are silently
//! ignored so the price collector is idempotent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::models::OhlcvBar;

#[derive(Debug, Clone)]
pub struct OhlcvRepository {
    pool: PgPool,
}

impl OhlcvRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends a bar if `(symbol, timestamp)` is new.
    ///
    /// # Returns
    /// `true` if the bar was inserted, `false` if it already existed.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_bar(&self, bar: &OhlcvBar) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO ohlcv_bars (symbol, timestamp, open, high, low, close, volume, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            ON CONFLICT (symbol, timestamp) DO NOTHING
            ",
        )
        .bind(&bar.symbol)
        .bind(bar.timestamp)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .execute(&self.pool)
        .await
        .context("Failed to insert OHLCV bar")?;

        Ok(result.rows_affected() > 0)
    }

    /// Appends a batch of bars, skipping duplicates.
    ///
    /// # Returns
    /// The number of bars actually inserted.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_batch(&self, bars: &[OhlcvBar]) -> Result<u64> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let mut inserted = 0u64;

        for chunk in bars.chunks(100) {
            for bar in chunk {
                let result = sqlx::query(
                    r"
                    INSERT INTO ohlcv_bars (symbol, timestamp, open, high, low, close, volume, is_active)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
                    ON CONFLICT (symbol, timestamp) DO NOTHING
                    ",
                )
                .bind(&bar.symbol)
                .bind(bar.timestamp)
                .bind(bar.open)
                .bind(bar.high)
                .bind(bar.low)
                .bind(bar.close)
                .bind(bar.volume)
                .execute(&mut *tx)
                .await
                .context("Failed to insert OHLCV bar")?;

                inserted += result.rows_affected();
            }
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(inserted)
    }

    /// Reads the latest `n` bars for a symbol, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn latest_bars(&self, symbol: &str, n: i64) -> Result<Vec<OhlcvBar>> {
        let mut bars = sqlx::query_as::<_, OhlcvBar>(
            r"
            SELECT symbol, timestamp, open, high, low, close, volume
            FROM ohlcv_bars
            WHERE symbol = $1 AND is_active
            ORDER BY timestamp DESC
            LIMIT $2
            ",
        )
        .bind(symbol)
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query latest bars")?;

        bars.reverse();
        Ok(bars)
    }

    /// Reads bars strictly after `after` up to and including `until`,
    /// ascending.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn bars_between(
        &self,
        symbol: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<OhlcvBar>> {
        let bars = sqlx::query_as::<_, OhlcvBar>(
            r"
            SELECT symbol, timestamp, open, high, low, close, volume
            FROM ohlcv_bars
            WHERE symbol = $1 AND is_active
              AND timestamp > $2 AND timestamp <= $3
            ORDER BY timestamp ASC
            ",
        )
        .bind(symbol)
        .bind(after)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query bars between timestamps")?;

        Ok(bars)
    }

    /// The most recent close for a symbol, if any bar exists.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn last_close(&self, symbol: &str) -> Result<Option<Decimal>> {
        let row: Option<(Decimal,)> = sqlx::query_as(
            r"
            SELECT close
            FROM ohlcv_bars
            WHERE symbol = $1 AND is_active
            ORDER BY timestamp DESC
            LIMIT 1
            ",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query last close")?;

        Ok(row.map(|r| r.0))
    }

    /// Average traded volume per day over the trailing window.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn average_daily_volume(&self, symbol: &str, days: i64) -> Result<i64> {
        let since = Utc::now() - chrono::Duration::days(days);

        let row: (Option<Decimal>,) = sqlx::query_as(
            r"
            SELECT AVG(day_volume)
            FROM (
                SELECT SUM(volume) AS day_volume
                FROM ohlcv_bars
                WHERE symbol = $1 AND is_active AND timestamp >= $2
                GROUP BY date_trunc('day', timestamp)
            ) daily
            ",
        )
        .bind(symbol)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to query average daily volume")?;

        Ok(row
            .0
            .map(|avg| avg.trunc().try_into().unwrap_or(0))
            .unwrap_or(0))
    }
}
