use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::StockRecord;

/// Read-only access to the admin-maintained stock universe.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: PgPool,
}

impl StockRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All monitored, active stocks ordered by symbol.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn monitored(&self) -> Result<Vec<StockRecord>> {
        let rows = sqlx::query_as::<_, StockRecord>(
            r"
            SELECT symbol, name, is_monitored, market, industry, keywords, is_active
            FROM stocks
            WHERE is_monitored AND is_active
            ORDER BY symbol
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query monitored stocks")?;

        Ok(rows)
    }

    /// One stock by symbol, monitored or not.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn by_symbol(&self, symbol: &str) -> Result<Option<StockRecord>> {
        let row = sqlx::query_as::<_, StockRecord>(
            r"
            SELECT symbol, name, is_monitored, market, industry, keywords, is_active
            FROM stocks
            WHERE symbol = $1 AND is_active
            ",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query stock")?;

        Ok(row)
    }
}
