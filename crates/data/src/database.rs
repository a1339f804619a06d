use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Shared connection pool for all repositories.
pub struct DatabaseClient {
    pool: PgPool,
}

impl DatabaseClient {
    /// Connects to the configured `PostgreSQL` database.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool, mainly for tests.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
