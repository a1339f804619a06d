//! News article repository.
//!
//! Articles deduplicate by URL. A classification is attached exactly once;
//! the per-stock sentiment entries are denormalised into their own table so
//! the time-weighted analyzer can query mentions by symbol.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::models::{ArticleClassification, ImpactLevel, NewsArticleRecord, ScoredMention};

#[derive(Debug, Clone)]
pub struct NewsRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    source: String,
    url: String,
    published_at: DateTime<Utc>,
    title: String,
    body: String,
    mentioned_symbols: Vec<String>,
    classification: Option<JsonValue>,
    is_active: bool,
}

impl TryFrom<ArticleRow> for NewsArticleRecord {
    type Error = anyhow::Error;

    fn try_from(row: ArticleRow) -> Result<Self> {
        let classification = row
            .classification
            .map(serde_json::from_value::<ArticleClassification>)
            .transpose()
            .context("Corrupt classification column")?;

        Ok(Self {
            id: row.id,
            source: row.source,
            url: row.url,
            published_at: row.published_at,
            title: row.title,
            body: row.body,
            mentioned_symbols: row.mentioned_symbols,
            classification,
            is_active: row.is_active,
        })
    }
}

impl NewsRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts an article unless its URL is already stored.
    ///
    /// # Returns
    /// `true` if inserted, `false` on a duplicate URL.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_if_new(
        &self,
        source: &str,
        url: &str,
        published_at: DateTime<Utc>,
        title: &str,
        body: &str,
        mentioned_symbols: &[String],
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO news_articles
                (source, url, published_at, title, body, mentioned_symbols, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ON CONFLICT (url) DO NOTHING
            ",
        )
        .bind(source)
        .bind(url)
        .bind(published_at)
        .bind(title)
        .bind(body)
        .bind(mentioned_symbols)
        .execute(&self.pool)
        .await
        .context("Failed to insert news article")?;

        Ok(result.rows_affected() > 0)
    }

    /// Articles that have no classification yet, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn unclassified(&self, limit: i64) -> Result<Vec<NewsArticleRecord>> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r"
            SELECT id, source, url, published_at, title, body,
                   mentioned_symbols, classification, is_active
            FROM news_articles
            WHERE classification IS NULL AND is_active
            ORDER BY published_at ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query unclassified articles")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Attaches a classification to an article and denormalises the
    /// per-stock entries, atomically.
    ///
    /// An already-classified article is left untouched.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn attach_classification(
        &self,
        article_id: i64,
        classification: &ArticleClassification,
    ) -> Result<bool> {
        let payload =
            serde_json::to_value(classification).context("Failed to serialise classification")?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let updated = sqlx::query(
            r"
            UPDATE news_articles
            SET classification = $2
            WHERE id = $1 AND classification IS NULL
            ",
        )
        .bind(article_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .context("Failed to attach classification")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(false);
        }

        for entry in &classification.per_stock {
            sqlx::query(
                r"
                INSERT INTO stock_sentiments
                    (article_id, symbol, sentiment_score, confidence, relevance, impact)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(article_id)
            .bind(&entry.symbol)
            .bind(entry.sentiment_score)
            .bind(entry.confidence)
            .bind(entry.relevance)
            .bind(classification.impact.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to insert stock sentiment")?;
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(true)
    }

    /// Classified mentions of a symbol published since `since`, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn scored_mentions(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScoredMention>> {
        let rows: Vec<(String, String, DateTime<Utc>, f64, f64, f64, String)> = sqlx::query_as(
            r"
            SELECT a.url, a.source, a.published_at,
                   s.sentiment_score, s.confidence, s.relevance, s.impact
            FROM stock_sentiments s
            JOIN news_articles a ON a.id = s.article_id
            WHERE s.symbol = $1 AND a.published_at >= $2 AND a.is_active
            ORDER BY a.published_at DESC
            ",
        )
        .bind(symbol)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query scored mentions")?;

        rows.into_iter()
            .map(|(url, source, published_at, score, confidence, relevance, impact)| {
                Ok(ScoredMention {
                    article_url: url,
                    source,
                    published_at,
                    sentiment_score: score,
                    confidence,
                    relevance,
                    impact: parse_impact(&impact)?,
                })
            })
            .collect()
    }
}

fn parse_impact(raw: &str) -> Result<ImpactLevel> {
    match raw {
        "minimal" => Ok(ImpactLevel::Minimal),
        "low" => Ok(ImpactLevel::Low),
        "medium" => Ok(ImpactLevel::Medium),
        "high" => Ok(ImpactLevel::High),
        "very_high" => Ok(ImpactLevel::VeryHigh),
        other => anyhow::bail!("Unknown impact level in store: {other}"),
    }
}
