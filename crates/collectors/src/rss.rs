//! RSS/Atom news collector.
//!
//! Pulls the configured feed list, deduplicates by URL, extracts stock
//! mentions with case-insensitive word-boundary matching over symbols and
//! company keywords, persists articles, and classifies a bounded batch of
//! unclassified articles per run. A failure on one feed or one article
//! never blocks the rest.

use std::time::Duration;

use chrono::{DateTime, Utc};

use gpw_advisor_core::{EngineError, FeedConfig, NewsConfig};
use gpw_advisor_data::{NewsRepository, StockRecord};
use gpw_advisor_sentiment::{ArticleForClassification, Classifier, ClassifierError};

use crate::types::CollectorStats;

/// Summary of one news collection run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewsRunSummary {
    pub feeds_processed: u64,
    pub feeds_failed: u64,
    pub articles_classified: u64,
    pub stats: CollectorStats,
}

/// One feed entry after normalisation, before persistence.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub url: String,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
}

pub struct NewsCollector {
    config: NewsConfig,
    http: reqwest::Client,
    repo: NewsRepository,
}

impl NewsCollector {
    /// Creates a collector with its own HTTP client.
    ///
    /// # Errors
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: NewsConfig, repo: NewsRepository) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        Ok(Self { config, http, repo })
    }

    /// Pulls every enabled feed and persists new articles, then classifies
    /// a bounded batch of articles that have no classification yet.
    pub async fn run(
        &self,
        stocks: &[StockRecord],
        classifier: &dyn Classifier,
    ) -> NewsRunSummary {
        let mut summary = NewsRunSummary::default();

        for feed in self.config.feeds.iter().filter(|f| f.enabled) {
            summary.feeds_processed += 1;
            match self.poll_feed(feed, stocks).await {
                Ok(stats) => summary.stats.merge(&stats),
                Err(e) => {
                    tracing::warn!("Feed {} failed: {}", feed.id, e);
                    summary.feeds_failed += 1;
                    summary.stats.error_occurred();
                }
            }
        }

        summary.articles_classified = self.classify_pending(classifier).await;
        summary
    }

    /// Fetches one feed and stores its unseen entries.
    ///
    /// # Errors
    /// Returns a transient error if the feed cannot be fetched or parsed.
    pub async fn poll_feed(
        &self,
        feed: &FeedConfig,
        stocks: &[StockRecord],
    ) -> Result<CollectorStats, EngineError> {
        let response = self
            .http
            .get(&feed.url)
            .send()
            .await
            .map_err(|e| EngineError::TransientExternal(format!("feed fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::TransientExternal(format!(
                "feed {} returned {}",
                feed.id,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::TransientExternal(format!("feed body read failed: {e}")))?;

        let parsed = feed_rs::parser::parse(bytes.as_ref())
            .map_err(|e| EngineError::TransientExternal(format!("feed parse failed: {e}")))?;

        let mut stats = CollectorStats::default();

        for entry in parsed.entries {
            let Some(item) = normalise_entry(&entry) else {
                stats.malformed_dropped();
                continue;
            };

            let mentioned = extract_mentions(&format!("{} {}", item.title, item.body), stocks);

            match self
                .repo
                .insert_if_new(
                    &feed.id,
                    &item.url,
                    item.published_at,
                    &item.title,
                    &item.body,
                    &mentioned,
                )
                .await
            {
                Ok(true) => stats.record_collected(),
                Ok(false) => stats.duplicate_skipped(),
                Err(e) => {
                    tracing::warn!("Article write failed for {}: {}", item.url, e);
                    stats.error_occurred();
                }
            }
        }

        Ok(stats)
    }

    /// Classifies up to the configured batch of unclassified articles.
    ///
    /// A transient classifier failure leaves the article unclassified for
    /// the next cycle; a permanent failure is logged and the article is
    /// also left, so an operator can inspect it.
    pub async fn classify_pending(&self, classifier: &dyn Classifier) -> u64 {
        let batch = match self
            .repo
            .unclassified(self.config.classification_batch as i64)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!("Could not load unclassified articles: {}", e);
                return 0;
            }
        };

        let mut classified = 0u64;

        for article in batch {
            let request = ArticleForClassification {
                title: article.title.clone(),
                body: article.body.clone(),
                mentioned_symbols: article.mentioned_symbols.clone(),
            };

            match classifier.classify(&request).await {
                Ok(classification) => {
                    if let Err(e) = classification.validate(&article.mentioned_symbols) {
                        tracing::warn!("Rejecting classification for {}: {}", article.url, e);
                        continue;
                    }
                    match self.repo.attach_classification(article.id, &classification).await {
                        Ok(true) => classified += 1,
                        Ok(false) => {
                            tracing::debug!("Article {} already classified", article.url);
                        }
                        Err(e) => {
                            tracing::warn!("Attach failed for {}: {}", article.url, e);
                        }
                    }
                }
                Err(ClassifierError::Transient(e)) => {
                    tracing::debug!("Transient classify failure for {}: {}", article.url, e);
                }
                Err(ClassifierError::Permanent(e)) => {
                    tracing::warn!("Permanent classify failure for {}: {}", article.url, e);
                }
            }
        }

        classified
    }
}

/// Extracts `(url, title, body, published)` from a feed entry. Entries
/// without a link or a usable timestamp are dropped.
#[must_use]
pub fn normalise_entry(entry: &feed_rs::model::Entry) -> Option<FeedItem> {
    let url = entry.links.first().map(|l| l.href.clone())?;
    let published_at = entry.published.or(entry.updated)?;

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();
    let body = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| {
            entry
                .content
                .as_ref()
                .and_then(|c| c.body.clone())
        })
        .unwrap_or_default();

    Some(FeedItem {
        url,
        title,
        body,
        published_at,
    })
}

/// Symbols whose ticker or company keywords appear in `text` as whole
/// words, case-insensitively.
#[must_use]
pub fn extract_mentions(text: &str, stocks: &[StockRecord]) -> Vec<String> {
    let haystack = text.to_lowercase();
    let mut mentioned = Vec::new();

    for stock in stocks {
        let found = stock
            .mention_terms()
            .iter()
            .any(|term| contains_word(&haystack, &term.to_lowercase()));
        if found {
            mentioned.push(stock.symbol.clone());
        }
    }

    mentioned
}

/// Word-boundary containment: the match must not be flanked by
/// alphanumeric characters.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();

        let before_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let after_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(char::is_alphanumeric);

        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}
