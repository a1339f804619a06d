//! News article and AI classification models.
//!
//! An article is written once by the news collector and mutated exactly once
//! when its classification is attached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentiment label assigned to an article or a per-stock entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

/// Discrete market-moving potential assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Minimal,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ImpactLevel {
    /// Weight applied to an article's contribution in the time-weighted
    /// aggregation.
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            Self::VeryHigh => 2.0,
            Self::High => 1.5,
            Self::Medium => 1.0,
            Self::Low => 0.6,
            Self::Minimal => 0.3,
        }
    }

    /// High-impact levels trigger the breaking-news multiplier and the
    /// stronger news adjustments in the signal generator.
    #[must_use]
    pub fn is_high(self) -> bool {
        matches!(self, Self::High | Self::VeryHigh)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// Stock-level sentiment inside a classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSentiment {
    pub symbol: String,
    /// Sentiment in [-1, 1].
    pub sentiment_score: f64,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// How central the stock is to the article, in [0, 1].
    pub relevance: f64,
}

/// AI classification attached to an article once processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleClassification {
    pub overall_sentiment: Sentiment,
    /// Overall sentiment in [-1, 1].
    pub sentiment_score: f64,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    pub impact: ImpactLevel,
    pub per_stock: Vec<StockSentiment>,
    /// Provider that produced the classification.
    pub provider: String,
}

impl ArticleClassification {
    /// Validates score ranges and that `per_stock` only references the
    /// given mentioned symbols.
    ///
    /// # Errors
    /// Returns a message naming the violation.
    pub fn validate(&self, mentioned: &[String]) -> Result<(), String> {
        if !(-1.0..=1.0).contains(&self.sentiment_score) {
            return Err(format!(
                "sentiment_score {} outside [-1, 1]",
                self.sentiment_score
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        for entry in &self.per_stock {
            if !mentioned.iter().any(|m| m == &entry.symbol) {
                return Err(format!(
                    "per-stock entry {} not among mentioned stocks",
                    entry.symbol
                ));
            }
            if !(-1.0..=1.0).contains(&entry.sentiment_score) {
                return Err(format!(
                    "per-stock sentiment {} outside [-1, 1]",
                    entry.sentiment_score
                ));
            }
        }
        Ok(())
    }

    /// A neutral classification with minimal impact, the stub output.
    #[must_use]
    pub fn neutral(mentioned: &[String], provider: impl Into<String>) -> Self {
        Self {
            overall_sentiment: Sentiment::Neutral,
            sentiment_score: 0.0,
            confidence: 1.0,
            impact: ImpactLevel::Minimal,
            per_stock: mentioned
                .iter()
                .map(|symbol| StockSentiment {
                    symbol: symbol.clone(),
                    sentiment_score: 0.0,
                    confidence: 1.0,
                    relevance: 0.0,
                })
                .collect(),
            provider: provider.into(),
        }
    }
}

/// A news article pulled from an RSS feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticleRecord {
    pub id: i64,
    /// Feed identifier the article came from.
    pub source: String,
    /// Unique across the store; the dedup key.
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub mentioned_symbols: Vec<String>,
    pub classification: Option<ArticleClassification>,
    pub is_active: bool,
}

impl NewsArticleRecord {
    #[must_use]
    pub fn mentions(&self, symbol: &str) -> bool {
        self.mentioned_symbols
            .iter()
            .any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// One classified mention of a stock, as read back for aggregation.
#[derive(Debug, Clone)]
pub struct ScoredMention {
    pub article_url: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub sentiment_score: f64,
    pub confidence: f64,
    pub relevance: f64,
    pub impact: ImpactLevel,
}
