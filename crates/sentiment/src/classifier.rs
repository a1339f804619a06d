//! Sentiment classifier adapter.
//!
//! The engine treats the concrete LLM providers as opaque: any
//! implementation of [`Classifier`] that meets the deadline contract is
//! valid, including the neutral stub. Failures are surfaced as transient
//! or permanent so the news collector can decide whether the article is
//! retried on the next cycle.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use gpw_advisor_data::ArticleClassification;

/// Article view handed to the classifier.
#[derive(Debug, Clone)]
pub struct ArticleForClassification {
    pub title: String,
    pub body: String,
    pub mentioned_symbols: Vec<String>,
}

/// Classification failure, split by retry policy.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Provider unavailable, timeout, 5xx. The article stays unclassified
    /// and is retried on the next cycle.
    #[error("transient classifier failure: {0}")]
    Transient(String),

    /// Malformed provider response or a rejected request. Retrying the
    /// same article will not help.
    #[error("permanent classifier failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies one article.
    ///
    /// # Errors
    /// Returns a [`ClassifierError`] split by whether a retry can succeed.
    async fn classify(
        &self,
        article: &ArticleForClassification,
    ) -> Result<ArticleClassification, ClassifierError>;

    fn name(&self) -> &str;
}

/// Enforces a per-call deadline around an inner classifier.
pub struct DeadlineClassifier<C> {
    inner: C,
    deadline: Duration,
}

impl<C: Classifier> DeadlineClassifier<C> {
    pub fn new(inner: C, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl<C: Classifier> Classifier for DeadlineClassifier<C> {
    async fn classify(
        &self,
        article: &ArticleForClassification,
    ) -> Result<ArticleClassification, ClassifierError> {
        match tokio::time::timeout(self.deadline, self.inner.classify(article)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Transient(format!(
                "{} exceeded {}s deadline",
                self.inner.name(),
                self.deadline.as_secs()
            ))),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Weighted two-provider selector: the primary is tried first when its
/// weight dominates; the other provider serves as fallback on transient
/// failure. Permanent failures are not retried on the fallback since the
/// article itself is the problem.
pub struct WeightedClassifier {
    primary: Box<dyn Classifier>,
    secondary: Box<dyn Classifier>,
    primary_weight: f64,
}

impl WeightedClassifier {
    pub fn new(
        primary: Box<dyn Classifier>,
        secondary: Box<dyn Classifier>,
        primary_weight: f64,
    ) -> Self {
        Self {
            primary,
            secondary,
            primary_weight: primary_weight.clamp(0.0, 1.0),
        }
    }

    fn ordered(&self) -> (&dyn Classifier, &dyn Classifier) {
        if self.primary_weight >= 0.5 {
            (self.primary.as_ref(), self.secondary.as_ref())
        } else {
            (self.secondary.as_ref(), self.primary.as_ref())
        }
    }
}

#[async_trait]
impl Classifier for WeightedClassifier {
    async fn classify(
        &self,
        article: &ArticleForClassification,
    ) -> Result<ArticleClassification, ClassifierError> {
        let (first, second) = self.ordered();

        match first.classify(article).await {
            Ok(classification) => Ok(classification),
            Err(ClassifierError::Transient(e)) => {
                tracing::debug!("{} unavailable ({}), falling back to {}", first.name(), e, second.name());
                second.classify(article).await
            }
            Err(permanent) => Err(permanent),
        }
    }

    fn name(&self) -> &str {
        "weighted"
    }
}

/// Stub returning neutral/minimal classifications. A valid provider: it
/// yields well-defined zero-news behaviour downstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubClassifier;

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(
        &self,
        article: &ArticleForClassification,
    ) -> Result<ArticleClassification, ClassifierError> {
        Ok(ArticleClassification::neutral(
            &article.mentioned_symbols,
            self.name(),
        ))
    }

    fn name(&self) -> &str {
        "stub"
    }
}
