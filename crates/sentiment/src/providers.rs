//! Concrete LLM providers: an OpenAI-compatible chat endpoint and a local
//! Ollama instance. Both prompt for a strict JSON shape and parse it into
//! an [`ArticleClassification`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use gpw_advisor_core::LlmConfig;
use gpw_advisor_data::{ArticleClassification, ImpactLevel, Sentiment, StockSentiment};

use crate::classifier::{ArticleForClassification, Classifier, ClassifierError};

/// Response shape both providers are prompted to emit.
#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    overall_sentiment: String,
    sentiment_score: f64,
    confidence: f64,
    impact: String,
    #[serde(default)]
    per_stock: Vec<PerStockPayload>,
}

#[derive(Debug, Deserialize)]
struct PerStockPayload {
    symbol: String,
    sentiment_score: f64,
    confidence: f64,
    relevance: f64,
}

fn classification_prompt(article: &ArticleForClassification) -> String {
    format!(
        concat!(
            "You are a financial news analyst for the Warsaw Stock Exchange. ",
            "Classify the Polish news article below. Respond with JSON only, ",
            "no prose, matching exactly: {{\"overall_sentiment\": ",
            "\"positive|neutral|negative\", \"sentiment_score\": -1.0..1.0, ",
            "\"confidence\": 0.0..1.0, \"impact\": ",
            "\"minimal|low|medium|high|very_high\", \"per_stock\": ",
            "[{{\"symbol\": \"...\", \"sentiment_score\": -1.0..1.0, ",
            "\"confidence\": 0.0..1.0, \"relevance\": 0.0..1.0}}]}}. ",
            "Only include per_stock entries for these symbols: {symbols}.\n\n",
            "Title: {title}\n\n{body}"
        ),
        symbols = article.mentioned_symbols.join(", "),
        title = article.title,
        body = article.body,
    )
}

fn parse_payload(
    raw: &str,
    provider: &str,
) -> Result<ArticleClassification, ClassifierError> {
    // Providers occasionally wrap the JSON in a code fence; strip it.
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let payload: ClassificationPayload = serde_json::from_str(trimmed)
        .map_err(|e| ClassifierError::Permanent(format!("unparseable response: {e}")))?;

    let overall_sentiment = match payload.overall_sentiment.as_str() {
        "positive" => Sentiment::Positive,
        "neutral" => Sentiment::Neutral,
        "negative" => Sentiment::Negative,
        other => {
            return Err(ClassifierError::Permanent(format!(
                "unknown sentiment {other:?}"
            )))
        }
    };

    let impact = match payload.impact.as_str() {
        "minimal" => ImpactLevel::Minimal,
        "low" => ImpactLevel::Low,
        "medium" => ImpactLevel::Medium,
        "high" => ImpactLevel::High,
        "very_high" => ImpactLevel::VeryHigh,
        other => {
            return Err(ClassifierError::Permanent(format!(
                "unknown impact {other:?}"
            )))
        }
    };

    Ok(ArticleClassification {
        overall_sentiment,
        sentiment_score: payload.sentiment_score.clamp(-1.0, 1.0),
        confidence: payload.confidence.clamp(0.0, 1.0),
        impact,
        per_stock: payload
            .per_stock
            .into_iter()
            .map(|p| StockSentiment {
                symbol: p.symbol,
                sentiment_score: p.sentiment_score.clamp(-1.0, 1.0),
                confidence: p.confidence.clamp(0.0, 1.0),
                relevance: p.relevance.clamp(0.0, 1.0),
            })
            .collect(),
        provider: provider.to_string(),
    })
}

fn transport_error(e: &reqwest::Error) -> ClassifierError {
    if e.is_timeout() || e.is_connect() {
        ClassifierError::Transient(e.to_string())
    } else {
        ClassifierError::Permanent(e.to_string())
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ClassifierError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ClassifierError::Transient(format!("provider status {status}: {body}"))
    } else {
        ClassifierError::Permanent(format!("provider status {status}: {body}"))
    }
}

/// OpenAI-compatible chat-completions provider.
pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    /// # Errors
    /// Returns a transient error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.call_timeout_seconds))
            .build()
            .map_err(|e| ClassifierError::Transient(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.cloud_api_url.clone(),
            api_key: config.cloud_api_key.clone(),
            model: config.cloud_model.clone(),
        })
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(
        &self,
        article: &ArticleForClassification,
    ) -> Result<ArticleClassification, ClassifierError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": classification_prompt(article)}],
            "temperature": 0.1,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Permanent(format!("bad response envelope: {e}")))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifierError::Permanent("empty choices".to_string()))?;

        parse_payload(content, self.name())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Local Ollama provider using `/api/chat` with streaming disabled.
pub struct OllamaClassifier {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClassifier {
    /// # Errors
    /// Returns a transient error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.call_timeout_seconds))
            .build()
            .map_err(|e| ClassifierError::Transient(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.local_api_url.trim_end_matches('/').to_string(),
            model: config.local_model.clone(),
        })
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(
        &self,
        article: &ArticleForClassification,
    ) -> Result<ArticleClassification, ClassifierError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": classification_prompt(article)}],
            "stream": false,
            "format": "json",
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        #[derive(Deserialize)]
        struct OllamaResponse {
            message: OllamaMessage,
        }
        #[derive(Deserialize)]
        struct OllamaMessage {
            content: String,
        }

        let chat: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Permanent(format!("bad response envelope: {e}")))?;

        parse_payload(&chat.message.content, self.name())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
