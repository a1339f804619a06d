//! Channel transports: Telegram Bot API and SMTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use gpw_advisor_core::{SmtpConfig, TelegramConfig};

use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Delivery failure, split by retry policy.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Timeout, 5xx, SMTP 4xx. The signal stays undispatched and the
    /// next cycle retries.
    #[error("retriable delivery failure: {0}")]
    Retriable(String),

    /// Rejected recipient or malformed request; retrying cannot help.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// Sends a rendered Telegram message to a chat.
#[async_trait]
pub trait TelegramTransport: Send + Sync {
    /// Delivers the text; success is an acknowledged message id.
    ///
    /// # Errors
    /// Returns a [`DispatchError`] split by retry policy.
    async fn send(&self, chat_id: &str, text: &str) -> Result<i64, DispatchError>;
}

/// Sends a rendered email.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Delivers the message; success is the server acknowledging DATA.
    ///
    /// # Errors
    /// Returns a [`DispatchError`] split by retry policy.
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), DispatchError>;
}

/// Telegram Bot API client.
pub struct TelegramBot {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramBot {
    /// # Errors
    /// Returns a retriable error if the HTTP client cannot be built.
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Retriable(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    result: Option<TelegramMessage>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

#[async_trait]
impl TelegramTransport for TelegramBot {
    async fn send(&self, chat_id: &str, text: &str) -> Result<i64, DispatchError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let request = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    DispatchError::Retriable(e.to_string())
                } else {
                    DispatchError::Permanent(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DispatchError::Retriable(format!("telegram status {status}")));
        }

        let payload: TelegramResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Permanent(format!("bad telegram response: {e}")))?;

        // Delivery succeeded iff the API acknowledged with a message id.
        match (payload.ok, payload.result) {
            (true, Some(message)) => Ok(message.message_id),
            _ => Err(DispatchError::Permanent(format!(
                "telegram rejected message: {}",
                payload.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }
}

/// SMTP mailer with HTML + text alternative bodies.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// # Errors
    /// Returns a permanent error when the relay or sender address is
    /// invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self, DispatchError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| DispatchError::Permanent(format!("bad from address: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| DispatchError::Permanent(format!("bad smtp relay: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), DispatchError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| DispatchError::Permanent(format!("bad recipient: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .map_err(|e| DispatchError::Permanent(format!("message build failed: {e}")))?;

        match self.transport.send(message).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // SMTP 4xx is transient by definition; everything the
                // library reports as permanent stays permanent.
                if e.is_transient() {
                    Err(DispatchError::Retriable(e.to_string()))
                } else {
                    Err(DispatchError::Permanent(e.to_string()))
                }
            }
        }
    }
}
