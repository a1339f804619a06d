use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick period for the scheduler coordinator, in seconds.
    pub tick_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session open in Warsaw local time, "HH:MM".
    pub open_local: String,
    /// Session close in Warsaw local time, "HH:MM".
    pub close_local: String,
    /// Last time of day at which new non-hold signals may be emitted.
    pub last_entry_local: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_local: "09:00".to_string(),
            close_local: "17:00".to_string(),
            last_entry_local: "15:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Dates added to the built-in Polish holiday table.
    #[serde(default)]
    pub extra_holidays: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Base URL of the CSV quote endpoint.
    pub quotes_url: String,
    /// Worker pool size for parallel collection.
    pub max_concurrency: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_seconds: u64,
    /// Maximum retries per symbol fetch.
    pub max_retries: u32,
    /// Base backoff between retries, in seconds.
    pub retry_backoff_seconds: u64,
    /// Global request rate limit across collectors, per second.
    pub requests_per_second: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            quotes_url: "https://stooq.pl/q/l/".to_string(),
            max_concurrency: 8,
            request_timeout_seconds: 30,
            max_retries: 3,
            retry_backoff_seconds: 30,
            requests_per_second: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Stable feed identifier, also the key into `source_weights`.
    pub id: String,
    pub url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    /// Half-life of the exponential news decay, in minutes. Valid [15, 1440].
    pub half_life_minutes: u32,
    /// Per-feed weight applied to article contributions. Valid [0, 2].
    #[serde(default)]
    pub source_weights: HashMap<String, f64>,
    /// Time-weight profile name.
    pub profile: String,
    /// Lookback window for signal-cycle aggregation, in hours.
    pub lookback_hours: i64,
    /// Maximum articles classified per collector run.
    pub classification_batch: usize,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            half_life_minutes: 120,
            source_weights: HashMap::new(),
            profile: "intraday-default".to_string(),
            lookback_hours: 168,
            classification_batch: 5,
        }
    }
}

/// Confidence-adjustment magnitudes selected by `signal.profile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalProfile {
    Conservative,
    Balanced,
    Aggressive,
}

impl SignalProfile {
    /// Base confidence boost applied when news agrees with the candidate.
    #[must_use]
    pub fn news_confidence_boost(self) -> u32 {
        match self {
            Self::Conservative => 10,
            Self::Balanced => 15,
            Self::Aggressive => 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub profile: SignalProfile,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            profile: SignalProfile::Balanced,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Base backoff before a failed delivery is retried, in seconds.
    pub retry_backoff_seconds: u64,
    /// Bound of each channel transport queue.
    pub queue_capacity: usize,
    /// Per-send timeout in seconds.
    pub send_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_backoff_seconds: 30,
            queue_capacity: 64,
            send_timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: "advisor@gpw.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint of the cloud provider.
    pub cloud_api_url: String,
    pub cloud_api_key: String,
    pub cloud_model: String,
    /// Base URL of the local Ollama instance.
    pub local_api_url: String,
    pub local_model: String,
    /// Selection weight of the cloud provider in [0, 1]; the remainder
    /// goes to the local provider.
    pub cloud_weight: f64,
    /// Per-call deadline in seconds.
    pub call_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            cloud_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            cloud_api_key: String::new(),
            cloud_model: "gpt-4o-mini".to_string(),
            local_api_url: "http://localhost:11434".to_string(),
            local_model: "llama3".to_string(),
            cloud_weight: 0.7,
            call_timeout_seconds: 45,
        }
    }
}

impl AppConfig {
    /// Validates value ranges that figment cannot express.
    ///
    /// # Errors
    /// Returns a message describing the first offending option.
    pub fn validate(&self) -> Result<(), String> {
        if !(15..=1440).contains(&self.news.half_life_minutes) {
            return Err(format!(
                "news.half_life_minutes must be in [15, 1440], got {}",
                self.news.half_life_minutes
            ));
        }
        for (feed, weight) in &self.news.source_weights {
            if !(0.0..=2.0).contains(weight) {
                return Err(format!(
                    "news.source_weights[{feed}] must be in [0, 2], got {weight}"
                ));
            }
        }
        if self.collector.max_concurrency == 0 {
            return Err("collector.max_concurrency must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.llm.cloud_weight) {
            return Err(format!(
                "llm.cloud_weight must be in [0, 1], got {}",
                self.llm.cloud_weight
            ));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/gpw_advisor".to_string(),
                max_connections: 10,
            },
            scheduler: SchedulerConfig::default(),
            session: SessionConfig::default(),
            calendar: CalendarConfig::default(),
            collector: CollectorConfig::default(),
            news: NewsConfig::default(),
            signal: SignalConfig::default(),
            dispatch: DispatchConfig::default(),
            telegram: TelegramConfig::default(),
            smtp: SmtpConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn half_life_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.news.half_life_minutes = 10;
        assert!(config.validate().is_err());

        config.news.half_life_minutes = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn source_weight_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config
            .news
            .source_weights
            .insert("bankier".to_string(), 2.5);
        let err = config.validate().unwrap_err();
        assert!(err.contains("bankier"));
    }

    #[test]
    fn profile_boost_magnitudes() {
        assert_eq!(SignalProfile::Conservative.news_confidence_boost(), 10);
        assert_eq!(SignalProfile::Balanced.news_confidence_boost(), 15);
        assert_eq!(SignalProfile::Aggressive.news_confidence_boost(), 20);
    }

    #[test]
    fn default_cadence_values() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.tick_interval_seconds, 60);
        assert_eq!(config.dispatch.retry_backoff_seconds, 30);
        assert_eq!(config.news.half_life_minutes, 120);
        assert_eq!(config.collector.max_concurrency, 8);
    }
}
