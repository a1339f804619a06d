//! OHLCV snapshot collector.
//!
//! Fetches the latest bars per monitored stock from the configured CSV
//! endpoint. Per-symbol failures are isolated, malformed rows are dropped
//! with a counter, and bar writes are idempotent by `(symbol, timestamp)`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rust_decimal::Decimal;

use gpw_advisor_core::{warsaw_to_utc, CollectorConfig, EngineError};
use gpw_advisor_data::{OhlcvBar, OhlcvRepository, StockRecord};

use crate::types::CollectorStats;

/// Upper bound on the retry backoff.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Summary of one collection run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceRunSummary {
    pub symbols_processed: u64,
    pub symbols_failed: u64,
    pub stats: CollectorStats,
}

pub struct PriceCollector {
    config: CollectorConfig,
    http: reqwest::Client,
    limiter: Arc<DirectLimiter>,
    repo: OhlcvRepository,
}

impl PriceCollector {
    /// Creates a collector with its own HTTP client and a shared rate
    /// limiter across all requests.
    ///
    /// # Errors
    /// Returns a configuration error if the rate limit is zero or the
    /// HTTP client cannot be built.
    pub fn new(config: CollectorConfig, repo: OhlcvRepository) -> Result<Self, EngineError> {
        let rps = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            EngineError::Configuration("collector.requests_per_second must be positive".into())
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        Ok(Self {
            config,
            http,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            repo,
        })
    }

    /// Collects snapshots for every given stock. A failing symbol is
    /// logged and skipped; it never aborts the batch.
    pub async fn collect_all(&self, stocks: &[StockRecord]) -> PriceRunSummary {
        let mut summary = PriceRunSummary::default();

        for stock in stocks {
            summary.symbols_processed += 1;
            match self.collect_symbol(&stock.symbol).await {
                Ok(stats) => summary.stats.merge(&stats),
                Err(e) => {
                    tracing::warn!("Price collection failed for {}: {}", stock.symbol, e);
                    summary.symbols_failed += 1;
                    summary.stats.error_occurred();
                }
            }
        }

        summary
    }

    /// Fetches and stores the latest bars for one symbol.
    ///
    /// # Errors
    /// Returns a transient error after the retry budget is exhausted.
    pub async fn collect_symbol(&self, symbol: &str) -> Result<CollectorStats, EngineError> {
        let body = self.fetch_with_retry(symbol).await?;
        let (bars, stats) = parse_csv(symbol, &body);
        let mut stats = stats;

        for bar in bars {
            match self.repo.insert_bar(&bar).await {
                Ok(true) => stats.record_collected(),
                Ok(false) => stats.duplicate_skipped(),
                Err(e) => {
                    return Err(EngineError::TransientExternal(format!(
                        "bar write failed for {symbol}: {e}"
                    )))
                }
            }
        }

        Ok(stats)
    }

    async fn fetch_with_retry(&self, symbol: &str) -> Result<String, EngineError> {
        let url = format!("{}?s={}&i=1", self.config.quotes_url, symbol.to_lowercase());
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(
                    Duration::from_secs(self.config.retry_backoff_seconds),
                    attempt,
                );
                tracing::debug!("Retry {} for {} after {:?}", attempt, symbol, backoff);
                tokio::time::sleep(backoff).await;
            }

            self.limiter.until_ready().await;

            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.map_err(|e| {
                        EngineError::TransientExternal(format!("body read failed: {e}"))
                    });
                }
                Ok(response) => {
                    last_error = format!("upstream status {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        Err(EngineError::TransientExternal(format!(
            "{symbol}: retries exhausted: {last_error}"
        )))
    }
}

/// Exponential backoff with the base doubled per attempt, capped.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(BACKOFF_CAP)
}

/// Parses CSV quote lines `Date,Time,Open,High,Low,Close,Volume` in
/// source-local (Warsaw) time into validated UTC bars.
///
/// Malformed lines and invariant-violating bars are dropped and counted;
/// parsing never fails as a whole.
#[must_use]
pub fn parse_csv(symbol: &str, body: &str) -> (Vec<OhlcvBar>, CollectorStats) {
    let mut bars = Vec::new();
    let mut stats = CollectorStats::default();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Dropping unreadable quote line for {}: {}", symbol, e);
                stats.malformed_dropped();
                continue;
            }
        };
        if record.is_empty() || record.get(0) == Some("Date") {
            continue;
        }
        match parse_record(symbol, &record) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                tracing::debug!("Dropping malformed quote line for {}: {}", symbol, e);
                stats.malformed_dropped();
            }
        }
    }

    (bars, stats)
}

fn parse_record(symbol: &str, record: &csv::StringRecord) -> Result<OhlcvBar, EngineError> {
    let fields: Vec<&str> = record.iter().collect();
    if fields.len() != 7 {
        return Err(EngineError::MalformedInput(format!(
            "expected 7 fields, got {}",
            fields.len()
        )));
    }

    let date = NaiveDate::parse_from_str(fields[0], "%Y-%m-%d")
        .map_err(|e| EngineError::MalformedInput(format!("bad date {:?}: {e}", fields[0])))?;
    let time = NaiveTime::parse_from_str(fields[1], "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(fields[1], "%H:%M"))
        .map_err(|e| EngineError::MalformedInput(format!("bad time {:?}: {e}", fields[1])))?;

    let price = |raw: &str, name: &str| -> Result<Decimal, EngineError> {
        raw.parse::<Decimal>()
            .map_err(|e| EngineError::MalformedInput(format!("bad {name} {raw:?}: {e}")))
    };

    let open = price(fields[2], "open")?;
    let high = price(fields[3], "high")?;
    let low = price(fields[4], "low")?;
    let close = price(fields[5], "close")?;
    let volume: i64 = fields[6]
        .parse()
        .map_err(|e| EngineError::MalformedInput(format!("bad volume {:?}: {e}", fields[6])))?;

    OhlcvBar::new(symbol, warsaw_to_utc(date, time), open, high, low, close, volume)
}
