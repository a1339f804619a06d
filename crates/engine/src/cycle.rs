//! Engine context and the four scheduled cycles.
//!
//! One `Engine` owns the repositories, collectors, analyzer, generator,
//! and dispatcher, and executes the work behind each schedule kind. The
//! configuration-derived components live behind an `RwLock`: when the
//! config watcher broadcasts a reload, the engine rebuilds them at the
//! next cycle boundary, and a reload that fails validation keeps the
//! previous state running. The signal cycle fans out across
//! `(user, stock)` pairs on a bounded worker pool under a global
//! deadline; work that misses the deadline is cancelled and picked up by
//! the next cycle, while committed writes stay committed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;

use gpw_advisor_collectors::{NewsCollector, PriceCollector};
use gpw_advisor_core::{AppConfig, Clock, EngineError, SystemClock, TradingCalendar};
use gpw_advisor_data::{
    DatabaseClient, InsertOutcome, PreferencesCache, Repositories, ScheduleKind, StockRecord,
    UserPreferencesRecord,
};
use gpw_advisor_dispatch::{
    DispatchStore, Dispatcher, PreferencesSource, SmtpMailer, TelegramBot,
};
use gpw_advisor_sentiment::{
    Classifier, DeadlineClassifier, OllamaClassifier, OpenAiClassifier, StubClassifier,
    TimeWeightedAnalyzer, WeightedClassifier,
};

use crate::generator::{GeneratorInput, SignalGenerator};
use crate::outcome::resolve_signal;
use crate::scheduler::{CycleReport, CycleRunner};

/// Bars fetched per stock for indicator evaluation; covers the slowest
/// indicator plus crossover history with room to spare.
const BARS_WINDOW: i64 = 80;

/// Trailing window for the average-daily-volume eligibility check.
const VOLUME_WINDOW_DAYS: i64 = 30;

/// Everything derived from the configuration; rebuilt on reload.
struct EngineState {
    config: AppConfig,
    calendar: TradingCalendar,
    price_collector: PriceCollector,
    news_collector: NewsCollector,
    classifier: Arc<dyn Classifier>,
    analyzer: Arc<TimeWeightedAnalyzer>,
    generator: SignalGenerator,
    dispatcher: Arc<Dispatcher>,
}

impl EngineState {
    fn build(
        config: AppConfig,
        repos: &Arc<Repositories>,
        preferences: &Arc<PreferencesCache>,
        clock: &Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let calendar = TradingCalendar::from_config(&config.session, &config.calendar)?;

        let price_collector =
            PriceCollector::new(config.collector.clone(), repos.ohlcv.clone())?;
        let news_collector = NewsCollector::new(config.news.clone(), repos.news.clone())?;
        let analyzer = Arc::new(TimeWeightedAnalyzer::from_config(&config.news)?);
        let classifier = build_classifier(&config);
        let generator = SignalGenerator::new(config.signal.profile);

        let telegram = TelegramBot::new(
            &config.telegram,
            Duration::from_secs(config.dispatch.send_timeout_seconds),
        )
        .map_err(|e| EngineError::Configuration(e.to_string()))?;
        let mailer = SmtpMailer::new(&config.smtp)
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        let store: Arc<dyn DispatchStore> = Arc::new(repos.signals.clone());
        let prefs_source: Arc<dyn PreferencesSource> =
            Arc::clone(preferences) as Arc<dyn PreferencesSource>;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(telegram),
            Arc::new(mailer),
            store,
            prefs_source,
            Arc::clone(clock),
            Duration::from_secs(config.dispatch.send_timeout_seconds),
            config.dispatch.queue_capacity,
        ));

        Ok(Self {
            config,
            calendar,
            price_collector,
            news_collector,
            classifier,
            analyzer,
            generator,
            dispatcher,
        })
    }
}

pub struct Engine {
    clock: Arc<dyn Clock>,
    repos: Arc<Repositories>,
    preferences: Arc<PreferencesCache>,
    state: RwLock<EngineState>,
    /// Reload notifications from the config watcher; consumed at cycle
    /// boundaries.
    config_rx: Mutex<Option<watch::Receiver<AppConfig>>>,
    /// Global deadline of one signal cycle; defaults to the cycle period.
    cycle_deadline: Duration,
}

impl Engine {
    /// Wires the full engine from configuration and a connected database.
    ///
    /// # Errors
    /// Returns a configuration error when any component rejects its
    /// config section.
    pub fn from_config(config: AppConfig, db: &DatabaseClient) -> Result<Self, EngineError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::with_clock(config, db, clock)
    }

    /// Same as [`Engine::from_config`] with an explicit clock, for tests.
    ///
    /// # Errors
    /// Returns a configuration error when any component rejects its
    /// config section.
    pub fn with_clock(
        config: AppConfig,
        db: &DatabaseClient,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let repos = Arc::new(Repositories::new(db.pool().clone()));
        let preferences = Arc::new(PreferencesCache::new(repos.users.clone()));
        let state = EngineState::build(config, &repos, &preferences, &clock)?;

        Ok(Self {
            clock,
            repos,
            preferences,
            state: RwLock::new(state),
            config_rx: Mutex::new(None),
            cycle_deadline: Duration::from_secs(30 * 60),
        })
    }

    /// Attaches the config watcher's receiver; reloaded configurations
    /// are applied at the next cycle boundary.
    #[must_use]
    pub fn with_config_updates(mut self, rx: watch::Receiver<AppConfig>) -> Self {
        self.config_rx = Mutex::new(Some(rx));
        self
    }

    /// Applies a pending configuration update, if any. A configuration
    /// that fails validation is rejected and the previous state keeps
    /// running.
    pub async fn apply_config_updates(&self) {
        let mut guard = self.config_rx.lock().await;
        let Some(rx) = guard.as_mut() else {
            return;
        };
        if !rx.has_changed().unwrap_or(false) {
            return;
        }
        let config = rx.borrow_and_update().clone();
        drop(guard);

        match EngineState::build(config, &self.repos, &self.preferences, &self.clock) {
            Ok(state) => {
                *self.state.write().await = state;
                tracing::info!("Applied reloaded configuration");
            }
            Err(e) => {
                tracing::error!("Rejected reloaded configuration, keeping previous: {}", e);
            }
        }
    }

    /// Snapshot of the current trading calendar.
    pub async fn calendar(&self) -> TradingCalendar {
        self.state.read().await.calendar.clone()
    }

    #[must_use]
    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Drops a user's cached preferences after an update notification.
    pub async fn invalidate_preferences(&self, user_id: i64) {
        self.preferences.invalidate(user_id).await;
    }

    /// Collects OHLCV snapshots for every monitored stock.
    ///
    /// # Errors
    /// Returns an error when the stock universe cannot be read.
    pub async fn run_price_cycle(&self) -> Result<CycleReport> {
        let state = self.state.read().await;
        let stocks = self.repos.stocks.monitored().await?;
        let summary = state.price_collector.collect_all(&stocks).await;

        tracing::info!(
            "Price cycle: {} symbols, {} bars inserted, {} duplicates, {} failed",
            summary.symbols_processed,
            summary.stats.records_collected,
            summary.stats.duplicates_skipped,
            summary.symbols_failed
        );

        Ok(CycleReport {
            items_processed: summary.symbols_processed as i64,
            items_failed: summary.symbols_failed as i64,
        })
    }

    /// Pulls the feed list and classifies a bounded article batch.
    ///
    /// # Errors
    /// Returns an error when the stock universe cannot be read.
    pub async fn run_news_cycle(&self) -> Result<CycleReport> {
        let state = self.state.read().await;
        let stocks = self.repos.stocks.monitored().await?;
        let summary = state
            .news_collector
            .run(&stocks, state.classifier.as_ref())
            .await;

        tracing::info!(
            "News cycle: {} feeds, {} articles stored, {} classified, {} feed failures",
            summary.feeds_processed,
            summary.stats.records_collected,
            summary.articles_classified,
            summary.feeds_failed
        );

        Ok(CycleReport {
            items_processed: summary.stats.records_collected as i64,
            items_failed: summary.feeds_failed as i64,
        })
    }

    /// Generates signals for every `(active user, monitored stock)` pair
    /// and dispatches the new ones.
    ///
    /// # Errors
    /// Returns an error when the user or stock universe cannot be read.
    pub async fn run_signal_cycle(&self) -> Result<CycleReport> {
        self.signal_cycle(None).await
    }

    /// Signal cycle restricted to one monitored symbol, for the operator
    /// surface.
    ///
    /// # Errors
    /// Returns a malformed-input error when the symbol is not among the
    /// monitored stocks.
    pub async fn run_signal_cycle_for_symbol(&self, symbol: &str) -> Result<CycleReport> {
        self.signal_cycle(Some(symbol)).await
    }

    async fn signal_cycle(&self, only_symbol: Option<&str>) -> Result<CycleReport> {
        // Snapshot the reloadable components so a concurrent config
        // apply does not block behind a long cycle.
        let (calendar, generator, analyzer, dispatcher, max_concurrency, lookback_hours) = {
            let state = self.state.read().await;
            (
                state.calendar.clone(),
                state.generator.clone(),
                Arc::clone(&state.analyzer),
                Arc::clone(&state.dispatcher),
                state.config.collector.max_concurrency,
                state.config.news.lookback_hours,
            )
        };

        let now = self.clock.now();
        let Some(session) = calendar.session_at(now) else {
            tracing::debug!("No trading session at {}, skipping signal cycle", now);
            return Ok(CycleReport::default());
        };

        let users = self.repos.users.active_users().await?;
        let mut stocks = self.repos.stocks.monitored().await?;
        if let Some(symbol) = only_symbol {
            stocks.retain(|s| s.symbol.eq_ignore_ascii_case(symbol));
            if stocks.is_empty() {
                return Err(EngineError::MalformedInput(format!(
                    "{symbol} is not a monitored stock"
                ))
                .into());
            }
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut tasks: JoinSet<Result<bool>> = JoinSet::new();

        for user in &users {
            for stock in &stocks {
                let permit_source = Arc::clone(&semaphore);
                let repos = Arc::clone(&self.repos);
                let analyzer = Arc::clone(&analyzer);
                let generator = generator.clone();
                let calendar = calendar.clone();
                let user = user.clone();
                let stock = stock.clone();
                let lookback = chrono::Duration::hours(lookback_hours);

                tasks.spawn(async move {
                    let _permit = permit_source
                        .acquire()
                        .await
                        .context("worker pool closed")?;
                    generate_for_pair(
                        &repos, &analyzer, &generator, &calendar, &user, &stock, session, now,
                        lookback,
                    )
                    .await
                });
            }
        }

        let mut processed = 0i64;
        let mut failed = 0i64;

        let deadline = tokio::time::sleep(self.cycle_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok(Ok(_persisted))) => processed += 1,
                        Some(Ok(Err(e))) => {
                            tracing::warn!("Signal generation failed for one pair: {}", e);
                            failed += 1;
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Signal worker panicked: {}", e);
                            failed += 1;
                        }
                    }
                }
                () = &mut deadline => {
                    let remaining = tasks.len() as i64;
                    tracing::warn!(
                        "Signal cycle deadline reached, cancelling {} pending pairs",
                        remaining
                    );
                    tasks.abort_all();
                    failed += remaining;
                    break;
                }
            }
        }

        let dispatch = dispatcher.dispatch_pending().await?;

        tracing::info!(
            "Signal cycle: {} pairs evaluated, {} failed; {} deliveries sent",
            processed,
            failed,
            dispatch.deliveries_sent
        );

        Ok(CycleReport {
            items_processed: processed,
            items_failed: failed,
        })
    }

    /// Delivers pending signals without generating new ones.
    ///
    /// # Errors
    /// Returns an error when the store fails.
    pub async fn run_dispatch(&self) -> Result<gpw_advisor_dispatch::DispatchReport> {
        let dispatcher = Arc::clone(&self.state.read().await.dispatcher);
        dispatcher.dispatch_pending().await
    }

    /// Resolves open signals against later bars; after session close it
    /// finalises the day and expires undelivered signals.
    ///
    /// # Errors
    /// Returns an error when the open-signal set cannot be read.
    pub async fn run_outcome_cycle(&self) -> Result<CycleReport> {
        let (calendar, dispatcher) = {
            let state = self.state.read().await;
            (state.calendar.clone(), Arc::clone(&state.dispatcher))
        };

        let now = self.clock.now();
        let open = self.repos.signals.open_unresolved().await?;

        let mut processed = 0i64;
        let mut failed = 0i64;
        let mut session_done_dates = Vec::new();

        for signal in open {
            let Some(session) = calendar.session_for(signal.session_date) else {
                continue;
            };
            let session_over = now > session.close;

            let bars = match self
                .repos
                .ohlcv
                .bars_between(&signal.symbol, signal.created_at, session.close)
                .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    tracing::warn!("Bar read failed for {}: {}", signal.symbol, e);
                    failed += 1;
                    continue;
                }
            };

            if let Some(outcome) = resolve_signal(&signal, &bars, session_over) {
                match self.repos.signals.attach_outcome(signal.id, &outcome).await {
                    Ok(true) => {
                        processed += 1;
                        tracing::info!(
                            "Resolved {} {} as {:?} at {}",
                            signal.symbol,
                            signal.id,
                            outcome.resolution,
                            outcome.exit_price
                        );
                    }
                    Ok(false) => {
                        tracing::debug!("Signal {} already resolved", signal.id);
                    }
                    Err(e) => {
                        tracing::warn!("Outcome attach failed for {}: {}", signal.id, e);
                        failed += 1;
                    }
                }
            }

            if session_over && !session_done_dates.contains(&signal.session_date) {
                session_done_dates.push(signal.session_date);
            }
        }

        // Undispatched signals do not survive their session.
        let today = now.with_timezone(&chrono_tz::Europe::Warsaw).date_naive();
        if calendar
            .session_for(today)
            .is_some_and(|s| now > s.close)
            && !session_done_dates.contains(&today)
        {
            session_done_dates.push(today);
        }
        for date in session_done_dates {
            if let Err(e) = dispatcher.expire_session(date).await {
                tracing::warn!("Expiry failed for {}: {}", date, e);
            }
        }

        Ok(CycleReport {
            items_processed: processed,
            items_failed: failed,
        })
    }
}

#[async_trait]
impl CycleRunner for Engine {
    async fn run_cycle(&self, kind: ScheduleKind) -> Result<CycleReport> {
        self.apply_config_updates().await;

        match kind {
            ScheduleKind::Price => self.run_price_cycle().await,
            ScheduleKind::News => self.run_news_cycle().await,
            ScheduleKind::Signals => self.run_signal_cycle().await,
            ScheduleKind::Outcomes => self.run_outcome_cycle().await,
        }
    }
}

/// Evaluates one `(user, stock)` pair and persists the result when it is
/// actionable. Returns whether a signal was persisted.
#[allow(clippy::too_many_arguments)]
async fn generate_for_pair(
    repos: &Repositories,
    analyzer: &TimeWeightedAnalyzer,
    generator: &SignalGenerator,
    calendar: &TradingCalendar,
    user: &UserPreferencesRecord,
    stock: &StockRecord,
    session: gpw_advisor_core::TradingSession,
    now: chrono::DateTime<Utc>,
    lookback: chrono::Duration,
) -> Result<bool> {
    let bars = repos.ohlcv.latest_bars(&stock.symbol, BARS_WINDOW).await?;
    let closes: Vec<rust_decimal::Decimal> = bars.iter().map(|b| b.close).collect();
    let last_close = bars.last().map(|b| b.close);
    let votes = gpw_advisor_indicators::evaluate_votes(&closes);

    let average_daily_volume = repos
        .ohlcv
        .average_daily_volume(&stock.symbol, VOLUME_WINDOW_DAYS)
        .await?;
    let actionable_today = repos
        .signals
        .actionable_count_today(user.user_id, session.date)
        .await?;

    let mentions = repos
        .news
        .scored_mentions(&stock.symbol, now - lookback)
        .await?;
    let news = analyzer.aggregate(&mentions, now, calendar);

    let input = GeneratorInput {
        user,
        stock,
        votes,
        last_close,
        average_daily_volume,
        actionable_today,
        news,
        now,
        session,
    };

    let record = generator
        .generate(&input)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if !record.signal_type.is_actionable() {
        tracing::debug!(
            "{} {} -> hold ({})",
            user.user_id,
            stock.symbol,
            record.reason.label()
        );
        return Ok(false);
    }

    match repos
        .signals
        .insert_with_supersede(&record, &user.channels)
        .await?
    {
        InsertOutcome::Inserted => {
            tracing::info!(
                "{} {} {} at {} (confidence {})",
                user.user_id,
                record.signal_type.as_str(),
                stock.symbol,
                record.price_at_signal,
                record.confidence
            );
            Ok(true)
        }
        InsertOutcome::Superseded { previous } => {
            tracing::info!(
                "{} {} {} supersedes {}",
                user.user_id,
                record.signal_type.as_str(),
                stock.symbol,
                previous
            );
            Ok(true)
        }
        InsertOutcome::DuplicateOpen => {
            tracing::debug!(
                "{} {} already has an open {} signal",
                user.user_id,
                stock.symbol,
                record.signal_type.as_str()
            );
            Ok(false)
        }
    }
}

/// Builds the classifier chain from configuration: weighted cloud/local
/// providers under per-call deadlines, or the neutral stub when neither
/// provider is configured.
#[must_use]
pub fn build_classifier(config: &AppConfig) -> Arc<dyn Classifier> {
    let deadline = Duration::from_secs(config.llm.call_timeout_seconds);

    let cloud = (!config.llm.cloud_api_key.is_empty())
        .then(|| OpenAiClassifier::new(&config.llm).ok())
        .flatten();
    let local = (!config.llm.local_api_url.is_empty())
        .then(|| OllamaClassifier::new(&config.llm).ok())
        .flatten();

    match (cloud, local) {
        (Some(cloud), Some(local)) => Arc::new(WeightedClassifier::new(
            Box::new(DeadlineClassifier::new(cloud, deadline)),
            Box::new(DeadlineClassifier::new(local, deadline)),
            config.llm.cloud_weight,
        )),
        (Some(cloud), None) => Arc::new(DeadlineClassifier::new(cloud, deadline)),
        (None, Some(local)) => Arc::new(DeadlineClassifier::new(local, deadline)),
        (None, None) => {
            tracing::warn!("No LLM provider configured, using neutral stub classifier");
            Arc::new(StubClassifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_selected_without_providers() {
        let mut config = AppConfig::default();
        config.llm.cloud_api_key = String::new();
        config.llm.local_api_url = String::new();

        let classifier = build_classifier(&config);
        assert_eq!(classifier.name(), "stub");
    }

    #[test]
    fn local_only_without_cloud_key() {
        let mut config = AppConfig::default();
        config.llm.cloud_api_key = String::new();

        let classifier = build_classifier(&config);
        assert_eq!(classifier.name(), "ollama");
    }

    #[test]
    fn weighted_with_both_providers() {
        let mut config = AppConfig::default();
        config.llm.cloud_api_key = "sk-test".to_string();

        let classifier = build_classifier(&config);
        assert_eq!(classifier.name(), "weighted");
    }
}
