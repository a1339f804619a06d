//! Idempotent signal dispatcher.
//!
//! Picks undispatched non-hold signals and delivers them over each of the
//! user's enabled channels. Idempotence key is `(signal, channel)`: a
//! channel that already reached a terminal status is never re-sent, and
//! each pending channel is attempted at most once per cycle. Retriable
//! failures leave the signal undispatched for the next cycle; permanent
//! failures mark the channel failed. Each channel has a bounded per-cycle
//! send budget standing in for its transport queue; signals beyond the
//! budget are left queued rather than blocking the generator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use gpw_advisor_core::Clock;
use gpw_advisor_data::{
    DeliveryChannel, DeliveryStatus, PreferencesCache, SignalRepository, TradingSignalRecord,
    UserPreferencesRecord,
};

use crate::render::{email_bodies, email_subject, telegram_text};
use crate::transport::{DispatchError, EmailTransport, TelegramTransport};

/// The signal-store operations the dispatcher needs. `SignalRepository`
/// is the production implementation; tests supply an in-memory fake.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Non-hold signals awaiting dispatch.
    ///
    /// # Errors
    /// Returns an error if the store read fails.
    async fn undispatched(&self) -> Result<Vec<TradingSignalRecord>>;

    /// Current delivery status per channel for a signal.
    ///
    /// # Errors
    /// Returns an error if the store read fails.
    async fn delivery_statuses(
        &self,
        signal_id: Uuid,
    ) -> Result<Vec<(DeliveryChannel, DeliveryStatus)>>;

    /// Records one `(signal, channel)` delivery attempt result.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    async fn record_delivery(
        &self,
        signal_id: Uuid,
        channel: DeliveryChannel,
        status: DeliveryStatus,
        detail: Option<&str>,
    ) -> Result<()>;

    /// Marks a signal dispatched.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    async fn mark_dispatched(&self, signal_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Expires a session's still-pending deliveries.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    async fn expire_undispatched(&self, session_date: NaiveDate) -> Result<u64>;
}

#[async_trait]
impl DispatchStore for SignalRepository {
    async fn undispatched(&self) -> Result<Vec<TradingSignalRecord>> {
        SignalRepository::undispatched(self).await
    }

    async fn delivery_statuses(
        &self,
        signal_id: Uuid,
    ) -> Result<Vec<(DeliveryChannel, DeliveryStatus)>> {
        SignalRepository::delivery_statuses(self, signal_id).await
    }

    async fn record_delivery(
        &self,
        signal_id: Uuid,
        channel: DeliveryChannel,
        status: DeliveryStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        SignalRepository::record_delivery(self, signal_id, channel, status, detail).await
    }

    async fn mark_dispatched(&self, signal_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        SignalRepository::mark_dispatched(self, signal_id, at).await
    }

    async fn expire_undispatched(&self, session_date: NaiveDate) -> Result<u64> {
        SignalRepository::expire_undispatched(self, session_date).await
    }
}

/// Read side of the user preferences, cached in production.
#[async_trait]
pub trait PreferencesSource: Send + Sync {
    /// Preferences for one user, or `None` for an unknown user.
    ///
    /// # Errors
    /// Returns an error if the underlying read fails.
    async fn preferences(&self, user_id: i64) -> Result<Option<Arc<UserPreferencesRecord>>>;
}

#[async_trait]
impl PreferencesSource for PreferencesCache {
    async fn preferences(&self, user_id: i64) -> Result<Option<Arc<UserPreferencesRecord>>> {
        self.get(user_id).await
    }
}

/// Counters for one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub signals_seen: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
    pub retriable_failures: u64,
    pub left_queued: u64,
    pub signals_completed: u64,
}

pub struct Dispatcher {
    telegram: Arc<dyn TelegramTransport>,
    email: Arc<dyn EmailTransport>,
    signals: Arc<dyn DispatchStore>,
    preferences: Arc<dyn PreferencesSource>,
    clock: Arc<dyn Clock>,
    send_timeout: Duration,
    queue_capacity: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        telegram: Arc<dyn TelegramTransport>,
        email: Arc<dyn EmailTransport>,
        signals: Arc<dyn DispatchStore>,
        preferences: Arc<dyn PreferencesSource>,
        clock: Arc<dyn Clock>,
        send_timeout: Duration,
        queue_capacity: usize,
    ) -> Self {
        Self {
            telegram,
            email,
            signals,
            preferences,
            clock,
            send_timeout,
            queue_capacity,
        }
    }

    /// Delivers all pending signals.
    ///
    /// # Errors
    /// Returns an error only when the signal store itself fails; delivery
    /// failures are counted in the report.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport> {
        let pending = self.signals.undispatched().await?;
        let mut report = DispatchReport::default();
        let mut budgets: HashMap<DeliveryChannel, usize> = HashMap::new();

        for signal in pending {
            report.signals_seen += 1;

            let Some(prefs) = self.preferences.preferences(signal.user_id).await? else {
                tracing::warn!("No preferences for user {}, leaving signal queued", signal.user_id);
                report.left_queued += 1;
                continue;
            };
            let prefs = prefs.as_ref();

            let statuses: HashMap<DeliveryChannel, DeliveryStatus> = self
                .signals
                .delivery_statuses(signal.id)
                .await?
                .into_iter()
                .collect();

            let mut all_terminal = true;

            for channel in &prefs.channels {
                let status = statuses
                    .get(channel)
                    .copied()
                    .unwrap_or(DeliveryStatus::Pending);
                if status != DeliveryStatus::Pending {
                    continue;
                }

                let used = budgets.entry(*channel).or_insert(0);
                if *used >= self.queue_capacity {
                    tracing::debug!(
                        "{} queue full, leaving {} for next cycle",
                        channel.as_str(),
                        signal.symbol
                    );
                    report.left_queued += 1;
                    all_terminal = false;
                    continue;
                }
                *used += 1;

                match self.deliver(&signal, prefs, *channel).await {
                    Ok(()) => {
                        self.signals
                            .record_delivery(signal.id, *channel, DeliveryStatus::Sent, None)
                            .await?;
                        report.deliveries_sent += 1;
                    }
                    Err(DispatchError::Retriable(e)) => {
                        tracing::info!(
                            "Retriable {} failure for {}: {}",
                            channel.as_str(),
                            signal.symbol,
                            e
                        );
                        report.retriable_failures += 1;
                        all_terminal = false;
                    }
                    Err(DispatchError::Permanent(e)) => {
                        tracing::warn!(
                            "Permanent {} failure for {}: {}",
                            channel.as_str(),
                            signal.symbol,
                            e
                        );
                        self.signals
                            .record_delivery(
                                signal.id,
                                *channel,
                                DeliveryStatus::Failed,
                                Some(&e),
                            )
                            .await?;
                        report.deliveries_failed += 1;
                    }
                }
            }

            if all_terminal {
                self.signals
                    .mark_dispatched(signal.id, self.clock.now())
                    .await?;
                report.signals_completed += 1;
            }
        }

        Ok(report)
    }

    /// Marks a session's still-queued deliveries expired; expired signals
    /// are not retried on later cycles.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn expire_session(&self, session_date: NaiveDate) -> Result<u64> {
        let expired = self.signals.expire_undispatched(session_date).await?;
        if expired > 0 {
            tracing::info!("Expired {} undelivered deliveries for {}", expired, session_date);
        }
        Ok(expired)
    }

    async fn deliver(
        &self,
        signal: &TradingSignalRecord,
        prefs: &UserPreferencesRecord,
        channel: DeliveryChannel,
    ) -> Result<(), DispatchError> {
        let send = async {
            match channel {
                DeliveryChannel::Telegram => {
                    let chat_id = prefs.telegram_chat_id.as_deref().ok_or_else(|| {
                        DispatchError::Permanent("user has no telegram chat id".to_string())
                    })?;
                    self.telegram
                        .send(chat_id, &telegram_text(signal))
                        .await
                        .map(|_| ())
                }
                DeliveryChannel::Email => {
                    let to = prefs.email.as_deref().ok_or_else(|| {
                        DispatchError::Permanent("user has no email address".to_string())
                    })?;
                    let (html, text) = email_bodies(signal);
                    self.email
                        .send(to, &email_subject(signal), &html, &text)
                        .await
                }
            }
        };

        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Retriable(format!(
                "{} send exceeded {}s",
                channel.as_str(),
                self.send_timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gpw_advisor_core::FixedClock;
    use gpw_advisor_data::{NewsImpact, Reason, SignalType};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    // ---- in-memory fakes ----

    struct FakeStore {
        signals: Mutex<Vec<TradingSignalRecord>>,
        statuses: Mutex<HashMap<(Uuid, DeliveryChannel), DeliveryStatus>>,
        dispatched: Mutex<Vec<Uuid>>,
    }

    impl FakeStore {
        fn with_signals(signals: Vec<TradingSignalRecord>) -> Arc<Self> {
            let statuses = signals
                .iter()
                .flat_map(|s| {
                    [
                        ((s.id, DeliveryChannel::Telegram), DeliveryStatus::Pending),
                        ((s.id, DeliveryChannel::Email), DeliveryStatus::Pending),
                    ]
                })
                .collect();
            Arc::new(Self {
                signals: Mutex::new(signals),
                statuses: Mutex::new(statuses),
                dispatched: Mutex::new(Vec::new()),
            })
        }

        fn status_of(&self, id: Uuid, channel: DeliveryChannel) -> DeliveryStatus {
            self.statuses
                .lock()
                .unwrap()
                .get(&(id, channel))
                .copied()
                .unwrap_or(DeliveryStatus::Pending)
        }

        fn set_status(&self, id: Uuid, channel: DeliveryChannel, status: DeliveryStatus) {
            self.statuses.lock().unwrap().insert((id, channel), status);
        }

        fn is_dispatched(&self, id: Uuid) -> bool {
            self.dispatched.lock().unwrap().contains(&id)
        }
    }

    #[async_trait]
    impl DispatchStore for FakeStore {
        async fn undispatched(&self) -> Result<Vec<TradingSignalRecord>> {
            let dispatched = self.dispatched.lock().unwrap().clone();
            Ok(self
                .signals
                .lock()
                .unwrap()
                .iter()
                .filter(|s| !dispatched.contains(&s.id))
                .cloned()
                .collect())
        }

        async fn delivery_statuses(
            &self,
            signal_id: Uuid,
        ) -> Result<Vec<(DeliveryChannel, DeliveryStatus)>> {
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .iter()
                .filter(|((id, _), _)| *id == signal_id)
                .map(|((_, channel), status)| (*channel, *status))
                .collect())
        }

        async fn record_delivery(
            &self,
            signal_id: Uuid,
            channel: DeliveryChannel,
            status: DeliveryStatus,
            _detail: Option<&str>,
        ) -> Result<()> {
            self.set_status(signal_id, channel, status);
            Ok(())
        }

        async fn mark_dispatched(&self, signal_id: Uuid, _at: DateTime<Utc>) -> Result<()> {
            self.dispatched.lock().unwrap().push(signal_id);
            Ok(())
        }

        async fn expire_undispatched(&self, _session_date: NaiveDate) -> Result<u64> {
            let mut expired = 0u64;
            for status in self.statuses.lock().unwrap().values_mut() {
                if *status == DeliveryStatus::Pending {
                    *status = DeliveryStatus::Expired;
                    expired += 1;
                }
            }
            Ok(expired)
        }
    }

    struct FakePreferences {
        users: HashMap<i64, Arc<UserPreferencesRecord>>,
    }

    #[async_trait]
    impl PreferencesSource for FakePreferences {
        async fn preferences(&self, user_id: i64) -> Result<Option<Arc<UserPreferencesRecord>>> {
            Ok(self.users.get(&user_id).cloned())
        }
    }

    enum TelegramScript {
        Succeed,
        FailRetriable,
        FailPermanent,
    }

    struct FakeTelegram {
        script: TelegramScript,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TelegramTransport for FakeTelegram {
        async fn send(&self, _chat_id: &str, text: &str) -> Result<i64, DispatchError> {
            match self.script {
                TelegramScript::Succeed => {
                    self.sent.lock().unwrap().push(text.to_string());
                    Ok(4711)
                }
                TelegramScript::FailRetriable => {
                    Err(DispatchError::Retriable("flood wait".to_string()))
                }
                TelegramScript::FailPermanent => {
                    Err(DispatchError::Permanent("chat not found".to_string()))
                }
            }
        }
    }

    struct FakeEmail {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailTransport for FakeEmail {
        async fn send(
            &self,
            _to: &str,
            subject: &str,
            _html: &str,
            _text: &str,
        ) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    // ---- fixtures ----

    fn signal(user_id: i64) -> TradingSignalRecord {
        TradingSignalRecord {
            id: Uuid::new_v4(),
            user_id,
            symbol: "CDR".to_string(),
            session_date: NaiveDate::from_ymd_opt(2025, 6, 9).unwrap(),
            created_at: Utc.with_ymd_and_hms(2025, 6, 9, 7, 30, 0).unwrap(),
            signal_type: SignalType::Buy,
            confidence: dec!(82),
            price_at_signal: dec!(265.20),
            target_price: Some(dec!(273.1560)),
            stop_loss_price: Some(dec!(259.8960)),
            position_size: Some(10),
            reason: Reason::InsufficientData,
            news_impact: NewsImpact::None,
            modified_by_news: false,
            is_dispatched: false,
            dispatched_at: None,
            outcome: None,
            is_active: true,
        }
    }

    fn prefs_with_channels(user_id: i64, channels: Vec<DeliveryChannel>) -> FakePreferences {
        let mut prefs = UserPreferencesRecord::default_for(user_id);
        prefs.channels = channels;
        prefs.telegram_chat_id = Some("12345".to_string());
        prefs.email = Some("user@example.pl".to_string());

        let mut users = HashMap::new();
        users.insert(user_id, Arc::new(prefs));
        FakePreferences { users }
    }

    fn dispatcher(
        store: Arc<FakeStore>,
        preferences: FakePreferences,
        script: TelegramScript,
        queue_capacity: usize,
    ) -> (Dispatcher, Arc<FakeTelegram>, Arc<FakeEmail>) {
        let telegram = Arc::new(FakeTelegram {
            script,
            sent: Mutex::new(Vec::new()),
        });
        let email = Arc::new(FakeEmail {
            sent: Mutex::new(Vec::new()),
        });
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 6, 9, 8, 0, 0).unwrap(),
        ));

        let dispatcher = Dispatcher::new(
            telegram.clone(),
            email.clone(),
            store,
            Arc::new(preferences),
            clock,
            Duration::from_secs(5),
            queue_capacity,
        );
        (dispatcher, telegram, email)
    }

    // ---- dispatch loop ----

    #[tokio::test]
    async fn successful_delivery_on_all_channels_completes_signal() {
        let s = signal(7);
        let id = s.id;
        let store = FakeStore::with_signals(vec![s]);
        let (dispatcher, telegram, email) = dispatcher(
            store.clone(),
            prefs_with_channels(7, vec![DeliveryChannel::Telegram, DeliveryChannel::Email]),
            TelegramScript::Succeed,
            64,
        );

        let report = dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(report.signals_seen, 1);
        assert_eq!(report.deliveries_sent, 2);
        assert_eq!(report.signals_completed, 1);
        assert_eq!(store.status_of(id, DeliveryChannel::Telegram), DeliveryStatus::Sent);
        assert_eq!(store.status_of(id, DeliveryChannel::Email), DeliveryStatus::Sent);
        assert!(store.is_dispatched(id));
        assert_eq!(telegram.sent.lock().unwrap().len(), 1);
        assert_eq!(email.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retriable_failure_leaves_signal_queued() {
        let s = signal(7);
        let id = s.id;
        let store = FakeStore::with_signals(vec![s]);
        let (dispatcher, _, _) = dispatcher(
            store.clone(),
            prefs_with_channels(7, vec![DeliveryChannel::Telegram]),
            TelegramScript::FailRetriable,
            64,
        );

        let report = dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(report.retriable_failures, 1);
        assert_eq!(report.signals_completed, 0);
        // The channel stays pending and the signal stays undispatched so
        // the next cycle retries.
        assert_eq!(store.status_of(id, DeliveryChannel::Telegram), DeliveryStatus::Pending);
        assert!(!store.is_dispatched(id));

        // One retry per channel per cycle: the next cycle attempts again.
        let second = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(second.signals_seen, 1);
        assert_eq!(second.retriable_failures, 1);
    }

    #[tokio::test]
    async fn permanent_failure_marks_failed_and_completes() {
        let s = signal(7);
        let id = s.id;
        let store = FakeStore::with_signals(vec![s]);
        let (dispatcher, _, _) = dispatcher(
            store.clone(),
            prefs_with_channels(7, vec![DeliveryChannel::Telegram]),
            TelegramScript::FailPermanent,
            64,
        );

        let report = dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(report.deliveries_failed, 1);
        assert_eq!(report.signals_completed, 1);
        assert_eq!(store.status_of(id, DeliveryChannel::Telegram), DeliveryStatus::Failed);
        // Failed is terminal: the signal is marked dispatched and never
        // retried.
        assert!(store.is_dispatched(id));
    }

    #[tokio::test]
    async fn already_sent_channel_is_not_resent() {
        let s = signal(7);
        let id = s.id;
        let store = FakeStore::with_signals(vec![s]);
        store.set_status(id, DeliveryChannel::Telegram, DeliveryStatus::Sent);

        let (dispatcher, telegram, _) = dispatcher(
            store.clone(),
            prefs_with_channels(7, vec![DeliveryChannel::Telegram]),
            TelegramScript::Succeed,
            64,
        );

        let report = dispatcher.dispatch_pending().await.unwrap();

        // Idempotence by (signal, channel): nothing is sent again, the
        // signal just gets its dispatched flag.
        assert_eq!(report.deliveries_sent, 0);
        assert_eq!(report.signals_completed, 1);
        assert!(telegram.sent.lock().unwrap().is_empty());
        assert!(store.is_dispatched(id));
    }

    #[tokio::test]
    async fn queue_budget_defers_excess_signals() {
        let first = signal(7);
        let second = signal(7);
        let second_id = second.id;
        let store = FakeStore::with_signals(vec![first, second]);

        let (dispatcher, telegram, _) = dispatcher(
            store.clone(),
            prefs_with_channels(7, vec![DeliveryChannel::Telegram]),
            TelegramScript::Succeed,
            1,
        );

        let report = dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(report.deliveries_sent, 1);
        assert_eq!(report.left_queued, 1);
        assert_eq!(report.signals_completed, 1);
        assert_eq!(telegram.sent.lock().unwrap().len(), 1);
        assert!(!store.is_dispatched(second_id));

        // The deferred signal goes out on the next cycle.
        let second_cycle = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(second_cycle.deliveries_sent, 1);
        assert!(store.is_dispatched(second_id));
    }

    #[tokio::test]
    async fn unknown_user_leaves_signal_queued() {
        let s = signal(99);
        let id = s.id;
        let store = FakeStore::with_signals(vec![s]);
        let (dispatcher, _, _) = dispatcher(
            store.clone(),
            prefs_with_channels(7, vec![DeliveryChannel::Telegram]),
            TelegramScript::Succeed,
            64,
        );

        let report = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(report.left_queued, 1);
        assert!(!store.is_dispatched(id));
    }

    #[tokio::test]
    async fn expire_session_flips_pending_deliveries() {
        let s = signal(7);
        let id = s.id;
        let store = FakeStore::with_signals(vec![s]);
        let (dispatcher, _, _) = dispatcher(
            store.clone(),
            prefs_with_channels(7, vec![DeliveryChannel::Telegram]),
            TelegramScript::Succeed,
            64,
        );

        let expired = dispatcher
            .expire_session(NaiveDate::from_ymd_opt(2025, 6, 9).unwrap())
            .await
            .unwrap();

        assert_eq!(expired, 2);
        assert_eq!(store.status_of(id, DeliveryChannel::Telegram), DeliveryStatus::Expired);
    }

    #[test]
    fn report_defaults_to_zero() {
        let report = DispatchReport::default();
        assert_eq!(report.signals_seen, 0);
        assert_eq!(report.deliveries_sent, 0);
        assert_eq!(report.left_queued, 0);
    }
}
