//! User preferences repository with a read-through TTL cache.
//!
//! Preferences are read on every signal cycle but change rarely; reads go
//! through an in-process cache with a 5-minute TTL that is invalidated on
//! explicit user-update notifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::models::{DeliveryChannel, TradingStyle, UserPreferencesRecord};

/// Default time-to-live for cached preference reads.
pub const PREFERENCES_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct PreferencesRow {
    user_id: i64,
    available_capital: Decimal,
    target_profit_pct: Decimal,
    max_loss_pct: Decimal,
    min_confidence_threshold: Decimal,
    max_position_size_pct: Decimal,
    min_position_value: Decimal,
    min_daily_volume: i64,
    trading_style: String,
    channels: Vec<String>,
    max_signals_per_day: i64,
    daily_summary_opt_in: bool,
    telegram_chat_id: Option<String>,
    email: Option<String>,
    is_active: bool,
}

impl TryFrom<PreferencesRow> for UserPreferencesRecord {
    type Error = anyhow::Error;

    fn try_from(row: PreferencesRow) -> Result<Self> {
        Ok(Self {
            user_id: row.user_id,
            available_capital: row.available_capital,
            target_profit_pct: row.target_profit_pct,
            max_loss_pct: row.max_loss_pct,
            min_confidence_threshold: row.min_confidence_threshold,
            max_position_size_pct: row.max_position_size_pct,
            min_position_value: row.min_position_value,
            min_daily_volume: row.min_daily_volume,
            trading_style: parse_style(&row.trading_style)?,
            channels: row
                .channels
                .iter()
                .map(|c| parse_channel(c))
                .collect::<Result<_>>()?,
            max_signals_per_day: row.max_signals_per_day,
            daily_summary_opt_in: row.daily_summary_opt_in,
            telegram_chat_id: row.telegram_chat_id,
            email: row.email,
            is_active: row.is_active,
        })
    }
}

const PREFERENCES_COLUMNS: &str = "user_id, available_capital, target_profit_pct, max_loss_pct, \
     min_confidence_threshold, max_position_size_pct, min_position_value, min_daily_volume, \
     trading_style, channels, max_signals_per_day, daily_summary_opt_in, telegram_chat_id, \
     email, is_active";

impl UserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Preferences of all active users.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn active_users(&self) -> Result<Vec<UserPreferencesRecord>> {
        let rows = sqlx::query_as::<_, PreferencesRow>(&format!(
            r"
            SELECT {PREFERENCES_COLUMNS}
            FROM user_preferences
            WHERE is_active
            ORDER BY user_id
            "
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query active users")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Preferences for one user.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn preferences(&self, user_id: i64) -> Result<Option<UserPreferencesRecord>> {
        let row = sqlx::query_as::<_, PreferencesRow>(&format!(
            r"
            SELECT {PREFERENCES_COLUMNS}
            FROM user_preferences
            WHERE user_id = $1 AND is_active
            "
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query preferences")?;

        row.map(TryInto::try_into).transpose()
    }
}

fn parse_style(raw: &str) -> Result<TradingStyle> {
    match raw {
        "conservative" => Ok(TradingStyle::Conservative),
        "moderate" => Ok(TradingStyle::Moderate),
        "aggressive" => Ok(TradingStyle::Aggressive),
        "scalping" => Ok(TradingStyle::Scalping),
        "swing" => Ok(TradingStyle::Swing),
        other => anyhow::bail!("Unknown trading style in store: {other}"),
    }
}

fn parse_channel(raw: &str) -> Result<DeliveryChannel> {
    match raw {
        "telegram" => Ok(DeliveryChannel::Telegram),
        "email" => Ok(DeliveryChannel::Email),
        other => anyhow::bail!("Unknown channel in store: {other}"),
    }
}

/// In-process preference cache with TTL expiry and explicit invalidation.
pub struct PreferencesCache {
    repo: UserRepository,
    ttl: Duration,
    entries: RwLock<HashMap<i64, (Instant, Arc<UserPreferencesRecord>)>>,
}

impl PreferencesCache {
    #[must_use]
    pub fn new(repo: UserRepository) -> Self {
        Self {
            repo,
            ttl: PREFERENCES_TTL,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Cached preferences, fetching on miss or expiry.
    ///
    /// # Errors
    /// Returns an error if the underlying read fails.
    pub async fn get(&self, user_id: i64) -> Result<Option<Arc<UserPreferencesRecord>>> {
        {
            let entries = self.entries.read().await;
            if let Some((inserted, prefs)) = entries.get(&user_id) {
                if inserted.elapsed() < self.ttl {
                    return Ok(Some(Arc::clone(prefs)));
                }
            }
        }

        let Some(prefs) = self.repo.preferences(user_id).await? else {
            return Ok(None);
        };
        let prefs = Arc::new(prefs);

        let mut entries = self.entries.write().await;
        entries.insert(user_id, (Instant::now(), Arc::clone(&prefs)));
        Ok(Some(prefs))
    }

    /// Drops a cached entry after an explicit user update notification.
    pub async fn invalidate(&self, user_id: i64) {
        self.entries.write().await.remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn style_parsing_round_trips() {
        for (raw, style) in [
            ("conservative", TradingStyle::Conservative),
            ("moderate", TradingStyle::Moderate),
            ("aggressive", TradingStyle::Aggressive),
            ("scalping", TradingStyle::Scalping),
            ("swing", TradingStyle::Swing),
        ] {
            assert_eq!(parse_style(raw).unwrap(), style);
        }
        assert!(parse_style("yolo").is_err());
    }

    #[test]
    fn row_conversion_maps_channels() {
        let row = PreferencesRow {
            user_id: 7,
            available_capital: dec!(25000),
            target_profit_pct: dec!(3.0),
            max_loss_pct: dec!(2.0),
            min_confidence_threshold: dec!(60),
            max_position_size_pct: dec!(10),
            min_position_value: dec!(500),
            min_daily_volume: 10_000,
            trading_style: "moderate".to_string(),
            channels: vec!["telegram".to_string(), "email".to_string()],
            max_signals_per_day: 5,
            daily_summary_opt_in: false,
            telegram_chat_id: Some("12345".to_string()),
            email: Some("user@example.pl".to_string()),
            is_active: true,
        };

        let prefs: UserPreferencesRecord = row.try_into().unwrap();
        assert_eq!(prefs.user_id, 7);
        assert!(prefs.has_channel(DeliveryChannel::Telegram));
        assert!(prefs.has_channel(DeliveryChannel::Email));
    }

    #[test]
    fn row_conversion_rejects_unknown_channel() {
        let row = PreferencesRow {
            user_id: 7,
            available_capital: dec!(25000),
            target_profit_pct: dec!(3.0),
            max_loss_pct: dec!(2.0),
            min_confidence_threshold: dec!(60),
            max_position_size_pct: dec!(10),
            min_position_value: dec!(500),
            min_daily_volume: 10_000,
            trading_style: "moderate".to_string(),
            channels: vec!["pigeon".to_string()],
            max_signals_per_day: 5,
            daily_summary_opt_in: false,
            telegram_chat_id: None,
            email: None,
            is_active: true,
        };

        let converted: Result<UserPreferencesRecord> = row.try_into();
        assert!(converted.is_err());
    }
}
