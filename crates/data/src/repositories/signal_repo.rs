//! Trading signal repository.
//!
//! Two paths are transactional by contract: inserting a non-hold signal
//! together with its delivery records (superseding any opposite-direction
//! open signal), and attaching an outcome together with the resolved flag.
//! The supersede path serialises per `(user, stock, session)` with a row
//! lock so invariant 3 (at most one open non-hold signal) holds under
//! concurrency.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    DeliveryChannel, DeliveryStatus, Resolution, SignalOutcome, SignalType, TradingSignalRecord,
};

/// Result of attempting to persist a non-hold signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Signal stored; no prior open signal existed.
    Inserted,
    /// A same-direction open signal already exists; nothing stored.
    DuplicateOpen,
    /// An opposite-direction open signal was finalised as cancelled and
    /// the new signal stored.
    Superseded { previous: Uuid },
}

#[derive(Debug, Clone)]
pub struct SignalRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: Uuid,
    user_id: i64,
    symbol: String,
    session_date: NaiveDate,
    created_at: DateTime<Utc>,
    signal_type: String,
    confidence: Decimal,
    price_at_signal: Decimal,
    target_price: Option<Decimal>,
    stop_loss_price: Option<Decimal>,
    position_size: Option<i64>,
    reason: JsonValue,
    news_impact: JsonValue,
    modified_by_news: bool,
    is_dispatched: bool,
    dispatched_at: Option<DateTime<Utc>>,
    resolution: Option<String>,
    exit_price: Option<Decimal>,
    exit_at: Option<DateTime<Utc>>,
    realised_return_pct: Option<Decimal>,
    holding_minutes: Option<i64>,
    is_active: bool,
}

impl TryFrom<SignalRow> for TradingSignalRecord {
    type Error = anyhow::Error;

    fn try_from(row: SignalRow) -> Result<Self> {
        let outcome = match (&row.resolution, row.exit_price, row.exit_at) {
            (Some(resolution), Some(exit_price), Some(exit_at)) => Some(SignalOutcome {
                resolution: parse_resolution(resolution)?,
                exit_price,
                exit_at,
                realised_return_pct: row.realised_return_pct.unwrap_or_default(),
                holding_minutes: row.holding_minutes.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            symbol: row.symbol,
            session_date: row.session_date,
            created_at: row.created_at,
            signal_type: parse_signal_type(&row.signal_type)?,
            confidence: row.confidence,
            price_at_signal: row.price_at_signal,
            target_price: row.target_price,
            stop_loss_price: row.stop_loss_price,
            position_size: row.position_size,
            reason: serde_json::from_value(row.reason).context("Corrupt reason column")?,
            news_impact: serde_json::from_value(row.news_impact)
                .context("Corrupt news_impact column")?,
            modified_by_news: row.modified_by_news,
            is_dispatched: row.is_dispatched,
            dispatched_at: row.dispatched_at,
            outcome,
            is_active: row.is_active,
        })
    }
}

const SIGNAL_COLUMNS: &str = "id, user_id, symbol, session_date, created_at, signal_type, \
     confidence, price_at_signal, target_price, stop_loss_price, position_size, reason, \
     news_impact, modified_by_news, is_dispatched, dispatched_at, resolution, exit_price, \
     exit_at, realised_return_pct, holding_minutes, is_active";

impl SignalRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persists a signal, enforcing the open-signal invariant for non-holds.
    ///
    /// For non-hold signals the delivery records for the given channels are
    /// initialised in the same transaction. A same-direction open signal
    /// rejects the insert; an opposite-direction open signal is finalised
    /// as `cancelled` at the new signal's entry price.
    ///
    /// # Errors
    /// Returns an error if the signal fails validation or the transaction
    /// fails.
    pub async fn insert_with_supersede(
        &self,
        signal: &TradingSignalRecord,
        channels: &[DeliveryChannel],
    ) -> Result<InsertOutcome> {
        signal.validate()?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let mut superseded: Option<Uuid> = None;

        if signal.signal_type.is_actionable() {
            let open: Option<(Uuid, String, Decimal, DateTime<Utc>)> = sqlx::query_as(
                r"
                SELECT id, signal_type, price_at_signal, created_at
                FROM trading_signals
                WHERE user_id = $1 AND symbol = $2 AND session_date = $3
                  AND signal_type IN ('buy', 'sell')
                  AND resolution IS NULL AND is_active
                FOR UPDATE
                ",
            )
            .bind(signal.user_id)
            .bind(&signal.symbol)
            .bind(signal.session_date)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock open signal")?;

            if let Some((prev_id, prev_type, prev_entry, prev_created)) = open {
                let prev_type = parse_signal_type(&prev_type)?;
                if prev_type == signal.signal_type {
                    tx.rollback().await.ok();
                    return Ok(InsertOutcome::DuplicateOpen);
                }

                let outcome = cancellation_outcome(
                    prev_type,
                    prev_entry,
                    signal.price_at_signal,
                    prev_created,
                    signal.created_at,
                );
                apply_outcome(&mut tx, prev_id, &outcome).await?;
                superseded = Some(prev_id);
            }
        }

        sqlx::query(
            r"
            INSERT INTO trading_signals
                (id, user_id, symbol, session_date, created_at, signal_type, confidence,
                 price_at_signal, target_price, stop_loss_price, position_size, reason,
                 news_impact, modified_by_news, is_dispatched, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, FALSE, TRUE)
            ",
        )
        .bind(signal.id)
        .bind(signal.user_id)
        .bind(&signal.symbol)
        .bind(signal.session_date)
        .bind(signal.created_at)
        .bind(signal.signal_type.as_str())
        .bind(signal.confidence)
        .bind(signal.price_at_signal)
        .bind(signal.target_price)
        .bind(signal.stop_loss_price)
        .bind(signal.position_size)
        .bind(serde_json::to_value(&signal.reason).context("Failed to serialise reason")?)
        .bind(
            serde_json::to_value(&signal.news_impact)
                .context("Failed to serialise news impact")?,
        )
        .bind(signal.modified_by_news)
        .execute(&mut *tx)
        .await
        .context("Failed to insert signal")?;

        if signal.signal_type.is_actionable() {
            for channel in channels {
                sqlx::query(
                    r"
                    INSERT INTO signal_deliveries (signal_id, channel, status)
                    VALUES ($1, $2, 'pending')
                    ON CONFLICT (signal_id, channel) DO NOTHING
                    ",
                )
                .bind(signal.id)
                .bind(channel.as_str())
                .execute(&mut *tx)
                .await
                .context("Failed to initialise delivery record")?;
            }
        }

        tx.commit().await.context("Failed to commit transaction")?;

        Ok(match superseded {
            Some(previous) => InsertOutcome::Superseded { previous },
            None => InsertOutcome::Inserted,
        })
    }

    /// Attaches an outcome and the resolved flag atomically.
    ///
    /// Resolution is write-once: an already-resolved signal is left
    /// untouched and `false` is returned.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn attach_outcome(&self, signal_id: Uuid, outcome: &SignalOutcome) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let applied = apply_outcome(&mut tx, signal_id, outcome).await?;
        tx.commit().await.context("Failed to commit transaction")?;
        Ok(applied)
    }

    /// Non-hold signals that are not yet resolved.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn open_unresolved(&self) -> Result<Vec<TradingSignalRecord>> {
        let rows = sqlx::query_as::<_, SignalRow>(&format!(
            r"
            SELECT {SIGNAL_COLUMNS}
            FROM trading_signals
            WHERE signal_type IN ('buy', 'sell')
              AND resolution IS NULL AND is_active
            ORDER BY created_at ASC
            "
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query open signals")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Non-hold signals awaiting dispatch.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn undispatched(&self) -> Result<Vec<TradingSignalRecord>> {
        let rows = sqlx::query_as::<_, SignalRow>(&format!(
            r"
            SELECT {SIGNAL_COLUMNS}
            FROM trading_signals
            WHERE signal_type IN ('buy', 'sell')
              AND NOT is_dispatched AND is_active
            ORDER BY created_at ASC
            "
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query undispatched signals")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Marks a signal dispatched.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_dispatched(&self, signal_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE trading_signals
            SET is_dispatched = TRUE, dispatched_at = $2
            WHERE id = $1 AND NOT is_dispatched
            ",
        )
        .bind(signal_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("Failed to mark signal dispatched")?;
        Ok(())
    }

    /// Current delivery status per channel for a signal.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn delivery_statuses(
        &self,
        signal_id: Uuid,
    ) -> Result<Vec<(DeliveryChannel, DeliveryStatus)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r"
            SELECT channel, status
            FROM signal_deliveries
            WHERE signal_id = $1
            ",
        )
        .bind(signal_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query delivery statuses")?;

        rows.into_iter()
            .map(|(channel, status)| Ok((parse_channel(&channel)?, parse_status(&status)?)))
            .collect()
    }

    /// Records a delivery attempt result for one `(signal, channel)`.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn record_delivery(
        &self,
        signal_id: Uuid,
        channel: DeliveryChannel,
        status: DeliveryStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE signal_deliveries
            SET status = $3, attempted_at = NOW(), detail = $4
            WHERE signal_id = $1 AND channel = $2
            ",
        )
        .bind(signal_id)
        .bind(channel.as_str())
        .bind(status_str(status))
        .bind(detail)
        .execute(&self.pool)
        .await
        .context("Failed to record delivery")?;
        Ok(())
    }

    /// Number of actionable signals created for a user on a session date.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn actionable_count_today(
        &self,
        user_id: i64,
        session_date: NaiveDate,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM trading_signals
            WHERE user_id = $1 AND session_date = $2
              AND signal_type IN ('buy', 'sell') AND is_active
            ",
        )
        .bind(user_id)
        .bind(session_date)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count actionable signals")?;

        Ok(row.0)
    }

    /// Marks all pending deliveries of a session's undispatched signals as
    /// expired. Run at session close; expired signals are not retried.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn expire_undispatched(&self, session_date: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE signal_deliveries d
            SET status = 'expired'
            FROM trading_signals s
            WHERE d.signal_id = s.id
              AND d.status = 'pending'
              AND s.session_date = $1
              AND NOT s.is_dispatched
            ",
        )
        .bind(session_date)
        .execute(&self.pool)
        .await
        .context("Failed to expire undispatched signals")?;

        Ok(result.rows_affected())
    }
}

/// Builds the cancellation outcome used when a signal is superseded.
#[must_use]
pub fn cancellation_outcome(
    prev_type: SignalType,
    prev_entry: Decimal,
    current_price: Decimal,
    prev_created: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SignalOutcome {
    SignalOutcome {
        resolution: Resolution::Cancelled,
        exit_price: current_price,
        exit_at: now,
        realised_return_pct: signed_return_pct(prev_type, prev_entry, current_price),
        holding_minutes: (now - prev_created).num_minutes(),
    }
}

/// Realised return percentage, signed by signal direction.
#[must_use]
pub fn signed_return_pct(signal_type: SignalType, entry: Decimal, exit: Decimal) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    let raw = (exit - entry) / entry * Decimal::ONE_HUNDRED;
    let signed = match signal_type {
        SignalType::Sell => -raw,
        _ => raw,
    };
    signed.round_dp_with_strategy(4, rust_decimal::RoundingStrategy::MidpointNearestEven)
}

async fn apply_outcome(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    signal_id: Uuid,
    outcome: &SignalOutcome,
) -> Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE trading_signals
        SET resolution = $2, exit_price = $3, exit_at = $4,
            realised_return_pct = $5, holding_minutes = $6
        WHERE id = $1 AND resolution IS NULL
        ",
    )
    .bind(signal_id)
    .bind(resolution_str(outcome.resolution))
    .bind(outcome.exit_price)
    .bind(outcome.exit_at)
    .bind(outcome.realised_return_pct)
    .bind(outcome.holding_minutes)
    .execute(&mut **tx)
    .await
    .context("Failed to attach outcome")?;

    Ok(result.rows_affected() > 0)
}

fn parse_signal_type(raw: &str) -> Result<SignalType> {
    match raw {
        "buy" => Ok(SignalType::Buy),
        "sell" => Ok(SignalType::Sell),
        "hold" => Ok(SignalType::Hold),
        other => anyhow::bail!("Unknown signal type in store: {other}"),
    }
}

fn parse_resolution(raw: &str) -> Result<Resolution> {
    match raw {
        "target_hit" => Ok(Resolution::TargetHit),
        "stop_hit" => Ok(Resolution::StopHit),
        "closed_at_session_end" => Ok(Resolution::ClosedAtSessionEnd),
        "cancelled" => Ok(Resolution::Cancelled),
        other => anyhow::bail!("Unknown resolution in store: {other}"),
    }
}

fn resolution_str(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::TargetHit => "target_hit",
        Resolution::StopHit => "stop_hit",
        Resolution::ClosedAtSessionEnd => "closed_at_session_end",
        Resolution::Cancelled => "cancelled",
    }
}

fn parse_channel(raw: &str) -> Result<DeliveryChannel> {
    match raw {
        "telegram" => Ok(DeliveryChannel::Telegram),
        "email" => Ok(DeliveryChannel::Email),
        other => anyhow::bail!("Unknown delivery channel in store: {other}"),
    }
}

fn parse_status(raw: &str) -> Result<DeliveryStatus> {
    match raw {
        "pending" => Ok(DeliveryStatus::Pending),
        "sent" => Ok(DeliveryStatus::Sent),
        "failed" => Ok(DeliveryStatus::Failed),
        "expired" => Ok(DeliveryStatus::Expired),
        other => anyhow::bail!("Unknown delivery status in store: {other}"),
    }
}

fn status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Sent => "sent",
        DeliveryStatus::Failed => "failed",
        DeliveryStatus::Expired => "expired",
    }
}
