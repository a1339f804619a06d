//! Trading signal, outcome, and delivery models.
//!
//! A signal is produced once by the generator, dispatched at most once per
//! channel, and resolved at most once. Resolved fields are write-once.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gpw_advisor_core::EngineError;

use super::news::ImpactLevel;

/// Advisory action carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Hold => Self::Hold,
        }
    }

    #[must_use]
    pub const fn is_actionable(self) -> bool {
        !matches!(self, Self::Hold)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }
}

/// Structured explanation of why a signal was emitted.
///
/// Persisted as a discriminated JSON column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    /// Not enough bars to evaluate the indicator set.
    InsufficientData,
    /// Pure technical consensus.
    TechnicalVotes {
        bullish: Vec<String>,
        bearish: Vec<String>,
    },
    /// Technical consensus adjusted (boosted, vetoed, or flipped) by news.
    NewsAdjusted {
        bullish: Vec<String>,
        bearish: Vec<String>,
        adjustment: String,
        weighted_sentiment: f64,
        impact: ImpactLevel,
    },
    /// Forced hold: confidence below the user threshold.
    BelowThreshold { confidence: Decimal, threshold: Decimal },
    /// Forced hold: past the last-entry cutoff.
    EntryWindowClosed,
    /// Forced hold: stock failed the eligibility filter.
    NotEligible { detail: String },
}

impl Reason {
    /// Short token used in rendered messages and log lines.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient_data",
            Self::TechnicalVotes { .. } => "technical_votes",
            Self::NewsAdjusted { adjustment, .. } => {
                if adjustment == "news_veto" {
                    "news_veto"
                } else {
                    "news_adjusted"
                }
            }
            Self::BelowThreshold { .. } => "below_threshold",
            Self::EntryWindowClosed => "entry_window_closed",
            Self::NotEligible { .. } => "not_eligible",
        }
    }
}

/// Snapshot of the news aggregate that influenced a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NewsImpact {
    None,
    Aggregate {
        weighted_sentiment: f64,
        total_weight: f64,
        article_count: usize,
        momentum: f64,
        impact: ImpactLevel,
    },
}

/// How a resolved signal exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    TargetHit,
    StopHit,
    ClosedAtSessionEnd,
    Cancelled,
}

/// Write-once realised outcome of a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub resolution: Resolution,
    pub exit_price: Decimal,
    pub exit_at: DateTime<Utc>,
    /// Signed by signal type: positive when the advisory direction paid off.
    pub realised_return_pct: Decimal,
    pub holding_minutes: i64,
}

/// A generated advisory signal for one `(user, stock)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignalRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub symbol: String,
    pub session_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub signal_type: SignalType,
    /// Integer percentage in [0, 100].
    pub confidence: Decimal,
    pub price_at_signal: Decimal,
    pub target_price: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
    /// Whole shares; positions are never fractional.
    pub position_size: Option<i64>,
    pub reason: Reason,
    pub news_impact: NewsImpact,
    pub modified_by_news: bool,
    pub is_dispatched: bool,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub outcome: Option<SignalOutcome>,
    pub is_active: bool,
}

impl TradingSignalRecord {
    /// Validates the risk envelope against the signal type.
    ///
    /// # Errors
    /// Returns an invariant violation unless buy targets sit above entry
    /// with the stop below (mirrored for sell), and holds carry no envelope.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.signal_type {
            SignalType::Buy => {
                let (target, stop) = self.envelope()?;
                if !(target > self.price_at_signal && self.price_at_signal > stop) {
                    return Err(EngineError::InvariantViolation(format!(
                        "buy {} requires target {} > entry {} > stop {}",
                        self.symbol, target, self.price_at_signal, stop
                    )));
                }
            }
            SignalType::Sell => {
                let (target, stop) = self.envelope()?;
                if !(target < self.price_at_signal && self.price_at_signal < stop) {
                    return Err(EngineError::InvariantViolation(format!(
                        "sell {} requires target {} < entry {} < stop {}",
                        self.symbol, target, self.price_at_signal, stop
                    )));
                }
            }
            SignalType::Hold => {
                if self.target_price.is_some() || self.stop_loss_price.is_some() {
                    return Err(EngineError::InvariantViolation(format!(
                        "hold {} must not carry a risk envelope",
                        self.symbol
                    )));
                }
            }
        }
        Ok(())
    }

    fn envelope(&self) -> Result<(Decimal, Decimal), EngineError> {
        match (self.target_price, self.stop_loss_price) {
            (Some(t), Some(s)) => Ok((t, s)),
            _ => Err(EngineError::InvariantViolation(format!(
                "{} {} missing target or stop",
                self.signal_type.as_str(),
                self.symbol
            ))),
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Notification channel for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Telegram,
    Email,
}

impl DeliveryChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Email => "email",
        }
    }
}

/// Terminal or pending state of one `(signal, channel)` delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Expired,
}

/// Per-channel delivery bookkeeping; dispatch idempotence key is
/// `(signal_id, channel)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDeliveryRecord {
    pub signal_id: Uuid,
    pub channel: DeliveryChannel,
    pub status: DeliveryStatus,
    pub attempted_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base_signal(signal_type: SignalType) -> TradingSignalRecord {
        TradingSignalRecord {
            id: Uuid::new_v4(),
            user_id: 1,
            symbol: "CDR".to_string(),
            session_date: NaiveDate::from_ymd_opt(2025, 6, 9).unwrap(),
            created_at: Utc.with_ymd_and_hms(2025, 6, 9, 7, 30, 0).unwrap(),
            signal_type,
            confidence: dec!(82),
            price_at_signal: dec!(265.20),
            target_price: None,
            stop_loss_price: None,
            position_size: None,
            reason: Reason::InsufficientData,
            news_impact: NewsImpact::None,
            modified_by_news: false,
            is_dispatched: false,
            dispatched_at: None,
            outcome: None,
            is_active: true,
        }
    }

    #[test]
    fn buy_envelope_must_bracket_entry() {
        let mut signal = base_signal(SignalType::Buy);
        signal.target_price = Some(dec!(273.1560));
        signal.stop_loss_price = Some(dec!(259.8960));
        assert!(signal.validate().is_ok());

        signal.target_price = Some(dec!(260.00));
        assert!(signal.validate().is_err());
    }

    #[test]
    fn sell_envelope_is_mirrored() {
        let mut signal = base_signal(SignalType::Sell);
        signal.price_at_signal = dec!(86.91);
        signal.target_price = Some(dec!(84.30));
        signal.stop_loss_price = Some(dec!(88.65));
        assert!(signal.validate().is_ok());

        signal.stop_loss_price = Some(dec!(84.00));
        assert!(signal.validate().is_err());
    }

    #[test]
    fn hold_must_not_carry_envelope() {
        let mut signal = base_signal(SignalType::Hold);
        assert!(signal.validate().is_ok());

        signal.target_price = Some(dec!(270));
        assert!(signal.validate().is_err());
    }

    #[test]
    fn actionable_signal_without_envelope_rejected() {
        let signal = base_signal(SignalType::Buy);
        assert!(signal.validate().is_err());
    }

    #[test]
    fn opposite_direction() {
        assert_eq!(SignalType::Buy.opposite(), SignalType::Sell);
        assert_eq!(SignalType::Sell.opposite(), SignalType::Buy);
        assert_eq!(SignalType::Hold.opposite(), SignalType::Hold);
    }

    #[test]
    fn reason_labels() {
        assert_eq!(Reason::InsufficientData.label(), "insufficient_data");
        let veto = Reason::NewsAdjusted {
            bullish: vec![],
            bearish: vec![],
            adjustment: "news_veto".to_string(),
            weighted_sentiment: -0.72,
            impact: ImpactLevel::VeryHigh,
        };
        assert_eq!(veto.label(), "news_veto");
    }

    #[test]
    fn reason_round_trips_as_tagged_json() {
        let reason = Reason::TechnicalVotes {
            bullish: vec!["rsi_oversold".to_string()],
            bearish: vec![],
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"kind\":\"technical_votes\""));

        let back: Reason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }

    #[test]
    fn resolution_serialises_snake_case() {
        let json = serde_json::to_string(&Resolution::ClosedAtSessionEnd).unwrap();
        assert_eq!(json, "\"closed_at_session_end\"");
    }
}
