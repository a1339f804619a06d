//! Per-user signal generation.
//!
//! The pipeline is: eligibility filter, technical vote candidate, news
//! adjustment, preference filter, entry-window filter, risk envelope.
//! Everything here is pure given its inputs; persistence and the
//! supersede path live in the signal repository.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use gpw_advisor_core::position_sizing::{position_value, shares_for_value};
use gpw_advisor_core::{EngineError, SignalProfile, TradingSession};
use gpw_advisor_data::{
    ImpactLevel, NewsImpact, Reason, SignalType, StockRecord, TradingSignalRecord,
    UserPreferencesRecord, PRICE_SCALE,
};
use gpw_advisor_indicators::{IndicatorValue, VoteOutcome};
use gpw_advisor_sentiment::NewsAggregate;

/// Votes required before a non-hold candidate is considered.
const MIN_CONCURRING_VOTES: usize = 3;

/// Baseline confidence for a hold that had enough data but no consensus.
const NEUTRAL_HOLD_CONFIDENCE: Decimal = Decimal::from_parts(30, 0, 0, false, 0);

/// Sentiment magnitude that boosts an agreeing candidate.
const BOOST_SENTIMENT: f64 = 0.5;
/// Sentiment magnitude that vetoes an opposing candidate (with high impact).
const VETO_SENTIMENT: f64 = 0.7;
/// Sentiment magnitude that converts a hold (with very high impact).
const CONVERT_SENTIMENT: f64 = 0.8;

/// Everything the generator needs for one `(user, stock)` evaluation.
/// The vote outcome comes from the indicator engine; the generator only
/// combines it with news and preferences.
pub struct GeneratorInput<'a> {
    pub user: &'a UserPreferencesRecord,
    pub stock: &'a StockRecord,
    /// Technical votes evaluated on the latest bars.
    pub votes: IndicatorValue<VoteOutcome>,
    pub last_close: Option<Decimal>,
    pub average_daily_volume: i64,
    /// Actionable signals already created for this user today.
    pub actionable_today: i64,
    pub news: Option<NewsAggregate>,
    pub now: DateTime<Utc>,
    pub session: TradingSession,
}

#[derive(Clone)]
pub struct SignalGenerator {
    profile: SignalProfile,
}

impl SignalGenerator {
    #[must_use]
    pub fn new(profile: SignalProfile) -> Self {
        Self { profile }
    }

    /// Produces exactly one signal record for the pair; ineligible or
    /// data-starved pairs yield holds, never an absence of a record.
    ///
    /// # Errors
    /// Returns an invariant violation if the produced record fails its
    /// own validation (a generator bug, surfaced rather than persisted).
    pub fn generate(&self, input: &GeneratorInput<'_>) -> Result<TradingSignalRecord, EngineError> {
        let price = input.last_close.unwrap_or_default();

        if let Some(detail) = self.eligibility_failure(input, price) {
            return finish_hold(input, price, Reason::NotEligible { detail });
        }

        // Technical candidate from the vote set.
        let IndicatorValue::Available(votes) = &input.votes else {
            return finish_hold(input, price, Reason::InsufficientData);
        };

        let (mut signal_type, mut confidence, mut reason) = technical_candidate(votes);

        // News adjustment.
        let mut modified_by_news = false;
        let news_impact = news_impact_of(input.news.as_ref());
        if let Some(aggregate) = input.news.as_ref() {
            let adjusted = self.apply_news(signal_type, confidence, votes, aggregate);
            if let Some((new_type, new_confidence, new_reason)) = adjusted {
                signal_type = new_type;
                confidence = new_confidence;
                reason = new_reason;
                modified_by_news = true;
            }
        }

        // Preference filter.
        if signal_type.is_actionable() && confidence < input.user.min_confidence_threshold {
            signal_type = SignalType::Hold;
            reason = Reason::BelowThreshold {
                confidence,
                threshold: input.user.min_confidence_threshold,
            };
        }

        // No new entries outside the entry window.
        if signal_type.is_actionable() && !input.session.allows_entry(input.now) {
            signal_type = SignalType::Hold;
            reason = Reason::EntryWindowClosed;
        }

        let confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED).floor();

        let (target_price, stop_loss_price, position_size) = if signal_type.is_actionable() {
            let envelope = risk_envelope(signal_type, price, input.user)?;
            let value = position_value(
                input.user.available_capital,
                input.user.max_position_size_pct,
                confidence,
                input.user.trading_style.position_size_modifier(),
            )
            .map_err(|e| EngineError::InvariantViolation(e.to_string()))?;
            let shares = shares_for_value(value, price)
                .map_err(|e| EngineError::InvariantViolation(e.to_string()))?;
            (Some(envelope.0), Some(envelope.1), Some(shares))
        } else {
            (None, None, None)
        };

        let record = TradingSignalRecord {
            id: Uuid::new_v4(),
            user_id: input.user.user_id,
            symbol: input.stock.symbol.clone(),
            session_date: input.session.date,
            created_at: input.now,
            signal_type,
            confidence,
            price_at_signal: price,
            target_price,
            stop_loss_price,
            position_size,
            reason,
            news_impact,
            modified_by_news,
            is_dispatched: false,
            dispatched_at: None,
            outcome: None,
            is_active: true,
        };
        record.validate()?;
        Ok(record)
    }

    fn eligibility_failure(&self, input: &GeneratorInput<'_>, price: Decimal) -> Option<String> {
        if !input.stock.is_monitored {
            return Some(format!("{} is not monitored", input.stock.symbol));
        }
        if input.last_close.is_none() {
            return Some(format!("{} has no price data", input.stock.symbol));
        }
        if input.average_daily_volume < input.user.min_daily_volume {
            return Some(format!(
                "average daily volume {} below user minimum {}",
                input.average_daily_volume, input.user.min_daily_volume
            ));
        }

        // Largest position this user would take must clear the minimum
        // position value at the current price.
        let max_value = position_value(
            input.user.available_capital,
            input.user.max_position_size_pct,
            Decimal::ONE_HUNDRED,
            input.user.trading_style.position_size_modifier(),
        )
        .unwrap_or_default();
        let shares = shares_for_value(max_value, price).unwrap_or(0);
        if Decimal::from(shares) * price < input.user.min_position_value {
            return Some(format!(
                "position value below user minimum {}",
                input.user.min_position_value
            ));
        }

        if input.actionable_today >= input.user.max_signals_per_day {
            return Some(format!(
                "daily signal limit {} reached",
                input.user.max_signals_per_day
            ));
        }
        None
    }

    /// News adjustment; `Some` when the candidate was modified.
    fn apply_news(
        &self,
        signal_type: SignalType,
        confidence: Decimal,
        votes: &VoteOutcome,
        aggregate: &NewsAggregate,
    ) -> Option<(SignalType, Decimal, Reason)> {
        // A candidate with zero confidence had insufficient technicals;
        // news never resurrects it.
        if confidence.is_zero() {
            return None;
        }

        let s = aggregate.weighted_sentiment;
        let boost = self.boost_for(aggregate);

        let adjusted = match signal_type {
            SignalType::Buy => {
                if s <= -VETO_SENTIMENT && aggregate.impact.is_high() {
                    Some((SignalType::Hold, confidence, "news_veto"))
                } else if s >= BOOST_SENTIMENT {
                    Some((SignalType::Buy, confidence + boost, "news_boost"))
                } else {
                    None
                }
            }
            SignalType::Sell => {
                if s >= VETO_SENTIMENT && aggregate.impact.is_high() {
                    Some((SignalType::Hold, confidence, "news_veto"))
                } else if s <= -BOOST_SENTIMENT {
                    Some((SignalType::Sell, confidence + boost, "news_boost"))
                } else {
                    None
                }
            }
            SignalType::Hold => {
                if s.abs() >= CONVERT_SENTIMENT && aggregate.impact == ImpactLevel::VeryHigh {
                    let side = if s > 0.0 { SignalType::Buy } else { SignalType::Sell };
                    // A converted hold starts from the non-hold floor.
                    Some((side, Decimal::from(50) + boost, "news_conversion"))
                } else {
                    None
                }
            }
        };

        adjusted.map(|(new_type, new_confidence, adjustment)| {
            let confidence = new_confidence.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
            let reason = Reason::NewsAdjusted {
                bullish: votes.bullish_labels(),
                bearish: votes.bearish_labels(),
                adjustment: adjustment.to_string(),
                weighted_sentiment: s,
                impact: aggregate.impact,
            };
            (new_type, confidence, reason)
        })
    }

    fn boost_for(&self, aggregate: &NewsAggregate) -> Decimal {
        let base = Decimal::from(self.profile.news_confidence_boost());
        if aggregate.impact.is_high() {
            base * Decimal::new(15, 1)
        } else {
            base
        }
    }
}

/// Candidate from the technical vote set alone.
fn technical_candidate(votes: &VoteOutcome) -> (SignalType, Decimal, Reason) {
    let bullish = votes.bullish_count();
    let bearish = votes.bearish_count();

    let reason = Reason::TechnicalVotes {
        bullish: votes.bullish_labels(),
        bearish: votes.bearish_labels(),
    };

    if bullish >= MIN_CONCURRING_VOTES && bullish > bearish {
        (SignalType::Buy, preliminary_confidence(bullish), reason)
    } else if bearish >= MIN_CONCURRING_VOTES && bearish > bullish {
        (SignalType::Sell, preliminary_confidence(bearish), reason)
    } else {
        (SignalType::Hold, NEUTRAL_HOLD_CONFIDENCE, reason)
    }
}

/// `50 + 10 * (votes - 3)`, clamped to [50, 90].
fn preliminary_confidence(votes: usize) -> Decimal {
    let base = 50 + 10 * (votes.saturating_sub(MIN_CONCURRING_VOTES));
    Decimal::from(base.min(90))
}

/// Target and stop around the entry, by direction and user risk
/// parameters, at four fractional digits.
fn risk_envelope(
    signal_type: SignalType,
    price: Decimal,
    user: &UserPreferencesRecord,
) -> Result<(Decimal, Decimal), EngineError> {
    if price <= Decimal::ZERO {
        return Err(EngineError::InvariantViolation(
            "risk envelope requires a positive entry price".into(),
        ));
    }

    let tp = user.effective_target_profit_pct() / Decimal::ONE_HUNDRED;
    let sl = user.effective_max_loss_pct() / Decimal::ONE_HUNDRED;

    let round = |v: Decimal| {
        v.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointNearestEven)
    };

    match signal_type {
        SignalType::Buy => Ok((
            round(price * (Decimal::ONE + tp)),
            round(price * (Decimal::ONE - sl)),
        )),
        SignalType::Sell => Ok((
            round(price * (Decimal::ONE - tp)),
            round(price * (Decimal::ONE + sl)),
        )),
        SignalType::Hold => Err(EngineError::InvariantViolation(
            "hold signals carry no risk envelope".into(),
        )),
    }
}

fn news_impact_of(aggregate: Option<&NewsAggregate>) -> NewsImpact {
    match aggregate {
        Some(a) => NewsImpact::Aggregate {
            weighted_sentiment: a.weighted_sentiment,
            total_weight: a.total_weight,
            article_count: a.article_count,
            momentum: a.momentum,
            impact: a.impact,
        },
        None => NewsImpact::None,
    }
}

fn finish_hold(
    input: &GeneratorInput<'_>,
    price: Decimal,
    reason: Reason,
) -> Result<TradingSignalRecord, EngineError> {
    let record = TradingSignalRecord {
        id: Uuid::new_v4(),
        user_id: input.user.user_id,
        symbol: input.stock.symbol.clone(),
        session_date: input.session.date,
        created_at: input.now,
        signal_type: SignalType::Hold,
        confidence: Decimal::ZERO,
        price_at_signal: price,
        target_price: None,
        stop_loss_price: None,
        position_size: None,
        reason,
        news_impact: NewsImpact::None,
        modified_by_news: false,
        is_dispatched: false,
        dispatched_at: None,
        outcome: None,
        is_active: true,
    };
    record.validate()?;
    Ok(record)
}
