//! Technical vote evaluation over the indicator set.
//!
//! The signal generator requires at least three concurring votes for a
//! non-hold recommendation. Votes are computed on the latest bar, with
//! crossings detected against the previous bar.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::bollinger::{bollinger, DEFAULT_PERIOD, DEFAULT_WIDTH};
use crate::macd::{macd_series, DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use crate::moving_average::sma;
use crate::rsi::{rsi, DEFAULT_RSI_PERIOD, OVERBOUGHT, OVERSOLD};
use crate::value::IndicatorValue;

/// SMA period pair used for the crossover vote.
pub const DEFAULT_SHORT_SMA: usize = 5;
pub const DEFAULT_LONG_SMA: usize = 20;

/// One concurring observation from the indicator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    RsiOversold,
    RsiOverbought,
    CloseBelowLowerBand,
    CloseAboveUpperBand,
    MacdCrossUp,
    MacdCrossDown,
    SmaCrossUp,
    SmaCrossDown,
}

impl Vote {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RsiOversold => "rsi_oversold",
            Self::RsiOverbought => "rsi_overbought",
            Self::CloseBelowLowerBand => "close_below_lower_band",
            Self::CloseAboveUpperBand => "close_above_upper_band",
            Self::MacdCrossUp => "macd_cross_up",
            Self::MacdCrossDown => "macd_cross_down",
            Self::SmaCrossUp => "sma_cross_up",
            Self::SmaCrossDown => "sma_cross_down",
        }
    }
}

/// The bullish and bearish votes observed on the latest bar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteOutcome {
    pub bullish: Vec<Vote>,
    pub bearish: Vec<Vote>,
}

impl VoteOutcome {
    #[must_use]
    pub fn bullish_count(&self) -> usize {
        self.bullish.len()
    }

    #[must_use]
    pub fn bearish_count(&self) -> usize {
        self.bearish.len()
    }

    #[must_use]
    pub fn bullish_labels(&self) -> Vec<String> {
        self.bullish.iter().map(|v| v.as_str().to_string()).collect()
    }

    #[must_use]
    pub fn bearish_labels(&self) -> Vec<String> {
        self.bearish.iter().map(|v| v.as_str().to_string()).collect()
    }
}

/// Evaluates the full vote set on a close series.
///
/// `Unavailable` when any required indicator lacks data; the generator
/// then emits a zero-confidence hold rather than voting on a partial set.
#[must_use]
pub fn evaluate_votes(closes: &[Decimal]) -> IndicatorValue<VoteOutcome> {
    // Longest requirement wins: MACD needs slow + signal - 1 bars, the
    // crossings need one bar of history on top of their own windows.
    let rsi_now = rsi(closes, DEFAULT_RSI_PERIOD);
    let bands_now = bollinger(closes, DEFAULT_PERIOD, DEFAULT_WIDTH);
    let macd_now = macd_series(closes, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL);
    let sma_short_now = sma(closes, DEFAULT_SHORT_SMA);
    let sma_long_now = sma(closes, DEFAULT_LONG_SMA);

    let prev = &closes[..closes.len().saturating_sub(1)];
    let sma_short_prev = sma(prev, DEFAULT_SHORT_SMA);
    let sma_long_prev = sma(prev, DEFAULT_LONG_SMA);

    let (
        IndicatorValue::Available(rsi_value),
        IndicatorValue::Available(bands),
        Some(macd_values),
        IndicatorValue::Available(short_now),
        IndicatorValue::Available(long_now),
        IndicatorValue::Available(short_prev),
        IndicatorValue::Available(long_prev),
    ) = (
        rsi_now,
        bands_now,
        macd_now,
        sma_short_now,
        sma_long_now,
        sma_short_prev,
        sma_long_prev,
    )
    else {
        return IndicatorValue::Unavailable;
    };

    if macd_values.len() < 2 {
        return IndicatorValue::Unavailable;
    }

    let close = *closes.last().unwrap();
    let hist_now = macd_values[macd_values.len() - 1].histogram;
    let hist_prev = macd_values[macd_values.len() - 2].histogram;

    let mut outcome = VoteOutcome::default();

    if rsi_value < OVERSOLD {
        outcome.bullish.push(Vote::RsiOversold);
    } else if rsi_value > OVERBOUGHT {
        outcome.bearish.push(Vote::RsiOverbought);
    }

    if close < bands.lower {
        outcome.bullish.push(Vote::CloseBelowLowerBand);
    } else if close > bands.upper {
        outcome.bearish.push(Vote::CloseAboveUpperBand);
    }

    if hist_prev <= Decimal::ZERO && hist_now > Decimal::ZERO {
        outcome.bullish.push(Vote::MacdCrossUp);
    } else if hist_prev >= Decimal::ZERO && hist_now < Decimal::ZERO {
        outcome.bearish.push(Vote::MacdCrossDown);
    }

    if short_prev <= long_prev && short_now > long_now {
        outcome.bullish.push(Vote::SmaCrossUp);
    } else if short_prev >= long_prev && short_now < long_now {
        outcome.bearish.push(Vote::SmaCrossDown);
    }

    IndicatorValue::Available(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn short_series_is_unavailable() {
        let closes = vec![dec!(100); 30];
        assert_eq!(evaluate_votes(&closes), IndicatorValue::Unavailable);
    }

    #[test]
    fn flat_series_votes_nothing_directional() {
        // Flat RSI is 100 by convention (no losses), which is a bearish
        // vote, but no crossings or band breaches occur.
        let closes = vec![dec!(100); 60];
        let outcome = evaluate_votes(&closes).into_value().unwrap();
        assert!(outcome.bullish.is_empty());
        assert_eq!(outcome.bearish, vec![Vote::RsiOverbought]);
    }

    #[test]
    fn capitulation_series_votes_bullish() {
        // Long slow decline ending in a sharp flush below the lower band.
        let mut closes: Vec<Decimal> = (0..55).map(|i| dec!(200) - Decimal::from(i)).collect();
        closes.push(dec!(120));
        closes.push(dec!(110));

        let outcome = evaluate_votes(&closes).into_value().unwrap();
        assert!(outcome.bullish.contains(&Vote::RsiOversold));
        assert!(outcome.bullish.contains(&Vote::CloseBelowLowerBand));
        assert!(outcome.bearish.is_empty() || !outcome.bearish.contains(&Vote::RsiOverbought));
    }

    #[test]
    fn blow_off_series_votes_bearish() {
        let mut closes: Vec<Decimal> = (0..55).map(|i| dec!(100) + Decimal::from(i)).collect();
        closes.push(dec!(180));
        closes.push(dec!(195));

        let outcome = evaluate_votes(&closes).into_value().unwrap();
        assert!(outcome.bearish.contains(&Vote::RsiOverbought));
        assert!(outcome.bearish.contains(&Vote::CloseAboveUpperBand));
    }

    #[test]
    fn sma_crossover_detected() {
        // Long flat stretch, then a jump strong enough to lift SMA5 over
        // SMA20 on the final bar only.
        let mut closes = vec![dec!(100); 55];
        closes.extend([dec!(100), dec!(100), dec!(100), dec!(100), dec!(130)]);

        let outcome = evaluate_votes(&closes).into_value().unwrap();
        assert!(outcome.bullish.contains(&Vote::SmaCrossUp));
    }

    #[test]
    fn vote_labels() {
        assert_eq!(Vote::RsiOversold.as_str(), "rsi_oversold");
        assert_eq!(Vote::SmaCrossDown.as_str(), "sma_cross_down");
    }
}
