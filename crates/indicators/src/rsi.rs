//! Wilder's Relative Strength Index.

use rust_decimal::Decimal;

use crate::value::{round_output, IndicatorValue};

/// RSI period used by the signal generator.
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Oversold threshold; an RSI below this is a bullish vote.
pub const OVERSOLD: Decimal = Decimal::from_parts(30, 0, 0, false, 0);
/// Overbought threshold; an RSI above this is a bearish vote.
pub const OVERBOUGHT: Decimal = Decimal::from_parts(70, 0, 0, false, 0);

/// RSI(n) with Wilder smoothing.
///
/// Requires `n + 1` closes (n price changes). Output in [0, 100]; an
/// all-gain window yields 100 and an all-loss window 0.
#[must_use]
pub fn rsi(closes: &[Decimal], n: usize) -> IndicatorValue {
    if n == 0 || closes.len() < n + 1 {
        return IndicatorValue::Unavailable;
    }

    let changes: Vec<Decimal> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period = Decimal::from(n);

    // Seed averages over the first n changes.
    let mut avg_gain: Decimal = changes[..n]
        .iter()
        .filter(|c| **c > Decimal::ZERO)
        .copied()
        .sum::<Decimal>()
        / period;
    let mut avg_loss: Decimal = changes[..n]
        .iter()
        .filter(|c| **c < Decimal::ZERO)
        .map(|c| -*c)
        .sum::<Decimal>()
        / period;

    // Wilder smoothing over the remaining changes.
    for change in &changes[n..] {
        let gain = if *change > Decimal::ZERO { *change } else { Decimal::ZERO };
        let loss = if *change < Decimal::ZERO { -*change } else { Decimal::ZERO };
        avg_gain = (avg_gain * (period - Decimal::ONE) + gain) / period;
        avg_loss = (avg_loss * (period - Decimal::ONE) + loss) / period;
    }

    if avg_loss.is_zero() {
        return IndicatorValue::Available(Decimal::ONE_HUNDRED);
    }

    let rs = avg_gain / avg_loss;
    let value = Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs);
    IndicatorValue::Available(round_output(value))
}
