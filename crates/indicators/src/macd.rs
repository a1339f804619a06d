//! Moving Average Convergence Divergence.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::moving_average::ema_series;
use crate::value::{round_output, IndicatorValue};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

/// MACD line, signal line, and histogram at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// MACD(fast, slow, signal): `macd = EMA(fast) - EMA(slow)`,
/// `signal = EMA(signal)` of the macd line, `histogram = macd - signal`.
///
/// Requires `slow + signal - 1` closes; otherwise `Unavailable`.
#[must_use]
pub fn macd(closes: &[Decimal], fast: usize, slow: usize, signal: usize) -> IndicatorValue<MacdValue> {
    match macd_series(closes, fast, slow, signal) {
        Some(series) => IndicatorValue::Available(*series.last().unwrap()),
        None => IndicatorValue::Unavailable,
    }
}

/// Full MACD series; the first element corresponds to the close at index
/// `slow + signal - 2`.
#[must_use]
pub fn macd_series(
    closes: &[Decimal],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<Vec<MacdValue>> {
    if fast == 0 || signal == 0 || fast >= slow {
        return None;
    }

    let fast_series = ema_series(closes, fast)?;
    let slow_series = ema_series(closes, slow)?;

    // Both series end at the last close; align their tails.
    let len = slow_series.len();
    let fast_tail = &fast_series[fast_series.len() - len..];

    let macd_line: Vec<Decimal> = fast_tail
        .iter()
        .zip(slow_series.iter())
        .map(|(f, s)| *f - *s)
        .collect();

    let signal_series = ema_series(&macd_line, signal)?;
    let macd_tail = &macd_line[macd_line.len() - signal_series.len()..];

    Some(
        macd_tail
            .iter()
            .zip(signal_series.iter())
            .map(|(m, s)| {
                let macd = round_output(*m);
                let signal = round_output(*s);
                MacdValue {
                    macd,
                    signal,
                    histogram: macd - signal,
                }
            })
            .collect(),
    )
}
