//! Bollinger bands over a close series.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value::{round_output, IndicatorValue};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_WIDTH: f64 = 2.0;

/// Upper, middle, and lower band at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

/// Bollinger(n, k): `middle = SMA(n)`, `upper/lower = middle ± k·stdev`
/// with the population standard deviation of the last `n` closes.
///
/// Requires `n` closes; otherwise `Unavailable`.
#[must_use]
pub fn bollinger(closes: &[Decimal], n: usize, width: f64) -> IndicatorValue<BollingerBands> {
    if n == 0 || closes.len() < n {
        return IndicatorValue::Unavailable;
    }

    let window = &closes[closes.len() - n..];
    let period = Decimal::from(n);
    let mean: Decimal = window.iter().copied().sum::<Decimal>() / period;

    let variance: Decimal = window
        .iter()
        .map(|c| {
            let d = *c - mean;
            d * d
        })
        .sum::<Decimal>()
        / period;

    // Square root via f64; band widths do not need more precision than
    // the four output digits.
    let stdev = variance.to_string().parse::<f64>().unwrap_or(0.0).sqrt();
    let offset = Decimal::try_from(stdev * width).unwrap_or(Decimal::ZERO);

    IndicatorValue::Available(BollingerBands {
        upper: round_output(mean + offset),
        middle: round_output(mean),
        lower: round_output(mean - offset),
    })
}
