//! Simple and exponential moving averages.

use rust_decimal::Decimal;

use crate::value::{div_round, round_output, IndicatorValue};

/// SMA(n): arithmetic mean of the last `n` closes.
///
/// Requires at least `n` closes; otherwise `Unavailable`.
#[must_use]
pub fn sma(closes: &[Decimal], n: usize) -> IndicatorValue {
    if n == 0 || closes.len() < n {
        return IndicatorValue::Unavailable;
    }
    let window = &closes[closes.len() - n..];
    let sum: Decimal = window.iter().copied().sum();
    IndicatorValue::Available(div_round(sum, Decimal::from(n)))
}

/// EMA(n) over the whole series, seeded with SMA(n) over the first `n`
/// closes and smoothed with `alpha = 2 / (n + 1)`.
///
/// Requires at least `n` closes; otherwise `Unavailable`.
#[must_use]
pub fn ema(closes: &[Decimal], n: usize) -> IndicatorValue {
    match ema_series(closes, n) {
        Some(series) => IndicatorValue::Available(round_output(*series.last().unwrap())),
        None => IndicatorValue::Unavailable,
    }
}

/// Full EMA series at full precision.
///
/// The first element corresponds to the close at index `n - 1`; the
/// result has `closes.len() - n + 1` elements. Returns `None` when the
/// series is shorter than `n`.
#[must_use]
pub fn ema_series(closes: &[Decimal], n: usize) -> Option<Vec<Decimal>> {
    if n == 0 || closes.len() < n {
        return None;
    }

    let alpha = Decimal::TWO / Decimal::from(n + 1);
    let one_minus = Decimal::ONE - alpha;

    let seed: Decimal = closes[..n].iter().copied().sum::<Decimal>() / Decimal::from(n);
    let mut series = Vec::with_capacity(closes.len() - n + 1);
    series.push(seed);

    let mut prev = seed;
    for close in &closes[n..] {
        prev = *close * alpha + prev * one_minus;
        series.push(prev);
    }
    Some(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn sma_of_constant_series_is_constant() {
        let closes = vec![dec!(100); 30];
        assert_eq!(sma(&closes, 20), IndicatorValue::Available(dec!(100.0000)));
    }

    #[test]
    fn sma_uses_last_n_closes() {
        let closes = series(&[1, 2, 3, 4, 5, 6]);
        // Last 3: (4 + 5 + 6) / 3 = 5.
        assert_eq!(sma(&closes, 3), IndicatorValue::Available(dec!(5.0000)));
    }

    #[test]
    fn sma_short_series_unavailable() {
        let closes = series(&[1, 2]);
        assert_eq!(sma(&closes, 3), IndicatorValue::Unavailable);
        assert_eq!(sma(&closes, 0), IndicatorValue::Unavailable);
    }

    #[test]
    fn ema_seeded_with_sma() {
        // n = 3 over exactly 3 closes: EMA = SMA = 2.
        let closes = series(&[1, 2, 3]);
        assert_eq!(ema(&closes, 3), IndicatorValue::Available(dec!(2.0000)));
    }

    #[test]
    fn ema_follows_wilder_recursion() {
        // n = 3, alpha = 0.5: seed (1+2+3)/3 = 2, then
        // 4 * 0.5 + 2 * 0.5 = 3, then 5 * 0.5 + 3 * 0.5 = 4.
        let closes = series(&[1, 2, 3, 4, 5]);
        assert_eq!(ema(&closes, 3), IndicatorValue::Available(dec!(4.0000)));
    }

    #[test]
    fn ema_series_alignment() {
        let closes = series(&[1, 2, 3, 4, 5]);
        let s = ema_series(&closes, 3).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s[0], dec!(2));
    }

    #[test]
    fn ema_short_series_unavailable() {
        let closes = series(&[1, 2]);
        assert_eq!(ema(&closes, 3), IndicatorValue::Unavailable);
        assert!(ema_series(&closes, 3).is_none());
    }

    #[test]
    fn ema_converges_towards_recent_values() {
        let mut closes = vec![dec!(100); 20];
        closes.extend(vec![dec!(200); 40]);
        let value = ema(&closes, 10).into_value().unwrap();
        assert!(value > dec!(199));
        assert!(value <= dec!(200));
    }
}
