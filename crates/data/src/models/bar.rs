//! OHLCV bar model.
//!
//! Bars are append-only: a `(symbol, timestamp)` pair is written once and
//! never mutated. Prices carry four fractional digits; volume is integral.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gpw_advisor_core::EngineError;

/// Fractional digits carried by every persisted price.
pub const PRICE_SCALE: u32 = 4;

/// One minute-aligned OHLCV bar for a stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OhlcvBar {
    pub symbol: String,
    /// Bar timestamp in UTC, minute-aligned.
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl OhlcvBar {
    /// Creates a validated bar, normalising prices to four fractional digits.
    ///
    /// # Errors
    /// Returns an invariant violation if `low > min(open, close)`,
    /// `max(open, close) > high`, the volume is negative, or the timestamp
    /// is not minute-aligned.
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
    ) -> Result<Self, EngineError> {
        let bar = Self {
            symbol: symbol.into(),
            timestamp,
            open: open.round_dp(PRICE_SCALE),
            high: high.round_dp(PRICE_SCALE),
            low: low.round_dp(PRICE_SCALE),
            close: close.round_dp(PRICE_SCALE),
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Checks the bar invariants without constructing.
    ///
    /// # Errors
    /// Returns an invariant violation naming the offending field.
    pub fn validate(&self) -> Result<(), EngineError> {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);

        if self.low > body_low {
            return Err(EngineError::InvariantViolation(format!(
                "{} @ {}: low {} above open/close",
                self.symbol, self.timestamp, self.low
            )));
        }
        if body_high > self.high {
            return Err(EngineError::InvariantViolation(format!(
                "{} @ {}: open/close above high {}",
                self.symbol, self.timestamp, self.high
            )));
        }
        if self.volume < 0 {
            return Err(EngineError::InvariantViolation(format!(
                "{} @ {}: negative volume {}",
                self.symbol, self.timestamp, self.volume
            )));
        }
        if self.timestamp.second() != 0 || self.timestamp.nanosecond() != 0 {
            return Err(EngineError::InvariantViolation(format!(
                "{} @ {}: timestamp not minute-aligned",
                self.symbol, self.timestamp
            )));
        }
        Ok(())
    }

    /// Mid price of the bar range, rounded half-to-even.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        ((self.high + self.low) / Decimal::TWO).round_dp_with_strategy(
            PRICE_SCALE,
            rust_decimal::RoundingStrategy::MidpointNearestEven,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 9, 9, 5, 0).unwrap()
    }

    fn valid_bar() -> OhlcvBar {
        OhlcvBar::new("CDR", ts(), dec!(264.00), dec!(266.00), dec!(263.50), dec!(265.20), 1200)
            .unwrap()
    }

    #[test]
    fn valid_bar_accepted() {
        let bar = valid_bar();
        assert_eq!(bar.close, dec!(265.2000));
        assert_eq!(bar.volume, 1200);
    }

    #[test]
    fn low_above_body_rejected() {
        let result = OhlcvBar::new("CDR", ts(), dec!(264), dec!(266), dec!(265), dec!(264.5), 10);
        assert!(result.is_err());
    }

    #[test]
    fn body_above_high_rejected() {
        let result = OhlcvBar::new("CDR", ts(), dec!(267), dec!(266), dec!(263), dec!(265), 10);
        assert!(result.is_err());
    }

    #[test]
    fn negative_volume_rejected() {
        let result =
            OhlcvBar::new("CDR", ts(), dec!(264), dec!(266), dec!(263), dec!(265), -1);
        assert!(result.is_err());
    }

    #[test]
    fn sub_minute_timestamp_rejected() {
        let odd = Utc.with_ymd_and_hms(2025, 6, 9, 9, 5, 30).unwrap();
        let result =
            OhlcvBar::new("CDR", odd, dec!(264), dec!(266), dec!(263), dec!(265), 10);
        assert!(result.is_err());
    }

    #[test]
    fn prices_normalised_to_scale_four() {
        let bar = OhlcvBar::new(
            "CDR",
            ts(),
            dec!(264.123456),
            dec!(266.0),
            dec!(263.0),
            dec!(265.0),
            10,
        )
        .unwrap();
        assert_eq!(bar.open, dec!(264.1235));
    }

    #[test]
    fn mid_uses_bankers_rounding() {
        let bar =
            OhlcvBar::new("CDR", ts(), dec!(100.0), dec!(100.0001), dec!(100.0), dec!(100.0), 1)
                .unwrap();
        // (100.0001 + 100.0) / 2 = 100.00005 -> 100.0000 half-to-even.
        assert_eq!(bar.mid(), dec!(100.0000));
    }

    #[test]
    fn doji_bar_with_equal_prices_is_valid() {
        let bar = OhlcvBar::new("CDR", ts(), dec!(100), dec!(100), dec!(100), dec!(100), 0);
        assert!(bar.is_ok());
    }
}
