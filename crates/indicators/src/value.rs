use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits carried by indicator outputs.
pub const OUTPUT_SCALE: u32 = 4;

/// An indicator result, or a marker that the series was too short.
///
/// Indicators never impute: when the window does not cover the required
/// number of bars the caller gets `Unavailable` and must degrade (the
/// signal generator emits a zero-confidence hold).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndicatorValue<T = Decimal> {
    Available(T),
    Unavailable,
}

impl<T> IndicatorValue<T> {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Available(v) => Some(v),
            Self::Unavailable => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Available(v) => Some(v),
            Self::Unavailable => None,
        }
    }
}

/// Division with the engine's rounding convention: half-to-even at four
/// fractional digits.
#[must_use]
pub fn div_round(numerator: Decimal, denominator: Decimal) -> Decimal {
    (numerator / denominator)
        .round_dp_with_strategy(OUTPUT_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Rounds a final indicator output to the engine scale.
#[must_use]
pub fn round_output(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(OUTPUT_SCALE, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn availability_accessors() {
        let available: IndicatorValue = IndicatorValue::Available(dec!(42));
        let unavailable: IndicatorValue = IndicatorValue::Unavailable;

        assert!(available.is_available());
        assert_eq!(available.value(), Some(&dec!(42)));
        assert!(!unavailable.is_available());
        assert_eq!(unavailable.value(), None);
    }

    #[test]
    fn division_rounds_half_to_even() {
        // 1 / 16000 = 0.0000625 -> 0.0000 at four digits? No: 0.0001 vs
        // 0.0000 -- midpoint 0.00005 ties to even (0.0000).
        assert_eq!(div_round(dec!(1), dec!(20000)), dec!(0.0000));
        assert_eq!(div_round(dec!(3), dec!(20000)), dec!(0.0002));
        assert_eq!(div_round(dec!(10), dec!(3)), dec!(3.3333));
    }

    #[test]
    fn output_rounding_ties_to_even() {
        assert_eq!(round_output(dec!(1.00005)), dec!(1.0000));
        assert_eq!(round_output(dec!(1.00015)), dec!(1.0002));
    }
}
