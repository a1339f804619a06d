//! Technical indicator kernels for the signal engine.
//!
//! All arithmetic is `Decimal` with four fractional output digits;
//! division rounds half-to-even. Indicators are computed on demand from a
//! window of closes and never cache state across calls. A series shorter
//! than an indicator's requirement yields [`IndicatorValue::Unavailable`],
//! never an imputed value.

pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod value;
pub mod votes;

pub use bollinger::{bollinger, BollingerBands};
pub use macd::{macd, macd_series, MacdValue};
pub use moving_average::{ema, ema_series, sma};
pub use rsi::{rsi, DEFAULT_RSI_PERIOD, OVERBOUGHT, OVERSOLD};
pub use value::{div_round, round_output, IndicatorValue, OUTPUT_SCALE};
pub use votes::{evaluate_votes, Vote, VoteOutcome, DEFAULT_LONG_SMA, DEFAULT_SHORT_SMA};
