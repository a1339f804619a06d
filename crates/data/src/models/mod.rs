//! Data models for the signal engine.
//!
//! All price fields use `rust_decimal::Decimal`; all persisted timestamps
//! are UTC. Every record carries the soft-delete `is_active` flag.

pub mod bar;
pub mod execution;
pub mod news;
pub mod signal;
pub mod stock;
pub mod user;

pub use bar::{OhlcvBar, PRICE_SCALE};
pub use execution::{ScheduleExecutionRecord, ScheduleKind};
pub use news::{
    ArticleClassification, ImpactLevel, NewsArticleRecord, ScoredMention, Sentiment,
    StockSentiment,
};
pub use signal::{
    DeliveryChannel, DeliveryStatus, NewsImpact, Reason, Resolution, SignalDeliveryRecord,
    SignalOutcome, SignalType, TradingSignalRecord,
};
pub use stock::StockRecord;
pub use user::{TradingStyle, UserPreferencesRecord};
