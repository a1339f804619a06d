pub mod database;
pub mod models;
pub mod repositories;

pub use database::DatabaseClient;
pub use models::{
    ArticleClassification, DeliveryChannel, DeliveryStatus, ImpactLevel, NewsArticleRecord,
    NewsImpact, OhlcvBar, Reason, Resolution, ScheduleExecutionRecord, ScheduleKind,
    ScoredMention, Sentiment, SignalDeliveryRecord, SignalOutcome, SignalType, StockRecord,
    StockSentiment, TradingSignalRecord, TradingStyle, UserPreferencesRecord, PRICE_SCALE,
};
pub use repositories::{
    cancellation_outcome, signed_return_pct, ExecutionRepository, InsertOutcome, NewsRepository,
    OhlcvRepository, PreferencesCache, Repositories, SignalRepository, StockRepository,
    UserRepository,
};
