pub mod calendar;
pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod position_sizing;

pub use calendar::{
    easter_sunday, is_polish_holiday, warsaw_to_utc, Clock, FixedClock, SystemClock,
    TradingCalendar, TradingSession,
};
pub use config::{
    AppConfig, CalendarConfig, CollectorConfig, DatabaseConfig, DispatchConfig, FeedConfig,
    LlmConfig, NewsConfig, SchedulerConfig, SessionConfig, SignalConfig, SignalProfile,
    SmtpConfig, TelegramConfig,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use error::EngineError;
