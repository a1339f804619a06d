//! Scheduled acquisition collectors: OHLCV snapshots and RSS news.

pub mod price;
pub mod rss;
pub mod types;

pub use price::{backoff_delay, parse_csv, PriceCollector, PriceRunSummary, BACKOFF_CAP};
pub use rss::{extract_mentions, normalise_entry, FeedItem, NewsCollector, NewsRunSummary};
pub use types::CollectorStats;
