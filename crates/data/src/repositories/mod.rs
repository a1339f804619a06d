//! Database repositories, one per persisted concern.
//!
//! Repositories share a single pool and expose only the operations the
//! engine needs; there is no lazy traversal across aggregates.

pub mod execution_repo;
pub mod news_repo;
pub mod ohlcv_repo;
pub mod signal_repo;
pub mod stock_repo;
pub mod user_repo;

pub use execution_repo::ExecutionRepository;
pub use news_repo::NewsRepository;
pub use ohlcv_repo::OhlcvRepository;
pub use signal_repo::{cancellation_outcome, signed_return_pct, InsertOutcome, SignalRepository};
pub use stock_repo::StockRepository;
pub use user_repo::{PreferencesCache, UserRepository, PREFERENCES_TTL};

use sqlx::PgPool;

/// All repositories wired to one pool.
pub struct Repositories {
    pub ohlcv: OhlcvRepository,
    pub news: NewsRepository,
    pub signals: SignalRepository,
    pub stocks: StockRepository,
    pub users: UserRepository,
    pub executions: ExecutionRepository,
}

impl Repositories {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            ohlcv: OhlcvRepository::new(pool.clone()),
            news: NewsRepository::new(pool.clone()),
            signals: SignalRepository::new(pool.clone()),
            stocks: StockRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            executions: ExecutionRepository::new(pool),
        }
    }
}
