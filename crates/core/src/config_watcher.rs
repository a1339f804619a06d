use std::time::Duration;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;

/// Default reload period for the running configuration.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(300);

/// Periodically re-reads the configuration file and broadcasts updates.
///
/// A reload that fails to parse or validate keeps the previous configuration
/// in effect; the error is logged as a configuration error and the watcher
/// keeps running.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
    path: String,
    interval: Duration,
}

impl ConfigWatcher {
    /// Creates a new watcher seeded with an initial configuration.
    ///
    /// Returns the watcher and a receiver that observes configuration updates.
    #[must_use]
    pub fn new(initial: AppConfig, path: impl Into<String>) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial);
        (
            Self {
                tx,
                path: path.into(),
                interval: RELOAD_INTERVAL,
            },
            rx,
        )
    }

    /// Overrides the reload period.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs the reload loop until all receivers are dropped.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the initial config
        // stands until a full period has elapsed.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match ConfigLoader::load_from(&self.path) {
                Ok(config) => {
                    if self.tx.send(config).is_err() {
                        tracing::info!("All config receivers dropped, stopping watcher");
                        break;
                    }
                    tracing::debug!("Configuration reloaded");
                }
                Err(e) => {
                    tracing::error!("Config reload failed, keeping previous: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_seeds_receiver_with_initial_config() {
        let initial = AppConfig::default();
        let (_watcher, rx) = ConfigWatcher::new(initial, "config/Config.toml");

        assert_eq!(rx.borrow().scheduler.tick_interval_seconds, 60);
    }

    #[test]
    fn interval_override() {
        let (watcher, _rx) =
            ConfigWatcher::new(AppConfig::default(), "config/Config.toml");
        let watcher = watcher.with_interval(Duration::from_secs(10));
        assert_eq!(watcher.interval, Duration::from_secs(10));
    }
}
