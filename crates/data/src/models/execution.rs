use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four work kinds driven by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Price,
    News,
    Signals,
    Outcomes,
}

impl ScheduleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::News => "news",
            Self::Signals => "signals",
            Self::Outcomes => "outcomes",
        }
    }
}

/// Audit row written for every scheduler-driven run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleExecutionRecord {
    pub kind: ScheduleKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub items_processed: i64,
    pub items_failed: i64,
    pub error: Option<String>,
}

impl ScheduleExecutionRecord {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
