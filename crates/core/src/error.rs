//! Engine-wide error taxonomy.
//!
//! Errors are classified by propagation policy rather than by origin:
//! transient failures are retried and never fatal, malformed input is
//! dropped item-by-item, invariant violations abort the offending item,
//! configuration errors abort the cycle, and internal errors terminate
//! the process with a distinct exit status.

use thiserror::Error;

/// Errors surfaced by engine components, classified by how callers must
/// react to them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Upstream HTTP timeout, 5xx, SMTP 4xx, or provider unavailability.
    /// Retried with backoff; the item is left for the next cycle.
    #[error("transient external failure: {0}")]
    TransientExternal(String),

    /// Unparseable CSV row, feed entry without a URL, out-of-range price.
    /// The item is dropped with a counter increment; the batch continues.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A record that would violate a data invariant (low > high, target on
    /// the wrong side of entry, duplicate open signal). The item is aborted
    /// with full context; nothing malformed is persisted.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Unknown profile, weight out of range, unparseable configuration.
    /// The current cycle aborts and the previous configuration stays live.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Store write failure after retries or a corrupted index. The engine
    /// exits so supervision can restart it.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Process exit code for the CLI surface.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::TransientExternal(_) => 2,
            Self::InvariantViolation(_) | Self::MalformedInput(_) => 3,
            Self::Internal(_) => 4,
        }
    }

    /// Whether the next cycle may retry the failed work.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransientExternal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_operator_contract() {
        assert_eq!(EngineError::Configuration("x".into()).exit_code(), 1);
        assert_eq!(EngineError::TransientExternal("x".into()).exit_code(), 2);
        assert_eq!(EngineError::InvariantViolation("x".into()).exit_code(), 3);
        assert_eq!(EngineError::MalformedInput("x".into()).exit_code(), 3);
        assert_eq!(EngineError::Internal("x".into()).exit_code(), 4);
    }

    #[test]
    fn only_transient_errors_are_retriable() {
        assert!(EngineError::TransientExternal("timeout".into()).is_retriable());
        assert!(!EngineError::MalformedInput("bad row".into()).is_retriable());
        assert!(!EngineError::Configuration("bad key".into()).is_retriable());
    }

    #[test]
    fn display_includes_classification() {
        let err = EngineError::InvariantViolation("low above high".into());
        assert!(err.to_string().contains("invariant violation"));
    }
}
