//! Room Controller error types.
//!
//! Every failure inside a work item is one of these variants. The variant
//! decides how the provisioning engine reacts:
//!
//! - `PermissionDenied`: abandon the item, never retried
//! - `RateLimited`: retried exactly once after `retry_after`
//! - `NotFound`: success for delete-style operations
//! - `Conflict`: the resource already exists by name; check-then-create
//!   re-queries and adopts it
//! - `Transient`: logged, item abandoned
//! - `Persistence`: logged, in-memory state already updated, item continues

use std::time::Duration;
use thiserror::Error;

/// Room Controller error type.
#[derive(Debug, Error)]
pub enum RcError {
    /// The gateway refused the operation for lack of permissions.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The gateway asked us to slow down.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The target resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resource with the same name already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Network failure, server error or unexpected response.
    #[error("Transient error: {0}")]
    Transient(String),

    /// The mapping backend could not durably record a change.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (channel closed, panic in item, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns a bounded label for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            RcError::PermissionDenied(_) => "permission_denied",
            RcError::RateLimited { .. } => "rate_limited",
            RcError::NotFound(_) => "not_found",
            RcError::Conflict(_) => "conflict",
            RcError::Transient(_) => "transient",
            RcError::Persistence(_) => "persistence",
            RcError::Config(_) => "config",
            RcError::Internal(_) => "internal",
        }
    }

    /// Returns true for errors that mean "the resource is already gone".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, RcError::NotFound(_))
    }
}

impl From<redis::RedisError> for RcError {
    fn from(err: redis::RedisError) -> Self {
        RcError::Persistence(format!("redis: {err}"))
    }
}

impl From<serde_json::Error> for RcError {
    fn from(err: serde_json::Error) -> Self {
        RcError::Persistence(format!("encoding: {err}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            RcError::PermissionDenied("x".to_string()).kind(),
            "permission_denied"
        );
        assert_eq!(
            RcError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .kind(),
            "rate_limited"
        );
        assert_eq!(RcError::NotFound("x".to_string()).kind(), "not_found");
        assert_eq!(RcError::Conflict("x".to_string()).kind(), "conflict");
        assert_eq!(RcError::Transient("x".to_string()).kind(), "transient");
        assert_eq!(RcError::Persistence("x".to_string()).kind(), "persistence");
        assert_eq!(RcError::Config("x".to_string()).kind(), "config");
        assert_eq!(RcError::Internal("x".to_string()).kind(), "internal");
    }

    #[test]
    fn test_is_not_found() {
        assert!(RcError::NotFound("room 1".to_string()).is_not_found());
        assert!(!RcError::Transient("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                RcError::RateLimited {
                    retry_after: Duration::from_millis(1500)
                }
            ),
            "Rate limited, retry after 1.5s"
        );
        assert_eq!(
            format!("{}", RcError::Persistence("disk full".to_string())),
            "Persistence error: disk full"
        );
    }

    #[test]
    fn test_json_error_converts_to_persistence() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let rc: RcError = err.into();
        assert!(matches!(rc, RcError::Persistence(_)));
    }
}
