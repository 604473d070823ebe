//! Pipeline error taxonomy.
//!
//! Every failure a command can hit maps to exactly one of these kinds, each
//! with a stable machine-readable name and a retryability flag so automated
//! callers can decide whether to resubmit with the same idempotency key.

use thiserror::Error;

/// Result type used across the pipeline.
pub type CommandResult<T> = Result<T, CommandError>;

/// Error returned to a caller whose command did not commit.
///
/// `NotFound` deliberately covers both "no such entity" and "entity belongs
/// to another workspace". The distinction exists internally (store errors
/// keep it for logging) but is collapsed here so existence never leaks
/// across the tenant boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Missing or unverifiable credential.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Verified identity with no workspace membership. Reads nothing,
    /// writes nothing.
    #[error("no workspace membership")]
    NoWorkspace,

    /// Per-actor budget exhausted. Retryable after the window rolls over.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Malformed command payload. Not retryable as submitted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A generic patch touched a protected field. This is a client
    /// programming error, never transient.
    #[error("protected field: {0}")]
    ProtectedField(String),

    /// Entity absent, or not visible from the caller's workspace.
    #[error("not found")]
    NotFound,

    /// The durable store reported a write conflict it could not resolve.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Durable store or identity authority did not answer in time. The
    /// outcome is unknown; retrying with the same idempotency key is safe.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl CommandError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn protected_field(field: impl Into<String>) -> Self {
        Self::ProtectedField(field.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Stable machine-readable kind, part of the external contract.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Unauthenticated => "unauthenticated",
            CommandError::NoWorkspace => "no_workspace",
            CommandError::RateLimited { .. } => "rate_limited",
            CommandError::Validation(_) => "validation_error",
            CommandError::ProtectedField(_) => "protected_field",
            CommandError::NotFound => "not_found",
            CommandError::Conflict(_) => "conflict",
            CommandError::Unavailable(_) => "unavailable",
        }
    }

    /// Whether resubmitting the same command (same idempotency key) can
    /// succeed without modification.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CommandError::RateLimited { .. }
                | CommandError::Conflict(_)
                | CommandError::Unavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_are_exactly_the_transient_ones() {
        assert!(CommandError::RateLimited { retry_after_secs: 1 }.retryable());
        assert!(CommandError::unavailable("timeout").retryable());
        assert!(CommandError::conflict("in flight").retryable());

        assert!(!CommandError::Unauthenticated.retryable());
        assert!(!CommandError::NoWorkspace.retryable());
        assert!(!CommandError::validation("bad").retryable());
        assert!(!CommandError::protected_field("id").retryable());
        assert!(!CommandError::NotFound.retryable());
    }

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(CommandError::NotFound.kind(), "not_found");
        assert_eq!(
            CommandError::RateLimited { retry_after_secs: 30 }.kind(),
            "rate_limited"
        );
    }
}
