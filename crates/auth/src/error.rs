//! Actor resolution errors.

use thiserror::Error;

use agentbase_core::CommandError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing, malformed, or unverifiable credential.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Credential verified, but the identity belongs to no workspace.
    /// Every downstream read and write is rejected.
    #[error("no workspace membership")]
    NoWorkspace,

    /// The identity authority did not answer in time. Unknown outcome;
    /// safe to retry.
    #[error("identity authority unavailable: {0}")]
    Unavailable(String),
}

impl From<AuthError> for CommandError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::Unauthenticated => CommandError::Unauthenticated,
            AuthError::NoWorkspace => CommandError::NoWorkspace,
            AuthError::Unavailable(msg) => CommandError::Unavailable(msg),
        }
    }
}
