//! Identity authority boundary.
//!
//! The authority owns credential verification. The pipeline calls it on
//! every request instead of caching or locally decoding anything, so a
//! credential revoked at the authority stops working on the next request.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::credential::Credential;
use crate::error::AuthError;

/// The authority's answer: which identity presented this credential.
///
/// Identity is not yet an actor; kind and workspace come from the
/// directory afterwards.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VerifiedIdentity {
    pub identity_id: Uuid,
}

/// External identity authority (credential issuance lives elsewhere).
#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    /// Verify a credential. `Err(Unauthenticated)` for bad credentials,
    /// `Err(Unavailable)` when the authority cannot be reached.
    async fn verify(&self, credential: &Credential) -> Result<VerifiedIdentity, AuthError>;
}

/// In-memory authority for dev and tests: a fixed token table.
///
/// Tokens can be revoked at runtime, which is how tests exercise the
/// revocation-is-immediate property of the delegation seam.
#[derive(Debug, Default)]
pub struct StaticAuthority {
    tokens: RwLock<HashMap<String, Uuid>>,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for an identity, returning the identity id.
    pub fn issue(&self, token: impl Into<String>, identity_id: Uuid) {
        self.tokens
            .write()
            .expect("authority token table poisoned")
            .insert(token.into(), identity_id);
    }

    pub fn revoke(&self, token: &str) {
        self.tokens
            .write()
            .expect("authority token table poisoned")
            .remove(token);
    }
}

#[async_trait]
impl IdentityAuthority for StaticAuthority {
    async fn verify(&self, credential: &Credential) -> Result<VerifiedIdentity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        let tokens = self
            .tokens
            .read()
            .map_err(|_| AuthError::Unavailable("authority token table poisoned".to_string()))?;
        tokens
            .get(credential.as_str())
            .map(|id| VerifiedIdentity { identity_id: *id })
            .ok_or(AuthError::Unauthenticated)
    }
}
