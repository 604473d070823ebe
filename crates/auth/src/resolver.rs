//! Actor resolution: credential in, `(actor_id, actor_kind, workspace_id)` out.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentbase_core::{ActorId, ActorKind, WorkspaceId};

use crate::authority::IdentityAuthority;
use crate::credential::Credential;
use crate::directory::Directory;
use crate::error::AuthError;

/// Default bound on one authority round trip.
pub const DEFAULT_AUTHORITY_TIMEOUT: Duration = Duration::from_secs(3);

/// The resolved calling actor. Passed explicitly through every pipeline
/// call; there is no ambient or thread-local actor context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub kind: ActorKind,
    pub workspace_id: WorkspaceId,
}

/// Resolves inbound credentials against the authority and the directory.
///
/// Read-only: resolution has no side effects. Fails fast before any
/// transactional work starts downstream.
#[derive(Clone)]
pub struct ActorResolver {
    authority: Arc<dyn IdentityAuthority>,
    directory: Arc<dyn Directory>,
    authority_timeout: Duration,
}

impl ActorResolver {
    pub fn new(authority: Arc<dyn IdentityAuthority>, directory: Arc<dyn Directory>) -> Self {
        Self {
            authority,
            directory,
            authority_timeout: DEFAULT_AUTHORITY_TIMEOUT,
        }
    }

    pub fn with_authority_timeout(mut self, timeout: Duration) -> Self {
        self.authority_timeout = timeout;
        self
    }

    /// Resolve a credential into an actor.
    ///
    /// An agent identity resolves to the workspace its registration binds
    /// it to; a human identity resolves through membership lookup. Either
    /// way the workspace comes from here, never from the request payload.
    #[tracing::instrument(skip_all, err)]
    pub async fn resolve(&self, credential: &Credential) -> Result<Actor, AuthError> {
        let verified = tokio::time::timeout(self.authority_timeout, self.authority.verify(credential))
            .await
            .map_err(|_| {
                AuthError::Unavailable("identity authority timed out".to_string())
            })??;

        self.actor_for(verified.identity_id).await
    }

    async fn actor_for(&self, identity_id: Uuid) -> Result<Actor, AuthError> {
        if let Some(binding) = self.directory.agent_binding(identity_id).await? {
            return Ok(Actor {
                id: binding.actor_id,
                kind: ActorKind::Agent,
                workspace_id: binding.workspace_id,
            });
        }

        match self.directory.membership(identity_id).await? {
            Some(workspace_id) => Ok(Actor {
                id: ActorId::from_uuid(identity_id),
                kind: ActorKind::Human,
                workspace_id,
            }),
            None => Err(AuthError::NoWorkspace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::StaticAuthority;
    use crate::directory::{AgentBinding, StaticDirectory};

    fn resolver() -> (Arc<StaticAuthority>, Arc<StaticDirectory>, ActorResolver) {
        let authority = Arc::new(StaticAuthority::new());
        let directory = Arc::new(StaticDirectory::new());
        let resolver = ActorResolver::new(authority.clone(), directory.clone());
        (authority, directory, resolver)
    }

    #[tokio::test]
    async fn human_resolves_through_membership() {
        let (authority, directory, resolver) = resolver();
        let identity = Uuid::now_v7();
        let workspace = WorkspaceId::new();
        authority.issue("tok", identity);
        directory.add_member(identity, workspace);

        let actor = resolver.resolve(&Credential::new("tok")).await.unwrap();
        assert_eq!(actor.kind, ActorKind::Human);
        assert_eq!(actor.workspace_id, workspace);
        assert_eq!(actor.id, ActorId::from_uuid(identity));
    }

    #[tokio::test]
    async fn agent_resolves_through_its_binding() {
        let (authority, directory, resolver) = resolver();
        let identity = Uuid::now_v7();
        let binding = AgentBinding {
            actor_id: ActorId::new(),
            workspace_id: WorkspaceId::new(),
        };
        authority.issue("agent-tok", identity);
        directory.register_agent(identity, binding);

        let actor = resolver.resolve(&Credential::new("agent-tok")).await.unwrap();
        assert_eq!(actor.kind, ActorKind::Agent);
        assert_eq!(actor.id, binding.actor_id);
        assert_eq!(actor.workspace_id, binding.workspace_id);
    }

    #[tokio::test]
    async fn verified_identity_without_membership_gets_no_workspace() {
        let (authority, _directory, resolver) = resolver();
        let identity = Uuid::now_v7();
        authority.issue("tok", identity);

        let err = resolver.resolve(&Credential::new("tok")).await.unwrap_err();
        assert_eq!(err, AuthError::NoWorkspace);
    }

    #[tokio::test]
    async fn unknown_credential_is_unauthenticated() {
        let (_authority, _directory, resolver) = resolver();
        let err = resolver.resolve(&Credential::new("nope")).await.unwrap_err();
        assert_eq!(err, AuthError::Unauthenticated);
    }
}
