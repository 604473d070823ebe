//! Agent registration and workspace membership lookups.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use agentbase_core::{ActorId, WorkspaceId};

use crate::error::AuthError;

/// An autonomous agent's registration: the actor it runs as and the
/// workspace it is bound to act in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AgentBinding {
    pub actor_id: ActorId,
    pub workspace_id: WorkspaceId,
}

/// Membership directory: who is an agent, and which workspace an identity
/// belongs to. Read-only from the pipeline's point of view.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Returns the agent binding when this identity is a registered
    /// autonomous agent, `None` for humans.
    async fn agent_binding(&self, identity_id: Uuid) -> Result<Option<AgentBinding>, AuthError>;

    /// A human identity's workspace membership, `None` when it has none.
    async fn membership(&self, identity_id: Uuid) -> Result<Option<WorkspaceId>, AuthError>;
}

/// In-memory directory for dev and tests.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    agents: RwLock<HashMap<Uuid, AgentBinding>>,
    members: RwLock<HashMap<Uuid, WorkspaceId>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_agent(&self, identity_id: Uuid, binding: AgentBinding) {
        self.agents
            .write()
            .expect("agent table poisoned")
            .insert(identity_id, binding);
    }

    pub fn add_member(&self, identity_id: Uuid, workspace_id: WorkspaceId) {
        self.members
            .write()
            .expect("member table poisoned")
            .insert(identity_id, workspace_id);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn agent_binding(&self, identity_id: Uuid) -> Result<Option<AgentBinding>, AuthError> {
        let agents = self
            .agents
            .read()
            .map_err(|_| AuthError::Unavailable("agent table poisoned".to_string()))?;
        Ok(agents.get(&identity_id).copied())
    }

    async fn membership(&self, identity_id: Uuid) -> Result<Option<WorkspaceId>, AuthError> {
        let members = self
            .members
            .read()
            .map_err(|_| AuthError::Unavailable("member table poisoned".to_string()))?;
        Ok(members.get(&identity_id).copied())
    }
}
