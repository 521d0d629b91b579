//! The security collaborator: contexts, capabilities, and policy checks.
//!
//! The core never evaluates policy itself; it builds contexts, caches
//! check results inside them, and asks the collaborator.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::{EntityId, Pid};

/// Capabilities a context can carry. The puppet-inheritable subset is
/// [`INHERITED_PUPPET_CAPABILITIES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SendTextRoomUnrestricted,
    SendTextEntity,
    FindCharacterByNameAfar,
    ConnectionCheck,
    RunPrograms,
    BuildEntities,
    Admin,
}

/// The capabilities a puppet agent may inherit from its owning player.
pub const INHERITED_PUPPET_CAPABILITIES: [Capability; 4] = [
    Capability::SendTextRoomUnrestricted,
    Capability::SendTextEntity,
    Capability::FindCharacterByNameAfar,
    Capability::ConnectionCheck,
];

/// How a context runs relative to its requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Admin,
    AsRequester,
    AsOther(EntityId),
}

/// Operations submitted to the security collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityOperation {
    UseAction,
    RunProgram,
    ReadProgram,
    WriteProgram,
    WriteDocument,
    CheckConnection,
}

/// A security context: who is asking, on whose behalf, with which
/// capabilities, plus a small local cache of prior check results.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    requester: EntityId,
    program: Option<EntityId>,
    pid: Option<Pid>,
    run_mode: RunMode,
    capabilities: HashSet<Capability>,
    cache: HashMap<(SecurityOperation, Option<EntityId>), bool>,
}

impl SecurityContext {
    pub fn new(requester: EntityId) -> Self {
        Self {
            requester,
            program: None,
            pid: None,
            run_mode: RunMode::AsRequester,
            capabilities: HashSet::new(),
            cache: HashMap::new(),
        }
    }

    pub fn with_program(mut self, program: EntityId) -> Self {
        self.program = Some(program);
        self
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn requester(&self) -> EntityId {
        self.requester
    }

    pub fn program(&self) -> Option<EntityId> {
        self.program
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn set_pid(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn grant(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }

    /// Drops every capability and cached result; used when a context goes
    /// stale or an agent deactivates.
    pub fn clear(&mut self) {
        self.capabilities.clear();
        self.cache.clear();
    }

    /// Restricts the capability set to the given subset; anything else is
    /// dropped. Used for puppet inheritance.
    pub fn restrict_to(&mut self, allowed: &[Capability]) {
        self.capabilities.retain(|cap| allowed.contains(cap));
    }

    /// Cached result of a prior check, if any.
    pub fn cached(&self, op: SecurityOperation, target: Option<EntityId>) -> Option<bool> {
        self.cache.get(&(op, target)).copied()
    }

    /// Records a check result. Implementations of the collaborator call
    /// this so repeated checks in one command stay cheap.
    pub fn cache_result(&mut self, op: SecurityOperation, target: Option<EntityId>, allowed: bool) {
        self.cache.insert((op, target), allowed);
    }
}

/// The security collaborator interface.
pub trait SecurityService: Send + Sync {
    /// Evaluates one operation against an optional target.
    fn security_check(
        &self,
        op: SecurityOperation,
        context: &mut SecurityContext,
        target: Option<EntityId>,
    ) -> bool;

    /// Fills in the context's capability set from durable policy.
    fn populate_context_capabilities(&self, context: &mut SecurityContext);
}
