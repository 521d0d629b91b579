//! The database collaborator: entity lookup, action resolution, and
//! document/program property access.

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, Result};

/// Coarse entity classification, as far as the agent subsystem cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Player,
    Puppet,
    Room,
    Exit,
    Command,
    Program,
    Other,
}

/// Metadata snapshot of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub name: String,
    pub owner: Option<EntityId>,
    pub location: Option<EntityId>,
}

/// Outcome of resolving a command string against the action namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResolution {
    /// The command named an action the requester can see.
    Action(EntityInfo),
    /// An action matched but security policy denied access.
    Denied,
    /// Nothing matched.
    NotFound,
}

/// The database collaborator interface.
///
/// Implementations live outside the core; the agent subsystem consumes
/// this, the scheduler never does.
pub trait WorldStore: Send + Sync {
    /// Entity metadata lookup.
    fn entity(&self, id: EntityId) -> Option<EntityInfo>;

    /// Resolves a command against the action namespace, from the
    /// requester's point of view at their current location.
    fn resolve_action(
        &self,
        requester: EntityId,
        location: Option<EntityId>,
        command: &str,
    ) -> ActionResolution;

    /// All puppet entities owned by the given player.
    fn puppets_owned_by(&self, owner: EntityId) -> Vec<EntityInfo>;

    /// Source lines of a program entity.
    fn program_source(&self, program: EntityId) -> Option<Vec<String>>;

    /// Replaces the source of a program entity.
    fn set_program_source(&self, program: EntityId, lines: Vec<String>) -> Result<()>;

    /// The language tag of a program entity, used to pick its interpreter.
    fn program_language(&self, program: EntityId) -> Option<String>;

    /// Reads a document property off an entity.
    fn document_property(&self, entity: EntityId, property: &str) -> Option<Vec<String>>;

    /// Writes a document property. Writing an empty document is the
    /// redirect validity probe: it must fail where a real write would.
    fn set_document_property(
        &self,
        entity: EntityId,
        property: &str,
        lines: Vec<String>,
    ) -> Result<()>;
}
