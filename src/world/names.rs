//! The name-registry collaborator: fast lookup of online characters.
//!
//! The registry itself lives outside the core; the agent subsystem keeps
//! it current through the entity name manager.

use crate::types::EntityId;
use crate::world::store::EntityType;

/// Registry of the names of currently connected players and their
/// puppets.
pub trait NameRegistry: Send + Sync {
    /// Registers or re-registers a name. Returns false when the entry
    /// could not be added.
    fn register_name(&self, entity: EntityId, name: &str, entity_type: EntityType) -> bool;

    /// Removes an entity's name, if present.
    fn unregister_name(&self, entity: EntityId);

    /// Updates the name of an already-registered entity; a no-op for
    /// unregistered entities.
    fn update_name(&self, entity: EntityId, name: &str);
}
