//! The movement collaborator: taking an entity through an exit.

use crate::types::{EntityId, Result};
use crate::world::security::SecurityContext;

/// The movement collaborator interface.
pub trait MovementService: Send + Sync {
    /// Moves `who` through `exit`, subject to policy. Movement events are
    /// published by the implementation.
    fn move_through_exit(
        &self,
        context: &mut SecurityContext,
        who: EntityId,
        exit: EntityId,
    ) -> Result<()>;
}
