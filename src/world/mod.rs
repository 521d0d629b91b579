//! World-model collaborator interfaces and the context bundle that carries
//! them.
//!
//! The original design reached these subsystems through global singletons;
//! here they are explicit dependencies passed in at construction of the
//! agent subsystem. Implementations are out of scope for the core.

use std::fmt;
use std::sync::Arc;

pub mod comm;
pub mod movement;
pub mod names;
pub mod security;
pub mod softcode;
pub mod store;

pub use comm::{CommService, SessionChannel, SessionStats};
pub use movement::MovementService;
pub use names::NameRegistry;
pub use security::{
    Capability, RunMode, SecurityContext, SecurityOperation, SecurityService,
    INHERITED_PUPPET_CAPABILITIES,
};
pub use softcode::{Interpreter, SoftcodeRegistry, SoftcodeService};
pub use store::{ActionResolution, EntityInfo, EntityType, WorldStore};

use crate::events::EventBus;
use crate::executor::scheduler::Scheduler;
use crate::types::AgentConfig;

/// Everything an agent needs to talk to the rest of the server. Cloning is
/// cheap; all members are shared handles.
#[derive(Clone)]
pub struct WorldContext {
    pub scheduler: Arc<Scheduler>,
    pub events: Arc<dyn EventBus>,
    pub store: Arc<dyn WorldStore>,
    pub security: Arc<dyn SecurityService>,
    pub softcode: Arc<dyn SoftcodeService>,
    pub comm: Arc<dyn CommService>,
    pub movement: Arc<dyn MovementService>,
    pub names: Arc<dyn NameRegistry>,
    pub agent_config: AgentConfig,
}

impl fmt::Debug for WorldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldContext")
            .field("agent_config", &self.agent_config)
            .finish_non_exhaustive()
    }
}
