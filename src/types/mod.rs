//! Shared types: identifiers, errors, configuration.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{AgentConfig, Config, ExecutorConfig, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{EntityId, IdAllocator, Pid, Rid, SiteId};
