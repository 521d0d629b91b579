//! Process stats snapshots for external display.

use serde::{Deserialize, Serialize};

use crate::executor::record::ProcessState;
use crate::types::{EntityId, Pid};

/// Point-in-time snapshot of one process, as returned by the scheduler's
/// query operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: Pid,
    pub name: String,
    pub owner: Option<EntityId>,
    pub executable: Option<EntityId>,
    pub state: ProcessState,
}
