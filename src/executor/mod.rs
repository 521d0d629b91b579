//! The process executor: scheduler, worker pool, and the contracts that
//! bind processes and resources to them.
//!
//! Execution is cooperative. Processes are callback objects that run until
//! they return a status; the scheduler queues them, delivers their
//! messages, handles sleep/wait/block/kill transitions, and enforces safe
//! teardown. Nothing here knows about the world model beyond opaque entity
//! identifiers used for grouping.

pub mod message;
pub mod process;
pub mod record;
pub mod resource;
pub mod scheduler;
pub mod services;
pub mod stats;
pub mod worker;

pub use message::{FlowStatus, MessageCategory, ProcessMessage};
pub use process::{Process, ProcessStatus};
pub use record::{ProcessRecord, ProcessState};
pub use resource::ProcessResource;
pub use scheduler::{NextExecute, Scheduler};
pub use services::ProcessServices;
pub use stats::ProcessStats;
pub use worker::{Executor, WorkerPool};
