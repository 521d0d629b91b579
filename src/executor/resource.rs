//! The process resource contract.
//!
//! A resource is anything external a process can use and (optionally) wait
//! on: most commonly a channel. Resources that want to be automatically
//! managed by the executor implement this trait.

use crate::types::{Pid, Rid};

/// Interface for a resource a process is using in some way.
///
/// Both hooks must be reentrant-safe: they may be called while the resource
/// itself is being manipulated by other threads.
pub trait ProcessResource: Send + Sync {
    /// Called when a process attaches this resource.
    ///
    /// The `resource_id` is unique for the given process; if a different
    /// process adds this resource, another identifier is issued. Returns
    /// false to refuse the attachment (for example, the resource supports
    /// only one process), in which case the executor rolls the identifier
    /// back and reports failure to the process.
    fn added_to_process(&self, process_id: Pid, resource_id: Rid) -> bool;

    /// Called when a process detaches this resource, either explicitly or
    /// because the process ended. Not called for refused attachments.
    ///
    /// `process_cleanup` is true when the removal is part of automatic
    /// teardown of a finished or killed process.
    fn removed_from_process(&self, process_id: Pid, resource_id: Rid, process_cleanup: bool);
}
