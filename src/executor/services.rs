//! The services handle given to a running process.
//!
//! Handed by reference into every execute call and the added/killed hooks,
//! it lets the process manipulate its own resource set. Resource hooks are
//! invoked synchronously and outside the scheduler's tables lock.

use std::sync::Arc;
use tracing::{debug, error};

use crate::executor::record::ProcessRecord;
use crate::executor::resource::ProcessResource;
use crate::executor::scheduler::Scheduler;
use crate::types::{Error, Pid, Result, Rid};

/// Mediates a process's own resource set.
#[derive(Debug)]
pub struct ProcessServices<'a> {
    record: &'a Arc<ProcessRecord>,
    scheduler: &'a Arc<Scheduler>,
}

impl<'a> ProcessServices<'a> {
    pub(crate) fn new(record: &'a Arc<ProcessRecord>, scheduler: &'a Arc<Scheduler>) -> Self {
        Self { record, scheduler }
    }

    /// The PID of the process these services belong to.
    pub fn pid(&self) -> Pid {
        self.record.pid()
    }

    /// The scheduler the process is running under, for spawning or
    /// messaging other processes.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.scheduler
    }

    /// Attaches a resource the process is using in some way, without
    /// participating in the blocked set.
    pub fn add_resource(&mut self, resource: Arc<dyn ProcessResource>) -> Result<Rid> {
        self.add_inner(resource, false)
    }

    /// Attaches a resource that participates in the default blocked set: a
    /// message from it can make the process ready while blocked.
    pub fn add_blocking_resource(&mut self, resource: Arc<dyn ProcessResource>) -> Result<Rid> {
        self.add_inner(resource, true)
    }

    fn add_inner(&mut self, resource: Arc<dyn ProcessResource>, blocking: bool) -> Result<Rid> {
        let pid = self.record.pid();

        let rid = self
            .scheduler
            .next_rid(pid)
            .ok_or_else(|| Error::capacity(format!("unable to get new RID for PID {pid}")))?;

        // Let the resource know first; it may refuse (for example, it only
        // supports one process).
        if !resource.added_to_process(pid, rid) {
            self.scheduler.release_rid(pid, rid);
            return Err(Error::refused(format!(
                "resource refused attachment to PID {pid}"
            )));
        }

        self.record.lock().add_resource(rid, resource, blocking);
        debug!(%pid, %rid, blocking, "resource added to process");
        Ok(rid)
    }

    /// Detaches a resource by RID. The removed hook is invoked after the
    /// RID has been detached, with `process_cleanup` false.
    pub fn remove_resource(&mut self, rid: Rid) -> bool {
        let pid = self.record.pid();

        let Some(resource) = self.record.lock().remove_resource(rid) else {
            error!(%pid, %rid, "remove_resource: RID not attached to process");
            return false;
        };

        resource.removed_from_process(pid, rid, false);
        self.scheduler.release_rid(pid, rid);
        true
    }

    /// Detaches a resource by handle identity. Less efficient than removal
    /// by RID.
    pub fn remove_resource_by_handle(&mut self, resource: &Arc<dyn ProcessResource>) -> bool {
        let pid = self.record.pid();

        let Some(rid) = self.record.lock().remove_resource_by_handle(resource) else {
            error!(%pid, "remove_resource_by_handle: resource not attached to process");
            return false;
        };

        resource.removed_from_process(pid, rid, false);
        self.scheduler.release_rid(pid, rid);
        true
    }
}
