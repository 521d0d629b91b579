//! Per-process bookkeeping: state, pending flags, message queue, resources.
//!
//! A [`ProcessRecord`] is the scheduler's container for one live process.
//! The callback object and the bookkeeping live behind separate locks so a
//! long-running execute call never blocks table maintenance. Lock order is
//! scheduler tables, then record state; the record state guard is the
//! explicit token long-lived callers hold across several operations.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::executor::message::ProcessMessage;
use crate::executor::process::Process;
use crate::executor::resource::ProcessResource;
use crate::types::{EntityId, Pid, Rid};

/// State of a process as the scheduler sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Currently being executed on a worker thread.
    Executing,
    /// Eligible to run, waiting in the ready queue.
    Ready,
    /// Waiting for any message to come in.
    WaitMessage,
    /// Sleeping until a wake instant, but messages still wake it.
    Sleeping,
    /// Cannot execute, cannot get messages, cannot wake up.
    Suspended,
    /// Blocked waiting on its resources to provide data.
    Blocked,
    /// Being examined by the scheduler between states.
    Scheduling,
    /// Being killed; no new messages accepted.
    Killed,
    /// Finished executing (killed or not).
    Completed,
    /// Initial state; must be started before it runs.
    Created,
}

impl ProcessState {
    /// True for states in which the process accepts no new messages.
    pub fn refuses_messages(self) -> bool {
        matches!(
            self,
            ProcessState::Suspended | ProcessState::Killed | ProcessState::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Executing => "executing",
            ProcessState::Ready => "ready",
            ProcessState::WaitMessage => "wait_message",
            ProcessState::Sleeping => "sleeping",
            ProcessState::Suspended => "suspended",
            ProcessState::Blocked => "blocked",
            ProcessState::Scheduling => "scheduling",
            ProcessState::Killed => "killed",
            ProcessState::Completed => "completed",
            ProcessState::Created => "created",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping for one process, guarded by the record's state lock.
pub(crate) struct RecordState {
    pub state: ProcessState,
    pub pending_kill: bool,
    pub pending_suspend: bool,
    /// Absolute wake instant on the steady clock, if sleeping.
    pub wakeup: Option<Instant>,
    /// FIFO of waiting messages; the RID is the sending resource, if any.
    pub messages: VecDeque<(Option<Rid>, ProcessMessage)>,
    /// Every resource the process is using.
    pub resources: HashMap<Rid, Arc<dyn ProcessResource>>,
    /// Template blocked set: the RIDs the process blocks on when it
    /// re-enters the blocked state.
    pub default_blocked: BTreeSet<Rid>,
    /// RIDs still being waited on; shrinks as resources deliver messages.
    pub blocked_waiting: BTreeSet<Rid>,
}

impl RecordState {
    /// Appends a message; a resource-sent message shrinks the current
    /// blocked set.
    pub fn push_message(&mut self, rid: Option<Rid>, message: ProcessMessage) {
        if let Some(rid) = rid {
            self.blocked_waiting.remove(&rid);
        }
        self.messages.push_back((rid, message));
    }

    /// Pops the next waiting message.
    pub fn pop_message(&mut self) -> Option<(Option<Rid>, ProcessMessage)> {
        self.messages.pop_front()
    }

    pub fn messages_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Registers a resource under the given RID.
    pub fn add_resource(&mut self, rid: Rid, resource: Arc<dyn ProcessResource>, blocking: bool) {
        self.resources.insert(rid, resource);
        if blocking {
            self.default_blocked.insert(rid);
        }
    }

    /// Detaches a resource by RID, dropping it from both blocked sets.
    pub fn remove_resource(&mut self, rid: Rid) -> Option<Arc<dyn ProcessResource>> {
        self.default_blocked.remove(&rid);
        self.blocked_waiting.remove(&rid);
        self.resources.remove(&rid)
    }

    /// Detaches a resource by handle identity.
    pub fn remove_resource_by_handle(&mut self, handle: &Arc<dyn ProcessResource>) -> Option<Rid> {
        let rid = self
            .resources
            .iter()
            .find(|(_, res)| Arc::ptr_eq(res, handle))
            .map(|(rid, _)| *rid)?;
        self.remove_resource(rid);
        Some(rid)
    }

    /// Drains every resource for teardown, returning `(rid, resource)`
    /// pairs. The removed-hooks are invoked by the caller outside any lock.
    pub fn take_resources(&mut self) -> Vec<(Rid, Arc<dyn ProcessResource>)> {
        self.default_blocked.clear();
        self.blocked_waiting.clear();
        self.resources.drain().collect()
    }

    /// Re-populates the current blocked set from the template.
    pub fn reset_blocked(&mut self) {
        self.blocked_waiting = self.default_blocked.clone();
    }

    pub fn blocked_empty(&self) -> bool {
        self.blocked_waiting.is_empty()
    }
}

/// The scheduler's container for one live process.
pub struct ProcessRecord {
    pid: Pid,
    executable: Option<EntityId>,
    owner: Option<EntityId>,
    /// Snapshot of the process name, taken at admission.
    name: Mutex<String>,
    /// The callback object. Held only while a hook is being invoked.
    process: Mutex<Box<dyn Process>>,
    state: Mutex<RecordState>,
}

impl ProcessRecord {
    pub(crate) fn new(
        pid: Pid,
        process: Box<dyn Process>,
        executable: Option<EntityId>,
        owner: Option<EntityId>,
    ) -> Self {
        Self {
            pid,
            executable,
            owner,
            name: Mutex::new(String::new()),
            process: Mutex::new(process),
            state: Mutex::new(RecordState {
                state: ProcessState::Created,
                pending_kill: false,
                pending_suspend: false,
                wakeup: None,
                messages: VecDeque::new(),
                resources: HashMap::new(),
                default_blocked: BTreeSet::new(),
                blocked_waiting: BTreeSet::new(),
            }),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn executable(&self) -> Option<EntityId> {
        self.executable
    }

    pub fn owner(&self) -> Option<EntityId> {
        self.owner
    }

    /// The admission-time name snapshot.
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.lock() = name;
    }

    /// Locks the callback object. Only one hook runs at a time.
    pub(crate) fn process(&self) -> MutexGuard<'_, Box<dyn Process>> {
        self.process.lock()
    }

    /// Locks the bookkeeping state. The guard is the write token; hold it
    /// across several operations when consistency matters.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock()
    }

    /// Single-shot state read.
    pub fn state(&self) -> ProcessState {
        self.state.lock().state
    }

    /// Single-shot message-queue emptiness check.
    pub fn messages_empty(&self) -> bool {
        self.state.lock().messages_empty()
    }
}

impl fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRecord")
            .field("pid", &self.pid)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordState")
            .field("state", &self.state)
            .field("pending_kill", &self.pending_kill)
            .field("pending_suspend", &self.pending_suspend)
            .field("messages", &self.messages.len())
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::process::ProcessStatus;
    use crate::executor::services::ProcessServices;

    struct Inert;

    impl Process for Inert {
        fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
            ProcessStatus::Finished
        }

        fn name(&self, _pid: Pid) -> String {
            "inert".to_string()
        }
    }

    struct NullResource;

    impl ProcessResource for NullResource {
        fn added_to_process(&self, _pid: Pid, _rid: Rid) -> bool {
            true
        }

        fn removed_from_process(&self, _pid: Pid, _rid: Rid, _cleanup: bool) {}
    }

    fn record() -> ProcessRecord {
        ProcessRecord::new(Pid::new(1), Box::new(Inert), None, None)
    }

    #[test]
    fn test_resource_message_shrinks_blocked_set() {
        let record = record();
        let mut st = record.lock();
        let res: Arc<dyn ProcessResource> = Arc::new(NullResource);
        st.add_resource(Rid::new(1), res.clone(), true);
        st.add_resource(Rid::new(2), res, true);
        st.reset_blocked();
        assert!(!st.blocked_empty());

        st.push_message(Some(Rid::new(1)), ProcessMessage::Generic);
        assert!(!st.blocked_empty());

        st.push_message(Some(Rid::new(2)), ProcessMessage::Generic);
        assert!(st.blocked_empty());
    }

    #[test]
    fn test_blocked_waiting_is_subset_of_default() {
        let record = record();
        let mut st = record.lock();
        let res: Arc<dyn ProcessResource> = Arc::new(NullResource);
        st.add_resource(Rid::new(1), res.clone(), true);
        st.add_resource(Rid::new(2), res.clone(), false);
        st.reset_blocked();

        assert!(st.blocked_waiting.is_subset(&st.default_blocked));
        assert!(!st.blocked_waiting.contains(&Rid::new(2)));

        st.add_resource(Rid::new(3), res, true);
        st.reset_blocked();
        assert!(st.blocked_waiting.is_subset(&st.default_blocked));
        assert_eq!(st.blocked_waiting.len(), 2);
    }

    #[test]
    fn test_remove_resource_drops_from_both_sets() {
        let record = record();
        let mut st = record.lock();
        let res: Arc<dyn ProcessResource> = Arc::new(NullResource);
        st.add_resource(Rid::new(7), res, true);
        st.reset_blocked();

        assert!(st.remove_resource(Rid::new(7)).is_some());
        assert!(st.default_blocked.is_empty());
        assert!(st.blocked_waiting.is_empty());
        assert!(st.remove_resource(Rid::new(7)).is_none());
    }

    #[test]
    fn test_remove_resource_by_handle_finds_rid() {
        let record = record();
        let mut st = record.lock();
        let res: Arc<dyn ProcessResource> = Arc::new(NullResource);
        let other: Arc<dyn ProcessResource> = Arc::new(NullResource);
        st.add_resource(Rid::new(4), res.clone(), false);

        assert_eq!(st.remove_resource_by_handle(&other), None);
        assert_eq!(st.remove_resource_by_handle(&res), Some(Rid::new(4)));
    }

    #[test]
    fn test_messages_fifo_order() {
        let record = record();
        let mut st = record.lock();
        st.push_message(
            None,
            ProcessMessage::Interprocess {
                subtype: "a".to_string(),
                source: None,
                payload: serde_json::Value::Null,
            },
        );
        st.push_message(None, ProcessMessage::Generic);

        match st.pop_message() {
            Some((None, ProcessMessage::Interprocess { subtype, .. })) => {
                assert_eq!(subtype, "a");
            }
            other => panic!("unexpected message: {:?}", other.map(|(r, m)| (r, m.category()))),
        }
        assert!(matches!(
            st.pop_message(),
            Some((None, ProcessMessage::Generic))
        ));
        assert!(st.pop_message().is_none());
    }
}
