//! The process scheduler.
//!
//! Owns the process table, the owner index, the timer queue, and the
//! identifier allocators; drives every state transition. The scheduler does
//! not execute processes itself; the worker pool calls [`Scheduler::next_execute`]
//! and [`Scheduler::returned_from_execute`] around each callback invocation.
//!
//! Locking discipline: one mutex guards the tables, each record guards its
//! own state, and the order is always tables before record state. Both
//! locks are released before any process callback, resource hook, or event
//! publication runs.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventBus, ProcessExecutionEvent};
use crate::executor::message::ProcessMessage;
use crate::executor::process::{Process, ProcessStatus};
use crate::executor::record::{ProcessRecord, ProcessState};
use crate::executor::services::ProcessServices;
use crate::executor::stats::ProcessStats;
use crate::types::{EntityId, ExecutorConfig, IdAllocator, Pid, Rid, SiteId};

/// Ready-queue entry. `Wake` breaks a worker out of its timed wait without
/// handing it a process; the time-jump hook injects one.
enum QueueItem {
    Run(Arc<ProcessRecord>),
    Wake,
}

/// What a worker gets back from [`Scheduler::next_execute`].
#[derive(Debug)]
pub struct NextExecute {
    /// The process to run, or `None` if nothing became ready this poll.
    pub process: Option<Arc<ProcessRecord>>,
    /// True when the returned process is being killed; the worker invokes
    /// the killed hook instead of a normal execute.
    pub is_killed: bool,
    /// Set when nothing was returned and the scheduler is shutting down; a
    /// hint that the caller should terminate its loop.
    pub shutting_down: bool,
}

type OwnerIndex = HashMap<SiteId, HashMap<u64, Vec<Arc<ProcessRecord>>>>;

struct Tables {
    shutting_down: bool,
    processes: HashMap<Pid, Arc<ProcessRecord>>,
    by_owner: OwnerIndex,
    /// Sleeping processes keyed by wake instant; the composite key keeps
    /// removal exact when several processes share an instant.
    timers: BTreeMap<(Instant, Pid), Arc<ProcessRecord>>,
    pid_alloc: IdAllocator,
    rid_alloc: IdAllocator,
    rid_to_pid: HashMap<Rid, Pid>,
}

impl Tables {
    fn release_rid(&mut self, pid: Pid, rid: Rid) {
        match self.rid_to_pid.get(&rid) {
            None => {
                error!(%rid, "release_rid: unknown RID");
            }
            Some(owner) if *owner != pid => {
                error!(%pid, %rid, "release_rid: RID not owned by PID");
            }
            Some(_) => {
                self.rid_to_pid.remove(&rid);
            }
        }
    }
}

fn owner_key(owner: Option<EntityId>) -> (SiteId, u64) {
    owner.map(|o| (o.site(), o.entity())).unwrap_or((0, 0))
}

/// The scheduler. Thread safe; every method can be called at any time,
/// including from inside an executing process.
pub struct Scheduler {
    tables: Mutex<Tables>,
    ready_tx: Sender<QueueItem>,
    ready_rx: Receiver<QueueItem>,
    event_bus: Arc<dyn EventBus>,
    config: ExecutorConfig,
}

impl Scheduler {
    pub fn new(config: ExecutorConfig, event_bus: Arc<dyn EventBus>) -> Arc<Self> {
        // Slack beyond the process bound so Wake tokens never hit capacity.
        let capacity = config.max_processes as usize + 64;
        let (ready_tx, ready_rx) = bounded(capacity);

        Arc::new(Self {
            tables: Mutex::new(Tables {
                shutting_down: false,
                processes: HashMap::new(),
                by_owner: HashMap::new(),
                timers: BTreeMap::new(),
                pid_alloc: IdAllocator::new(config.max_processes),
                rid_alloc: IdAllocator::new(u32::MAX - 1),
                rid_to_pid: HashMap::new(),
            }),
            ready_tx,
            ready_rx,
            event_bus,
            config,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.event_bus
    }

    /// Adds a process without running it; [`Scheduler::start_process`] runs
    /// it when ready. The added hook is invoked before this returns, so the
    /// process can register resources up front.
    ///
    /// Returns `None` on saturation or shutdown.
    pub fn add_process(
        self: &Arc<Self>,
        process: Box<dyn Process>,
        executable: Option<EntityId>,
        owner: Option<EntityId>,
    ) -> Option<Pid> {
        let record = {
            let mut t = self.tables.lock();
            if t.shutting_down {
                debug!("add_process: rejected, shutting down");
                return None;
            }

            let tables = &mut *t;
            let processes = &tables.processes;
            let raw = match tables
                .pid_alloc
                .allocate(processes.len(), |c| processes.contains_key(&Pid::new(c)))
            {
                Some(raw) => raw,
                None => {
                    error!("add_process: no more PIDs available");
                    return None;
                }
            };
            let pid = Pid::new(raw);

            let record = Arc::new(ProcessRecord::new(pid, process, executable, owner));
            t.processes.insert(pid, record.clone());
            let (site, entity) = owner_key(owner);
            t.by_owner
                .entry(site)
                .or_default()
                .entry(entity)
                .or_default()
                .push(record.clone());
            record
        };

        let pid = record.pid();
        let name = record.process().name(pid);
        record.set_name(name.clone());

        // Outside the lock: let the process register resources, then tell
        // interested listeners about the creation.
        {
            let mut services = ProcessServices::new(&record, self);
            record.process().added(pid, &mut services);
        }

        self.event_bus
            .publish(Event::ProcessExecution(ProcessExecutionEvent {
                pid,
                executable,
                owner,
                name,
                state: ProcessState::Created,
            }));

        debug!(%pid, "process added");
        Some(pid)
    }

    /// Requests a polite kill: the process is notified via its killed hook
    /// and then torn down. Idempotent; repeated kills of a dying process
    /// succeed without additional teardown.
    pub fn kill_process(&self, pid: Pid) -> bool {
        let mut events = Vec::new();
        let found = {
            let mut t = self.tables.lock();
            match t.processes.get(&pid).cloned() {
                None => false,
                Some(record) => {
                    let state = record.state();
                    if state != ProcessState::Killed && state != ProcessState::Completed {
                        record.lock().pending_kill = true;
                        self.schedule_locked(&record, &mut t, &mut events);
                    }
                    true
                }
            }
        };
        self.publish_all(events);
        found
    }

    /// Requests suspension. While suspended the process receives no
    /// messages and no wakeups, and its message queue is cleared.
    pub fn suspend_process(&self, pid: Pid) -> bool {
        let mut t = self.tables.lock();
        if t.shutting_down {
            return false;
        }
        let Some(record) = t.processes.get(&pid).cloned() else {
            return false;
        };

        let mut st = record.lock();
        match st.state {
            // In the queue or on a worker; defer until the scheduler next
            // touches the record.
            ProcessState::Ready | ProcessState::Executing | ProcessState::Killed => {
                st.pending_suspend = true;
            }
            _ => {
                st.pending_suspend = false;
                if st.state == ProcessState::Sleeping {
                    if let Some(wake) = st.wakeup {
                        t.timers.remove(&(wake, pid));
                    }
                }
                st.state = ProcessState::Suspended;
                st.messages.clear();
            }
        }
        true
    }

    /// Starts an added process or resumes a suspended one. Other states are
    /// ignored without error.
    pub fn start_process(&self, pid: Pid) -> bool {
        let mut events = Vec::new();
        let result = {
            let mut t = self.tables.lock();
            if t.shutting_down {
                return false;
            }
            match t.processes.get(&pid).cloned() {
                None => false,
                Some(record) => {
                    if matches!(
                        record.state(),
                        ProcessState::Created | ProcessState::Suspended
                    ) {
                        self.schedule_locked(&record, &mut t, &mut events);
                    }
                    true
                }
            }
        };
        self.publish_all(events);
        result
    }

    /// Sends a message to a process (not from a resource). On failure the
    /// message is dropped.
    pub fn send_message(&self, pid: Pid, message: ProcessMessage) -> bool {
        self.send_internal(pid, None, message)
    }

    /// Sends a message to a process via a resource it registered. The RID
    /// must be one of the process's current resources or the call fails.
    pub fn send_message_from(&self, pid: Pid, rid: Rid, message: ProcessMessage) -> bool {
        self.send_internal(pid, Some(rid), message)
    }

    fn send_internal(&self, pid: Pid, rid: Option<Rid>, message: ProcessMessage) -> bool {
        let mut events = Vec::new();
        let result = {
            let mut t = self.tables.lock();

            let Some(record) = t.processes.get(&pid).cloned() else {
                error!(%pid, "send_message: PID not found, dropping message");
                return false;
            };

            let need_schedule = {
                let mut st = record.lock();

                if t.shutting_down || st.state.refuses_messages() {
                    debug!(%pid, state = %st.state, "send_message: process cannot receive, dropping");
                    return false;
                }

                if let Some(rid) = rid {
                    if !st.resources.contains_key(&rid) {
                        error!(%pid, %rid, "send_message: RID not a resource of process");
                        return false;
                    }
                }

                st.push_message(rid, message);

                match (rid, st.state) {
                    // Without a RID, a blocked process cannot have its wait
                    // list reduced, so it cannot become ready from this.
                    (None, ProcessState::Blocked) | (_, ProcessState::Created) => false,
                    // With a RID, a blocked process becomes ready only once
                    // everything it blocks on has delivered.
                    (Some(_), ProcessState::Blocked) => st.blocked_empty(),
                    _ => true,
                }
            };

            if need_schedule {
                self.schedule_locked(&record, &mut t, &mut events);
            }
            true
        };
        self.publish_all(events);
        result
    }

    /// All PIDs owned by the given entity.
    pub fn pids_for_owner(&self, owner: EntityId) -> Vec<Pid> {
        let t = self.tables.lock();
        t.by_owner
            .get(&owner.site())
            .and_then(|entities| entities.get(&owner.entity()))
            .map(|records| records.iter().map(|r| r.pid()).collect())
            .unwrap_or_default()
    }

    /// All PIDs at the given site.
    pub fn pids_for_site(&self, site: SiteId) -> Vec<Pid> {
        let t = self.tables.lock();
        t.by_owner
            .get(&site)
            .map(|entities| {
                entities
                    .values()
                    .flat_map(|records| records.iter().map(|r| r.pid()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stats snapshot for one process.
    pub fn process_stats(&self, pid: Pid) -> Option<ProcessStats> {
        let record = self.tables.lock().processes.get(&pid).cloned()?;
        Some(Self::stats_of(&record))
    }

    /// Stats snapshots for every process at a site.
    pub fn process_stats_for_site(&self, site: SiteId) -> Vec<ProcessStats> {
        let records: Vec<Arc<ProcessRecord>> = {
            let t = self.tables.lock();
            t.by_owner
                .get(&site)
                .map(|entities| entities.values().flatten().cloned().collect())
                .unwrap_or_default()
        };
        records.iter().map(Self::stats_of).collect()
    }

    fn stats_of(record: &Arc<ProcessRecord>) -> ProcessStats {
        ProcessStats {
            pid: record.pid(),
            name: record.name(),
            owner: record.owner(),
            executable: record.executable(),
            state: record.state(),
        }
    }

    /// Number of live processes.
    pub fn process_count(&self) -> usize {
        self.tables.lock().processes.len()
    }

    /// Kills every process owned by the given entity.
    pub fn cleanup_for_owner(&self, owner: EntityId) -> usize {
        let pids = self.pids_for_owner(owner);
        let count = pids.len();
        for pid in pids {
            self.kill_process(pid);
        }
        count
    }

    /// Called by a worker to obtain the next process to run. Wakes due
    /// sleepers first, then waits on the ready queue up to the configured
    /// poll period or the next timer, whichever is sooner.
    ///
    /// Also performs housekeeping, so it must be called frequently. Safe to
    /// call from multiple threads.
    pub fn next_execute(&self) -> NextExecute {
        let mut events = Vec::new();
        let (shutting_down, next_timer) = {
            let mut t = self.tables.lock();
            let now = Instant::now();

            // Wake anything whose instant has passed. Popping invalidates
            // nothing; schedule_locked tolerates the missing timer entry.
            while let Some(entry) = t.timers.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                let (_, record) = entry.remove_entry();
                self.schedule_locked(&record, &mut t, &mut events);
            }

            let next_timer = t.timers.keys().next().map(|(when, _)| *when);
            (t.shutting_down, next_timer)
        };
        self.publish_all(events);

        let mut timeout = self.config.ready_poll;
        if let Some(when) = next_timer {
            timeout = timeout.min(when.saturating_duration_since(Instant::now()));
        }

        match self.ready_rx.recv_timeout(timeout) {
            Ok(QueueItem::Run(record)) => {
                let is_killed = {
                    let mut st = record.lock();
                    let is_killed = st.state == ProcessState::Killed;
                    st.state = ProcessState::Executing;
                    is_killed
                };
                NextExecute {
                    process: Some(record),
                    is_killed,
                    shutting_down: false,
                }
            }
            Ok(QueueItem::Wake) | Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                NextExecute {
                    process: None,
                    is_killed: false,
                    shutting_down,
                }
            }
        }
    }

    /// Consumes a worker's execution result and transitions the process.
    /// Once this returns, the worker can go back to `next_execute`.
    pub fn returned_from_execute(self: &Arc<Self>, record: &Arc<ProcessRecord>, status: ProcessStatus) {
        let pid = record.pid();

        match status {
            ProcessStatus::Finished => {
                self.teardown(record);
                return;
            }
            ProcessStatus::Error => {
                let errors = record.process().error_text(pid);
                warn!(
                    %pid,
                    name = %record.name(),
                    errors = %errors.join("; "),
                    "process finished with error"
                );
                self.event_bus
                    .publish(Event::ProcessExecution(ProcessExecutionEvent {
                        pid,
                        executable: record.executable(),
                        owner: record.owner(),
                        name: record.name(),
                        state: ProcessState::Killed,
                    }));
                self.teardown(record);
                return;
            }
            _ => {}
        }

        // Consult the callback before taking any scheduler lock.
        let sleep_request = if status == ProcessStatus::Sleep {
            record.process().sleep_duration(pid)
        } else {
            None
        };

        let mut events = Vec::new();
        {
            let mut t = self.tables.lock();
            let mut reschedule = false;
            let mut suspended = false;

            {
                let mut st = record.lock();
                st.state = ProcessState::Scheduling;

                if st.pending_kill {
                    // schedule_locked finishes the kill.
                    reschedule = true;
                } else if status == ProcessStatus::Suspended || st.pending_suspend {
                    st.pending_suspend = false;
                    st.state = ProcessState::Suspended;
                    // Suspended processes can't get messages.
                    st.messages.clear();
                    suspended = true;
                }

                // Wants more work, or messages arrived while executing.
                if !suspended && !reschedule && (status == ProcessStatus::ExecuteMore || !st.messages_empty())
                {
                    reschedule = true;
                }

                if !suspended && !reschedule && status == ProcessStatus::Sleep {
                    match sleep_request {
                        Some(duration) => {
                            let wake = Instant::now() + duration;
                            st.wakeup = Some(wake);
                            t.timers.insert((wake, pid), record.clone());
                            st.state = ProcessState::Sleeping;
                        }
                        None => {
                            error!(%pid, "invalid sleep request, killing process");
                            st.pending_kill = true;
                            reschedule = true;
                        }
                    }
                } else if !suspended && !reschedule && status == ProcessStatus::WaitMessage {
                    st.state = ProcessState::WaitMessage;
                } else if status == ProcessStatus::Blocked {
                    st.reset_blocked();
                    if !suspended && !reschedule {
                        st.state = ProcessState::Blocked;
                    }
                }
            }

            if reschedule {
                self.schedule_locked(record, &mut t, &mut events);
            }
        }
        self.publish_all(events);
    }

    /// Hands out the next RID for a process.
    pub fn next_rid(&self, pid: Pid) -> Option<Rid> {
        let mut t = self.tables.lock();
        if !t.processes.contains_key(&pid) {
            error!(%pid, "next_rid: unknown PID");
            return None;
        }
        let tables = &mut *t;
        let rid_to_pid = &tables.rid_to_pid;
        let raw = match tables
            .rid_alloc
            .allocate(rid_to_pid.len(), |c| rid_to_pid.contains_key(&Rid::new(c)))
        {
            Some(raw) => raw,
            None => {
                error!("next_rid: no more RIDs available");
                return None;
            }
        };
        let rid = Rid::new(raw);
        t.rid_to_pid.insert(rid, pid);
        Some(rid)
    }

    /// Marks a RID obtained with [`Scheduler::next_rid`] as no longer in
    /// use.
    pub fn release_rid(&self, pid: Pid, rid: Rid) {
        self.tables.lock().release_rid(pid, rid);
    }

    /// True while a RID is assigned; test and diagnostic hook.
    pub fn rid_is_live(&self, rid: Rid) -> bool {
        self.tables.lock().rid_to_pid.contains_key(&rid)
    }

    /// Stops accepting new processes and messages, kills everything, and
    /// returns once the process table is empty. Workers must still be
    /// draining the ready queue; do not call this from a worker thread.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        let pids: Vec<Pid> = {
            let mut t = self.tables.lock();
            if t.shutting_down {
                Vec::new()
            } else {
                t.shutting_down = true;
                t.processes.keys().copied().collect()
            }
        };

        info!(count = pids.len(), "killing all processes");
        for pid in pids {
            self.kill_process(pid);
        }

        loop {
            if self.tables.lock().processes.is_empty() {
                break;
            }
            std::thread::sleep(self.config.shutdown_poll);
        }
        info!("scheduler shutdown complete");
    }

    /// True once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.tables.lock().shutting_down
    }

    /// Hook for large system time jumps. The steady clock makes forward
    /// jumps harmless; a backward jump may over-extend one worker's wait,
    /// so break a single worker loose. The rest recover as work arrives.
    pub fn time_jumped(&self, backwards: bool) {
        if backwards {
            if let Err(err) = self.ready_tx.try_send(QueueItem::Wake) {
                warn!(%err, "time_jumped: could not inject wake token");
            }
        }
    }

    /// Ensures the process is queued for execution, honoring the pending
    /// kill flag. No-op when the process is already queued or executing.
    /// Caller holds the tables lock and publishes `events` after releasing
    /// it.
    fn schedule_locked(
        &self,
        record: &Arc<ProcessRecord>,
        t: &mut Tables,
        events: &mut Vec<Event>,
    ) {
        let pid = record.pid();
        let mut st = record.lock();

        let pending_kill = st.pending_kill;
        let in_queue = matches!(st.state, ProcessState::Killed | ProcessState::Ready);
        let executing = st.state == ProcessState::Executing;
        let sleeping = st.state == ProcessState::Sleeping;

        // An executing process is handled when it returns.
        if pending_kill && !executing {
            st.state = ProcessState::Killed;
            st.pending_kill = false;
            events.push(Event::ProcessExecution(ProcessExecutionEvent {
                pid,
                executable: record.executable(),
                owner: record.owner(),
                name: record.name(),
                state: ProcessState::Killed,
            }));
        }

        if !in_queue && !executing {
            if !pending_kill && st.state != ProcessState::Killed {
                st.state = ProcessState::Ready;
            }

            if sleeping {
                if let Some(wake) = st.wakeup.take() {
                    t.timers.remove(&(wake, pid));
                }
            }
            drop(st);

            match self.ready_tx.try_send(QueueItem::Run(record.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    error!(%pid, "ready queue full, unable to queue process");
                }
                Err(TrySendError::Disconnected(_)) => {
                    error!(%pid, "ready queue disconnected, unable to queue process");
                }
            }
        }
    }

    /// Tears down a finished or killed process: completion event, finished
    /// hook, resource detach hooks, RID release, table unlink. The record
    /// is dropped when the last reference goes away.
    fn teardown(self: &Arc<Self>, record: &Arc<ProcessRecord>) {
        let pid = record.pid();
        let name = record.name();
        let owner = record.owner();

        {
            record.lock().state = ProcessState::Completed;
        }

        debug!(%pid, %name, "cleaning up process");

        self.event_bus
            .publish(Event::ProcessExecution(ProcessExecutionEvent {
                pid,
                executable: record.executable(),
                owner,
                name,
                state: ProcessState::Completed,
            }));

        // Last call allowed on the process.
        record.process().finished(pid);

        // Snapshot and detach resources while holding only the record lock,
        // then invoke the hooks with no locks held; a resource can do
        // anything it wants here, including call back into the scheduler.
        let resources = record.lock().take_resources();
        for (rid, resource) in &resources {
            resource.removed_from_process(pid, *rid, true);
        }

        {
            let mut t = self.tables.lock();
            for (rid, _) in &resources {
                t.release_rid(pid, *rid);
            }

            if t.processes.remove(&pid).is_none() {
                error!(%pid, "teardown: PID missing from process table");
            }

            let (site, entity) = owner_key(owner);
            let mut prune_site = false;
            if let Some(entities) = t.by_owner.get_mut(&site) {
                if let Some(records) = entities.get_mut(&entity) {
                    records.retain(|r| !Arc::ptr_eq(r, record));
                    if records.is_empty() {
                        entities.remove(&entity);
                    }
                }
                prune_site = entities.is_empty();
            }
            if prune_site {
                t.by_owner.remove(&site);
            }
        }
    }

    fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            self.event_bus.publish(event);
        }
    }

    /// Invokes process services for a record; used by the worker pool and
    /// the admission path.
    pub(crate) fn services<'a>(
        self: &'a Arc<Self>,
        record: &'a Arc<ProcessRecord>,
    ) -> ProcessServices<'a> {
        ProcessServices::new(record, self)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.tables.lock();
        f.debug_struct("Scheduler")
            .field("processes", &t.processes.len())
            .field("timers", &t.timers.len())
            .field("shutting_down", &t.shutting_down)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventBus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_config() -> ExecutorConfig {
        ExecutorConfig {
            worker_threads: 0,
            max_processes: 64,
            ready_poll: Duration::from_millis(20),
            shutdown_poll: Duration::from_millis(5),
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        Scheduler::new(test_config(), Arc::new(NullEventBus::new()))
    }

    struct Yielder {
        status: ProcessStatus,
        executes: Arc<AtomicU32>,
    }

    impl Yielder {
        fn boxed(status: ProcessStatus) -> (Box<dyn Process>, Arc<AtomicU32>) {
            let executes = Arc::new(AtomicU32::new(0));
            (
                Box::new(Yielder {
                    status,
                    executes: executes.clone(),
                }),
                executes,
            )
        }
    }

    impl Process for Yielder {
        fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
            self.executes.fetch_add(1, Ordering::SeqCst);
            self.status
        }

        fn name(&self, _pid: Pid) -> String {
            "yielder".to_string()
        }
    }

    /// Drives one next_execute/returned_from_execute cycle inline, as a
    /// worker would.
    fn run_one(sched: &Arc<Scheduler>) -> Option<Pid> {
        let next = sched.next_execute();
        let record = next.process?;
        let pid = record.pid();
        let status = if next.is_killed {
            let mut services = sched.services(&record);
            record.process().killed(pid, &mut services);
            ProcessStatus::Finished
        } else {
            let mut services = sched.services(&record);
            let mut proc = record.process();
            if record.messages_empty() {
                proc.execute(pid, &mut services)
            } else {
                let (rid, msg) = record.lock().pop_message().unwrap();
                match rid {
                    Some(rid) => proc.execute_resource_message(pid, &mut services, rid, msg),
                    None => proc.execute_message(pid, &mut services, msg),
                }
            }
        };
        sched.returned_from_execute(&record, status);
        Some(pid)
    }

    #[test]
    fn test_add_and_finish_process() {
        let sched = scheduler();
        let (proc_, executes) = Yielder::boxed(ProcessStatus::Finished);
        let pid = sched.add_process(proc_, None, None).unwrap();
        assert_eq!(sched.process_count(), 1);

        assert!(sched.start_process(pid));
        assert_eq!(run_one(&sched), Some(pid));

        assert_eq!(executes.load(Ordering::SeqCst), 1);
        assert_eq!(sched.process_count(), 0);
        assert!(sched.process_stats(pid).is_none());
    }

    #[test]
    fn test_add_process_rejected_after_shutdown_begins() {
        let sched = scheduler();
        sched.shutdown();
        let (proc_, _) = Yielder::boxed(ProcessStatus::Finished);
        assert!(sched.add_process(proc_, None, None).is_none());
    }

    #[test]
    fn test_pid_saturation_returns_none() {
        let config = ExecutorConfig {
            max_processes: 2,
            ..test_config()
        };
        let sched = Scheduler::new(config, Arc::new(NullEventBus::new()));

        let (a, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        let (b, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        let (c, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        assert!(sched.add_process(a, None, None).is_some());
        assert!(sched.add_process(b, None, None).is_some());
        assert!(sched.add_process(c, None, None).is_none());
    }

    #[test]
    fn test_send_message_unknown_pid_fails() {
        let sched = scheduler();
        assert!(!sched.send_message(Pid::new(99), ProcessMessage::Generic));
    }

    #[test]
    fn test_send_message_foreign_rid_fails() {
        let sched = scheduler();
        let (proc_, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        let pid = sched.add_process(proc_, None, None).unwrap();

        assert!(!sched.send_message_from(pid, Rid::new(42), ProcessMessage::Generic));
    }

    #[test]
    fn test_message_wakes_waiting_process() {
        let sched = scheduler();
        let (proc_, executes) = Yielder::boxed(ProcessStatus::WaitMessage);
        let pid = sched.add_process(proc_, None, None).unwrap();
        sched.start_process(pid);
        run_one(&sched);
        assert_eq!(executes.load(Ordering::SeqCst), 1);
        assert_eq!(sched.process_stats(pid).unwrap().state, ProcessState::WaitMessage);

        assert!(sched.send_message(pid, ProcessMessage::Generic));
        run_one(&sched);
        assert_eq!(executes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_message_to_created_process_does_not_schedule() {
        let sched = scheduler();
        let (proc_, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        let pid = sched.add_process(proc_, None, None).unwrap();

        assert!(sched.send_message(pid, ProcessMessage::Generic));
        let next = sched.next_execute();
        assert!(next.process.is_none());
        assert_eq!(sched.process_stats(pid).unwrap().state, ProcessState::Created);
    }

    #[test]
    fn test_kill_is_idempotent() {
        let sched = scheduler();
        let (proc_, executes) = Yielder::boxed(ProcessStatus::WaitMessage);
        let pid = sched.add_process(proc_, None, None).unwrap();
        sched.start_process(pid);
        run_one(&sched);

        assert!(sched.kill_process(pid));
        assert!(sched.kill_process(pid));
        assert_eq!(sched.process_stats(pid).unwrap().state, ProcessState::Killed);

        run_one(&sched);
        assert_eq!(sched.process_count(), 0);
        // Killed hook ran instead of another execute.
        assert_eq!(executes.load(Ordering::SeqCst), 1);
        assert!(!sched.kill_process(pid));
    }

    #[test]
    fn test_suspend_clears_messages() {
        let sched = scheduler();
        let (proc_, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        let pid = sched.add_process(proc_, None, None).unwrap();
        sched.start_process(pid);
        run_one(&sched);

        assert!(sched.suspend_process(pid));
        assert_eq!(
            sched.process_stats(pid).unwrap().state,
            ProcessState::Suspended
        );

        // Suspended processes refuse messages entirely.
        assert!(!sched.send_message(pid, ProcessMessage::Generic));

        // Resume and verify it runs again.
        assert!(sched.start_process(pid));
        assert_eq!(run_one(&sched), Some(pid));
    }

    #[test]
    fn test_sleep_and_timer_wakeup() {
        let sched = scheduler();
        struct Sleeper {
            executes: Arc<AtomicU32>,
        }
        impl Process for Sleeper {
            fn execute(&mut self, _pid: Pid, _s: &mut ProcessServices<'_>) -> ProcessStatus {
                self.executes.fetch_add(1, Ordering::SeqCst);
                ProcessStatus::Sleep
            }
            fn sleep_duration(&self, _pid: Pid) -> Option<Duration> {
                Some(Duration::from_millis(30))
            }
            fn name(&self, _pid: Pid) -> String {
                "sleeper".to_string()
            }
        }

        let executes = Arc::new(AtomicU32::new(0));
        let pid = sched
            .add_process(
                Box::new(Sleeper {
                    executes: executes.clone(),
                }),
                None,
                None,
            )
            .unwrap();
        sched.start_process(pid);
        run_one(&sched);
        assert_eq!(sched.process_stats(pid).unwrap().state, ProcessState::Sleeping);

        // Not yet due.
        let next = sched.next_execute();
        assert!(next.process.is_none());

        std::thread::sleep(Duration::from_millis(40));
        run_one(&sched);
        assert_eq!(executes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_kill_during_sleep_removes_timer() {
        let sched = scheduler();
        struct Sleeper;
        impl Process for Sleeper {
            fn execute(&mut self, _pid: Pid, _s: &mut ProcessServices<'_>) -> ProcessStatus {
                ProcessStatus::Sleep
            }
            fn sleep_duration(&self, _pid: Pid) -> Option<Duration> {
                Some(Duration::from_secs(60))
            }
            fn name(&self, _pid: Pid) -> String {
                "sleeper".to_string()
            }
        }

        let pid = sched.add_process(Box::new(Sleeper), None, None).unwrap();
        sched.start_process(pid);
        run_one(&sched);
        assert_eq!(sched.process_stats(pid).unwrap().state, ProcessState::Sleeping);

        assert!(sched.kill_process(pid));
        // The killed process is queued immediately, not waiting on its timer.
        assert_eq!(run_one(&sched), Some(pid));
        assert_eq!(sched.process_count(), 0);
    }

    #[test]
    fn test_owner_index_and_cleanup_for_owner() {
        let sched = scheduler();
        let owner = EntityId::new(3, 77);
        let (a, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        let (b, _) = Yielder::boxed(ProcessStatus::WaitMessage);
        let (c, _) = Yielder::boxed(ProcessStatus::WaitMessage);

        let pid_a = sched.add_process(a, None, Some(owner)).unwrap();
        let pid_b = sched.add_process(b, None, Some(owner)).unwrap();
        let pid_c = sched.add_process(c, None, Some(EntityId::new(3, 78))).unwrap();

        let mut owned = sched.pids_for_owner(owner);
        owned.sort();
        assert_eq!(owned, vec![pid_a, pid_b]);
        assert_eq!(sched.pids_for_site(3).len(), 3);

        assert_eq!(sched.cleanup_for_owner(owner), 2);
        run_one(&sched);
        run_one(&sched);
        assert_eq!(sched.process_count(), 1);
        assert!(sched.pids_for_owner(owner).is_empty());
        assert_eq!(sched.pids_for_site(3), vec![pid_c]);
    }

    #[test]
    fn test_execute_more_requeues() {
        let sched = scheduler();
        struct Counter {
            left: u32,
            executes: Arc<AtomicU32>,
        }
        impl Process for Counter {
            fn execute(&mut self, _pid: Pid, _s: &mut ProcessServices<'_>) -> ProcessStatus {
                self.executes.fetch_add(1, Ordering::SeqCst);
                self.left -= 1;
                if self.left == 0 {
                    ProcessStatus::Finished
                } else {
                    ProcessStatus::ExecuteMore
                }
            }
            fn name(&self, _pid: Pid) -> String {
                "counter".to_string()
            }
        }

        let executes = Arc::new(AtomicU32::new(0));
        let pid = sched
            .add_process(
                Box::new(Counter {
                    left: 3,
                    executes: executes.clone(),
                }),
                None,
                None,
            )
            .unwrap();
        sched.start_process(pid);

        while run_one(&sched).is_some() {}
        assert_eq!(executes.load(Ordering::SeqCst), 3);
        assert_eq!(sched.process_count(), 0);
    }

    #[test]
    fn test_time_jump_backwards_wakes_a_worker() {
        let sched = scheduler();
        sched.time_jumped(true);
        let start = Instant::now();
        let next = sched.next_execute();
        assert!(next.process.is_none());
        // The wake token returned immediately instead of waiting the poll.
        assert!(start.elapsed() < sched.config().ready_poll);
    }

    mod invariants {
        use super::*;
        use crate::executor::resource::ProcessResource;
        use proptest::prelude::*;

        struct AcceptingResource;

        impl ProcessResource for AcceptingResource {
            fn added_to_process(&self, _pid: Pid, _rid: Rid) -> bool {
                true
            }

            fn removed_from_process(&self, _pid: Pid, _rid: Rid, _cleanup: bool) {}
        }

        /// Registers one blocking resource at admission, then waits.
        struct Holder;

        impl Process for Holder {
            fn added(&mut self, _pid: Pid, services: &mut ProcessServices<'_>) {
                let _ = services.add_blocking_resource(Arc::new(AcceptingResource));
            }

            fn execute(&mut self, _pid: Pid, _s: &mut ProcessServices<'_>) -> ProcessStatus {
                ProcessStatus::Blocked
            }

            fn name(&self, _pid: Pid) -> String {
                "holder".to_string()
            }
        }

        fn fast_scheduler() -> Arc<Scheduler> {
            let config = ExecutorConfig {
                worker_threads: 0,
                max_processes: 32,
                ready_poll: Duration::from_millis(2),
                shutdown_poll: Duration::from_millis(1),
            };
            Scheduler::new(config, Arc::new(NullEventBus::new()))
        }

        fn check_tables(sched: &Arc<Scheduler>) -> Result<(), TestCaseError> {
            let t = sched.tables.lock();

            // Every live RID maps to a process that holds it, and back.
            for (rid, pid) in &t.rid_to_pid {
                let record = t.processes.get(pid);
                prop_assert!(record.is_some(), "rid {rid} maps to dead pid {pid}");
                prop_assert!(
                    record.is_some_and(|r| r.lock().resources.contains_key(rid)),
                    "rid {rid} missing from record of pid {pid}"
                );
            }
            for (pid, record) in &t.processes {
                let st = record.lock();
                prop_assert!(
                    st.blocked_waiting.is_subset(&st.default_blocked),
                    "current blocked set is not a subset for pid {pid}"
                );
                for rid in st.resources.keys() {
                    prop_assert_eq!(
                        t.rid_to_pid.get(rid),
                        Some(pid),
                        "record rid {} not assigned to pid {}",
                        rid,
                        pid
                    );
                }
            }
            Ok(())
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn prop_tables_stay_consistent_under_random_ops(
                ops in proptest::collection::vec((0u8..6, 0usize..8), 1..40)
            ) {
                let sched = fast_scheduler();
                let mut pids: Vec<Pid> = Vec::new();

                for (op, pick) in ops {
                    let target = pids.get(pick % pids.len().max(1)).copied();
                    match op {
                        0 => {
                            if let Some(pid) = sched.add_process(Box::new(Holder), None, None) {
                                pids.push(pid);
                            }
                        }
                        1 => {
                            if let Some(pid) = target {
                                sched.start_process(pid);
                            }
                        }
                        2 => {
                            if let Some(pid) = target {
                                sched.kill_process(pid);
                            }
                        }
                        3 => {
                            if let Some(pid) = target {
                                sched.suspend_process(pid);
                            }
                        }
                        4 => {
                            if let Some(pid) = target {
                                sched.send_message(pid, ProcessMessage::Generic);
                            }
                        }
                        _ => {
                            run_one(&sched);
                        }
                    }
                    check_tables(&sched)?;
                }

                // Every admitted process still reaches completed teardown.
                for pid in &pids {
                    sched.kill_process(*pid);
                }
                while run_one(&sched).is_some() {}
                prop_assert_eq!(sched.process_count(), 0);
                prop_assert!(sched.tables.lock().rid_to_pid.is_empty());
            }
        }
    }
}
