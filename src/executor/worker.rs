//! The worker pool and the executor facade.
//!
//! A fixed set of cooperating OS threads drains the ready queue and invokes
//! process callbacks. There is no preemption: a worker calls into the
//! process and does not return until the callback does. Panics in a
//! callback are contained per thread and terminate the offending process,
//! not the server.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::events::EventBus;
use crate::executor::message::ProcessMessage;
use crate::executor::process::{Process, ProcessStatus};
use crate::executor::record::ProcessRecord;
use crate::executor::scheduler::Scheduler;
use crate::executor::stats::ProcessStats;
use crate::types::{EntityId, ExecutorConfig, Pid};

/// Fixed pool of worker threads executing processes cooperatively.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` named worker threads against the scheduler.
    pub fn spawn(count: usize, scheduler: Arc<Scheduler>) -> Self {
        let handles = (0..count)
            .map(|index| {
                let scheduler = scheduler.clone();
                std::thread::Builder::new()
                    .name(format!("mudcore-worker-{index}"))
                    .spawn(move || worker_main(scheduler))
                    .unwrap_or_else(|err| {
                        // Thread spawn failure at startup is unrecoverable.
                        panic!("failed to spawn worker thread {index}: {err}")
                    })
            })
            .collect();
        Self { handles }
    }

    /// Waits for every worker to observe shutdown and exit.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("worker thread panicked at top level");
            }
        }
    }
}

fn worker_main(scheduler: Arc<Scheduler>) {
    debug!("worker started");
    loop {
        let next = scheduler.next_execute();

        if let Some(record) = next.process {
            let pid = record.pid();
            debug!(%pid, name = %record.name(), "starting execution");

            let status = run_process(&scheduler, &record, next.is_killed);
            scheduler.returned_from_execute(&record, status);

            debug!(%pid, "finished execution");
        }

        if next.shutting_down {
            break;
        }
    }
    debug!("worker stopped");
}

/// Runs one scheduling quantum of a process: the killed hook, or a bare
/// execute, or a batch of queued messages. Panics terminate the process.
fn run_process(scheduler: &Arc<Scheduler>, record: &Arc<ProcessRecord>, is_killed: bool) -> ProcessStatus {
    let result = catch_unwind(AssertUnwindSafe(|| {
        execute_quantum(scheduler, record, is_killed)
    }));

    match result {
        Ok(status) => status,
        Err(_) => {
            error!(
                pid = %record.pid(),
                name = %record.name(),
                "process panicked during execution; terminating it"
            );
            ProcessStatus::Error
        }
    }
}

fn execute_quantum(
    scheduler: &Arc<Scheduler>,
    record: &Arc<ProcessRecord>,
    is_killed: bool,
) -> ProcessStatus {
    let pid = record.pid();
    let mut services = scheduler.services(record);
    let mut process = record.process();

    if is_killed {
        debug!(%pid, "invoking killed hook");
        process.killed(pid, &mut services);
        return ProcessStatus::Finished;
    }

    if record.messages_empty() {
        return process.execute(pid, &mut services);
    }

    // Drain waiting messages until one of the terminating statuses or the
    // queue empties.
    let mut status = ProcessStatus::ExecuteMore;
    loop {
        let Some((rid, message)) = record.lock().pop_message() else {
            break;
        };

        status = match rid {
            Some(rid) => process.execute_resource_message(pid, &mut services, rid, message),
            None => process.execute_message(pid, &mut services, message),
        };

        match status {
            ProcessStatus::Error | ProcessStatus::Suspended | ProcessStatus::Finished => break,
            _ => {}
        }
    }
    status
}

/// The executor: the scheduler plus its worker pool, with lifecycle
/// management. This is the front door embedding servers use; collaborators
/// are passed in explicitly at construction.
#[derive(Debug)]
pub struct Executor {
    scheduler: Arc<Scheduler>,
    workers: Option<WorkerPool>,
}

impl Executor {
    /// Builds the scheduler and spawns the configured worker threads.
    pub fn start(config: ExecutorConfig, event_bus: Arc<dyn EventBus>) -> Self {
        let workers = config.worker_threads;
        let scheduler = Scheduler::new(config, event_bus);
        info!(workers, "executor starting");
        Self {
            workers: Some(WorkerPool::spawn(workers, scheduler.clone())),
            scheduler,
        }
    }

    /// The scheduler handle, for wiring into channels and collaborators.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Adds a process without running it.
    pub fn add_process(
        &self,
        process: Box<dyn Process>,
        executable: Option<EntityId>,
        owner: Option<EntityId>,
    ) -> Option<Pid> {
        self.scheduler.add_process(process, executable, owner)
    }

    /// Starts an added or suspended process.
    pub fn start_process(&self, pid: Pid) -> bool {
        self.scheduler.start_process(pid)
    }

    /// Requests a polite kill.
    pub fn kill_process(&self, pid: Pid) -> bool {
        self.scheduler.kill_process(pid)
    }

    /// Requests suspension.
    pub fn suspend_process(&self, pid: Pid) -> bool {
        self.scheduler.suspend_process(pid)
    }

    /// Sends a message to a process.
    pub fn send_message(&self, pid: Pid, message: ProcessMessage) -> bool {
        self.scheduler.send_message(pid, message)
    }

    /// Stats snapshot for one process.
    pub fn process_stats(&self, pid: Pid) -> Option<ProcessStats> {
        self.scheduler.process_stats(pid)
    }

    /// Kills every process, waits for the table to drain, and joins the
    /// workers. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(workers) = self.workers.take() {
            self.scheduler.shutdown();
            workers.join();
            info!("executor stopped");
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
