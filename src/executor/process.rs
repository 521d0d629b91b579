//! The process callback contract.
//!
//! Anything that wants to be run by the executor implements [`Process`].
//! Only one method is invoked at a time for a given process, so
//! implementations need no internal synchronization beyond `Send`.

use std::time::Duration;

use crate::executor::message::ProcessMessage;
use crate::executor::services::ProcessServices;
use crate::types::{Pid, Rid};

/// Status a process returns from an execute call, telling the scheduler
/// what to do with it next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is completely finished. Do not schedule again; initiate
    /// cleanup.
    Finished,
    /// Process wants to sleep for a time, but also get messages. Any
    /// incoming message cancels the sleep.
    Sleep,
    /// Process wants to wait until it gets a message before executing again.
    WaitMessage,
    /// Process wants to be suspended and ignore all events. Note the
    /// process has no way to resume itself.
    Suspended,
    /// Process is blocked on its resources and cannot proceed right now.
    Blocked,
    /// Process has encountered an error condition and must finish.
    Error,
    /// Process has more work to do. Put back in the ready queue.
    ExecuteMore,
}

/// Callback interface for everything the executor runs.
///
/// The scheduler picks which execute variant to call based on whether the
/// first queued item is a message and whether that message arrived via a
/// resource. The default message variants fall through to the bare
/// [`Process::execute`], so purely compute-driven processes only implement
/// that one.
pub trait Process: Send {
    /// Called once when the process is admitted, before execution begins.
    /// This is the process's chance to register resources up front.
    fn added(&mut self, pid: Pid, services: &mut ProcessServices<'_>) {
        let _ = (pid, services);
    }

    /// Called when the process is allowed to do work. The process runs
    /// exclusively on one of potentially many threads and must yield by
    /// returning once it hits a blocking condition or has executed long
    /// enough.
    ///
    /// Even when waiting on messages or resources, in rare situations this
    /// may be called anyway; return the correct status to go back to
    /// waiting.
    fn execute(&mut self, pid: Pid, services: &mut ProcessServices<'_>) -> ProcessStatus;

    /// Execute variant called in response to a queued message.
    fn execute_message(
        &mut self,
        pid: Pid,
        services: &mut ProcessServices<'_>,
        message: ProcessMessage,
    ) -> ProcessStatus {
        let _ = message;
        self.execute(pid, services)
    }

    /// Execute variant called in response to a message that arrived via a
    /// registered resource.
    fn execute_resource_message(
        &mut self,
        pid: Pid,
        services: &mut ProcessServices<'_>,
        rid: Rid,
        message: ProcessMessage,
    ) -> ProcessStatus {
        let _ = rid;
        self.execute_message(pid, services, message)
    }

    /// The name of the process. Must not be empty. The scheduler snapshots
    /// this at admission for use in stats and lifecycle events.
    fn name(&self, pid: Pid) -> String;

    /// Consulted only after [`ProcessStatus::Sleep`] is returned. `None` is
    /// treated as an invalid request and kills the process.
    fn sleep_duration(&self, pid: Pid) -> Option<Duration> {
        let _ = pid;
        None
    }

    /// Consulted only after [`ProcessStatus::Error`] is returned; one line
    /// per element describing why the process errored out.
    fn error_text(&mut self, pid: Pid) -> Vec<String> {
        let _ = pid;
        Vec::new()
    }

    /// Called when the process has been forcibly killed. Never called while
    /// an execute method is active. May be called before any execute call
    /// has been made if the system is shutting down.
    fn killed(&mut self, pid: Pid, services: &mut ProcessServices<'_>) {
        let _ = (pid, services);
    }

    /// Called once the executor is done with the process, after
    /// [`ProcessStatus::Finished`], [`ProcessStatus::Error`], or the killed
    /// hook. This is the last call before the process is dropped.
    fn finished(&mut self, pid: Pid) {
        let _ = pid;
    }
}
