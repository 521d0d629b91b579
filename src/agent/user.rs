//! The user agent: the per-connection process a player types into.

use tracing::debug;

use crate::agent::core::{AgentCore, AgentDisposition, CapabilitySource};
use crate::agent::manager::PuppetManager;
use crate::executor::message::ProcessMessage;
use crate::executor::process::{Process, ProcessStatus};
use crate::executor::services::ProcessServices;
use crate::types::{EntityId, Pid, Rid};
use crate::world::WorldContext;

/// Per-session process: parses user input, dispatches actions, launches
/// softcode with optional output redirection, and relays subscribed
/// events back to the session. Spawned on connect, torn down on
/// disconnect or output-channel closure.
#[derive(Debug)]
pub struct UserAgent {
    core: AgentCore,
    /// First execute forces the initial room description.
    first_execute: bool,
    puppet_manager: Option<Pid>,
    setup_failed: bool,
}

impl UserAgent {
    /// `player` is both the agent entity and the session entity.
    pub fn new(world: WorldContext, player: EntityId) -> Self {
        Self {
            core: AgentCore::new(world, player, player, CapabilitySource::Own),
            first_execute: true,
            puppet_manager: None,
            setup_failed: false,
        }
    }

    pub fn player(&self) -> EntityId {
        self.core.agent_entity()
    }

    fn spawn_puppet_manager(&mut self, own_pid: Pid) {
        let world = self.core.world().clone();
        let player = self.player();

        if world.store.puppets_owned_by(player).is_empty() {
            return;
        }

        let manager = PuppetManager::new(world.clone(), player, own_pid);
        match world
            .scheduler
            .add_process(Box::new(manager), None, Some(player))
        {
            Some(pid) => {
                world.scheduler.start_process(pid);
                self.puppet_manager = Some(pid);
            }
            None => debug!(%player, "unable to spawn puppet manager"),
        }
    }

    fn disposition_status(&self, disposition: AgentDisposition) -> ProcessStatus {
        match disposition {
            AgentDisposition::Continue => ProcessStatus::WaitMessage,
            AgentDisposition::Terminate => ProcessStatus::Finished,
        }
    }

    /// Welcome the player and force the initial room description. Message
    /// deliveries may beat the first bare execute, so every execute
    /// variant funnels through this.
    fn ensure_first_execute(&mut self) {
        if self.first_execute {
            self.first_execute = false;
            self.core.send_plain_text("Welcome!", false);
            self.core.force_look();
        }
    }
}

impl Process for UserAgent {
    fn added(&mut self, pid: Pid, services: &mut ProcessServices<'_>) {
        if let Err(err) = self.core.setup(pid, services, "session", true) {
            debug!(player = %self.player(), %err, "user agent setup failed");
            self.setup_failed = true;
            return;
        }
        self.spawn_puppet_manager(pid);
    }

    fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
        if self.setup_failed {
            return ProcessStatus::Error;
        }
        self.ensure_first_execute();
        ProcessStatus::WaitMessage
    }

    fn execute_message(
        &mut self,
        _pid: Pid,
        _services: &mut ProcessServices<'_>,
        message: ProcessMessage,
    ) -> ProcessStatus {
        if self.setup_failed {
            return ProcessStatus::Error;
        }
        self.ensure_first_execute();
        let disposition = self.core.handle_plain_message(message);
        self.disposition_status(disposition)
    }

    fn execute_resource_message(
        &mut self,
        _pid: Pid,
        _services: &mut ProcessServices<'_>,
        rid: Rid,
        message: ProcessMessage,
    ) -> ProcessStatus {
        if self.setup_failed {
            return ProcessStatus::Error;
        }
        self.ensure_first_execute();
        let disposition = self.core.handle_resource_message(rid, message);
        self.disposition_status(disposition)
    }

    fn name(&self, _pid: Pid) -> String {
        format!("UserAgent {}", self.player())
    }

    fn error_text(&mut self, _pid: Pid) -> Vec<String> {
        vec!["user agent could not bind its session channels".to_string()]
    }

    fn killed(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) {
        self.core.unsubscribe_events();
    }

    fn finished(&mut self, _pid: Pid) {
        self.core.unsubscribe_events();
        if let Some(manager) = self.puppet_manager.take() {
            self.core.world().scheduler.kill_process(manager);
        }
    }
}
