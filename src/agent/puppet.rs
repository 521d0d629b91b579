//! The puppet agent: a secondary character multiplexed onto its owner's
//! session.
//!
//! Puppet agents start dormant, with no channels. The first command or
//! ping activates them: channels are bound against the owning player's
//! session, capabilities are inherited (restricted to the inheritable
//! subset), and event subscriptions begin. Channel closure deactivates
//! them without ending the process; losing ownership ends them.

use tracing::debug;

use crate::agent::core::{AgentCore, AgentDisposition, CapabilitySource};
use crate::agent::messages::{
    decode_payload, PuppetCommand, PuppetStatus, PUPPET_COMMAND_SUBTYPE, PUPPET_PING_SUBTYPE,
};
use crate::events::{
    EntityChange, Event, SubscriptionId, SubscriptionParams, SubscriptionTarget,
};
use crate::executor::message::ProcessMessage;
use crate::executor::process::{Process, ProcessStatus};
use crate::executor::services::ProcessServices;
use crate::types::{EntityId, Pid, Rid};
use crate::world::WorldContext;

#[derive(Debug)]
pub struct PuppetAgent {
    core: AgentCore,
    puppet: EntityId,
    player: EntityId,
    manager: Pid,
    ownership_sub: Option<SubscriptionId>,
}

impl PuppetAgent {
    pub fn new(world: WorldContext, puppet: EntityId, player: EntityId, manager: Pid) -> Self {
        Self {
            core: AgentCore::new(
                world,
                puppet,
                player,
                CapabilitySource::InheritedFrom(player),
            ),
            puppet,
            player,
            manager,
            ownership_sub: None,
        }
    }

    pub fn puppet(&self) -> EntityId {
        self.puppet
    }

    fn activate(&mut self, pid: Pid, services: &mut ProcessServices<'_>) -> bool {
        if self.core.is_active() {
            return true;
        }

        debug!(puppet = %self.puppet, "activating puppet");
        let subtype = format!("puppet:{}", self.puppet);
        if let Err(err) = self.core.setup(pid, services, &subtype, false) {
            debug!(puppet = %self.puppet, %err, "puppet activation failed");
            return false;
        }

        // Watch for the puppet being deleted or handed to another player.
        self.ownership_sub = Some(self.core.world().events.subscribe(
            SubscriptionParams::EntityChanged {
                entities: vec![self.puppet],
                entity_type: None,
                owner: None,
                changes: vec![EntityChange::OwnerChanged, EntityChange::Deleted],
            },
            SubscriptionTarget::Process(pid),
        ));
        true
    }

    fn deactivate(&mut self, services: &mut ProcessServices<'_>) {
        if !self.core.is_active() {
            return;
        }
        debug!(puppet = %self.puppet, "deactivating puppet");
        self.core.release(services);
        if let Some(sub) = self.ownership_sub.take() {
            self.core.world().events.unsubscribe(sub);
        }
    }

    fn send_status(&self, status: &str) {
        let message = PuppetStatus {
            puppet: self.puppet,
            status: status.to_string(),
        }
        .into_message(self.core.pid());
        self.core
            .world()
            .scheduler
            .send_message(self.manager, message);
    }

    fn handle_interprocess(
        &mut self,
        pid: Pid,
        services: &mut ProcessServices<'_>,
        subtype: &str,
        payload: &serde_json::Value,
    ) -> ProcessStatus {
        match subtype {
            PUPPET_PING_SUBTYPE => {
                self.activate(pid, services);
                ProcessStatus::WaitMessage
            }
            PUPPET_COMMAND_SUBTYPE => {
                let Some(command) = decode_payload::<PuppetCommand>(payload) else {
                    debug!(puppet = %self.puppet, "malformed puppet command");
                    return ProcessStatus::WaitMessage;
                };
                if !self.activate(pid, services) {
                    self.send_status("activation failed");
                    return ProcessStatus::WaitMessage;
                }
                match self.core.handle_command_line(&command.command) {
                    AgentDisposition::Continue => ProcessStatus::WaitMessage,
                    AgentDisposition::Terminate => {
                        self.send_status("terminated");
                        ProcessStatus::Finished
                    }
                }
            }
            other => {
                debug!(puppet = %self.puppet, subtype = other, "unknown interprocess subtype");
                ProcessStatus::WaitMessage
            }
        }
    }

    /// Ownership-change and deletion events end the agent.
    fn handle_entity_changed(&mut self, event: &Event) -> Option<ProcessStatus> {
        let Event::EntityChanged(changed) = event else {
            return None;
        };
        if changed.entity != self.puppet {
            return None;
        }

        match changed.change {
            EntityChange::OwnerChanged if changed.owner != Some(self.player) => {
                debug!(puppet = %self.puppet, "puppet ownership lost");
                self.send_status("ownership lost");
                Some(ProcessStatus::Finished)
            }
            EntityChange::Deleted => {
                self.send_status("puppet deleted");
                Some(ProcessStatus::Finished)
            }
            _ => None,
        }
    }
}

impl Process for PuppetAgent {
    fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
        // Dormant and activated puppets alike are purely message-driven.
        ProcessStatus::WaitMessage
    }

    fn execute_message(
        &mut self,
        pid: Pid,
        services: &mut ProcessServices<'_>,
        message: ProcessMessage,
    ) -> ProcessStatus {
        match message {
            ProcessMessage::Interprocess {
                subtype, payload, ..
            } => self.handle_interprocess(pid, services, &subtype, &payload),
            ProcessMessage::Event {
                subscription,
                event,
            } => {
                if let Some(status) = self.handle_entity_changed(&event) {
                    return status;
                }
                match self.core.handle_event(subscription, event) {
                    AgentDisposition::Continue => ProcessStatus::WaitMessage,
                    AgentDisposition::Terminate => ProcessStatus::Finished,
                }
            }
            ProcessMessage::SubscriptionDeleted { .. } => {
                self.send_status("subscription deleted");
                ProcessStatus::Finished
            }
            other => {
                debug!(puppet = %self.puppet, category = ?other.category(), "message ignored");
                ProcessStatus::WaitMessage
            }
        }
    }

    fn execute_resource_message(
        &mut self,
        _pid: Pid,
        services: &mut ProcessServices<'_>,
        rid: Rid,
        message: ProcessMessage,
    ) -> ProcessStatus {
        // Channel closure means the session went away: go dormant, stay
        // alive.
        match self.core.handle_resource_message(rid, message) {
            AgentDisposition::Continue => ProcessStatus::WaitMessage,
            AgentDisposition::Terminate => {
                self.deactivate(services);
                ProcessStatus::WaitMessage
            }
        }
    }

    fn name(&self, _pid: Pid) -> String {
        format!("PuppetAgent {}", self.puppet)
    }

    fn killed(&mut self, _pid: Pid, services: &mut ProcessServices<'_>) {
        self.send_status("killed");
        self.deactivate(services);
    }

    fn finished(&mut self, _pid: Pid) {
        self.core.unsubscribe_events();
        if let Some(sub) = self.ownership_sub.take() {
            self.core.world().events.unsubscribe(sub);
        }
    }
}
