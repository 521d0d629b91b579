//! The puppet manager: one per connected player who owns puppets.
//!
//! Spawned by the user agent on connect, it keeps a puppet agent process
//! per owned puppet, routes puppet commands from the user agent to the
//! right agent by PID, and reacts to puppet creation, deletion, and
//! ownership changes.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::agent::messages::{
    decode_payload, PuppetCommand, PuppetError, PuppetPing, PuppetStatus, PUPPET_COMMAND_SUBTYPE,
    PUPPET_ERROR_SUBTYPE, PUPPET_PING_SUBTYPE, PUPPET_STATUS_SUBTYPE,
};
use crate::agent::puppet::PuppetAgent;
use crate::events::{
    EntityChange, Event, SubscriptionId, SubscriptionParams, SubscriptionTarget,
};
use crate::executor::message::ProcessMessage;
use crate::executor::process::{Process, ProcessStatus};
use crate::executor::services::ProcessServices;
use crate::types::{EntityId, Pid};
use crate::world::store::EntityType;
use crate::world::WorldContext;

#[derive(Debug)]
pub struct PuppetManager {
    world: WorldContext,
    player: EntityId,
    user_agent: Pid,
    pid: Option<Pid>,
    /// Puppet entity to its agent process.
    agents: HashMap<EntityId, Pid>,
    change_sub: Option<SubscriptionId>,
}

impl PuppetManager {
    pub fn new(world: WorldContext, player: EntityId, user_agent: Pid) -> Self {
        Self {
            world,
            player,
            user_agent,
            pid: None,
            agents: HashMap::new(),
            change_sub: None,
        }
    }

    pub fn player(&self) -> EntityId {
        self.player
    }

    fn spawn_agent(&mut self, puppet: EntityId) {
        if self.agents.contains_key(&puppet) {
            return;
        }
        let Some(own_pid) = self.pid else {
            return;
        };

        let agent = PuppetAgent::new(self.world.clone(), puppet, self.player, own_pid);
        match self
            .world
            .scheduler
            .add_process(Box::new(agent), None, Some(self.player))
        {
            Some(pid) => {
                self.world.scheduler.start_process(pid);
                self.agents.insert(puppet, pid);
                debug!(%puppet, %pid, "puppet agent spawned");
            }
            None => warn!(%puppet, "unable to spawn puppet agent"),
        }
    }

    fn kill_agent(&mut self, puppet: EntityId) {
        if let Some(pid) = self.agents.remove(&puppet) {
            self.world.scheduler.kill_process(pid);
        }
    }

    fn report_error(&self, puppet: Option<EntityId>, error: &str, to: Option<Pid>) {
        let message = PuppetError {
            puppet,
            error: error.to_string(),
        }
        .into_message(self.pid);
        let target = to.unwrap_or(self.user_agent);
        self.world.scheduler.send_message(target, message);
    }

    fn handle_interprocess(
        &mut self,
        subtype: &str,
        source: Option<Pid>,
        payload: &serde_json::Value,
    ) {
        match subtype {
            PUPPET_COMMAND_SUBTYPE => {
                let Some(command) = decode_payload::<PuppetCommand>(payload) else {
                    self.report_error(None, "malformed puppet command", source);
                    return;
                };
                match self.agents.get(&command.puppet).copied() {
                    Some(agent) => {
                        let forwarded = command.clone().into_message(self.pid);
                        if !self.world.scheduler.send_message(agent, forwarded) {
                            self.report_error(
                                Some(command.puppet),
                                "puppet agent unreachable",
                                source,
                            );
                        }
                    }
                    None => {
                        self.report_error(Some(command.puppet), "no such puppet", source);
                    }
                }
            }
            PUPPET_PING_SUBTYPE => {
                let Some(ping) = decode_payload::<PuppetPing>(payload) else {
                    return;
                };
                if let Some(agent) = self.agents.get(&ping.puppet).copied() {
                    self.world
                        .scheduler
                        .send_message(agent, ping.into_message(self.pid));
                }
            }
            PUPPET_STATUS_SUBTYPE => {
                if let Some(status) = decode_payload::<PuppetStatus>(payload) {
                    debug!(puppet = %status.puppet, status = %status.status, "puppet status");
                    // A terminated agent is forgotten so a later command
                    // reports cleanly instead of routing into the void.
                    self.agents.remove(&status.puppet);
                    self.report_error(Some(status.puppet), &status.status, None);
                }
            }
            PUPPET_ERROR_SUBTYPE => {
                if let Some(error) = decode_payload::<PuppetError>(payload) {
                    debug!(puppet = ?error.puppet, error = %error.error, "puppet error relayed");
                    self.report_error(error.puppet, &error.error, None);
                }
            }
            other => debug!(subtype = other, "unknown interprocess subtype"),
        }
    }

    fn handle_entity_changed(&mut self, event: Event) {
        let Event::EntityChanged(changed) = event else {
            return;
        };
        if changed.entity_type != EntityType::Puppet {
            return;
        }

        match changed.change {
            EntityChange::Created if changed.owner == Some(self.player) => {
                self.spawn_agent(changed.entity);
            }
            EntityChange::Deleted => self.kill_agent(changed.entity),
            EntityChange::OwnerChanged => {
                if changed.owner == Some(self.player) {
                    // Gained a puppet.
                    self.spawn_agent(changed.entity);
                } else if changed.previous_owner == Some(self.player) {
                    // The agent notices through its own subscription and
                    // reports back; dropping the route here is enough.
                    self.agents.remove(&changed.entity);
                }
            }
            _ => {}
        }
    }
}

impl Process for PuppetManager {
    fn added(&mut self, pid: Pid, _services: &mut ProcessServices<'_>) {
        self.pid = Some(pid);

        self.change_sub = Some(self.world.events.subscribe(
            SubscriptionParams::EntityChanged {
                entities: Vec::new(),
                entity_type: Some(EntityType::Puppet),
                owner: Some(self.player),
                changes: vec![
                    EntityChange::Created,
                    EntityChange::Deleted,
                    EntityChange::OwnerChanged,
                ],
            },
            SubscriptionTarget::Process(pid),
        ));

        let puppets = self.world.store.puppets_owned_by(self.player);
        for puppet in puppets {
            self.spawn_agent(puppet.id);
        }
    }

    fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
        ProcessStatus::WaitMessage
    }

    fn execute_message(
        &mut self,
        _pid: Pid,
        _services: &mut ProcessServices<'_>,
        message: ProcessMessage,
    ) -> ProcessStatus {
        match message {
            ProcessMessage::Interprocess {
                subtype,
                source,
                payload,
            } => {
                self.handle_interprocess(&subtype, source, &payload);
                ProcessStatus::WaitMessage
            }
            ProcessMessage::Event { event, .. } => {
                self.handle_entity_changed(event);
                ProcessStatus::WaitMessage
            }
            ProcessMessage::SubscriptionDeleted { .. } => ProcessStatus::Finished,
            other => {
                debug!(category = ?other.category(), "message ignored");
                ProcessStatus::WaitMessage
            }
        }
    }

    fn name(&self, _pid: Pid) -> String {
        format!("PuppetManager {}", self.player)
    }

    fn killed(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) {
        for (_, agent) in self.agents.drain() {
            self.world.scheduler.kill_process(agent);
        }
    }

    fn finished(&mut self, _pid: Pid) {
        if let Some(sub) = self.change_sub.take() {
            self.world.events.unsubscribe(sub);
        }
        for (_, agent) in self.agents.drain() {
            self.world.scheduler.kill_process(agent);
        }
    }
}
