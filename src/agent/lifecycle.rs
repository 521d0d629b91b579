//! Connection lifecycle: spawning a user agent per connected session.

use std::collections::HashMap;
use tracing::{debug, error, warn};

use crate::agent::user::UserAgent;
use crate::events::{
    ConnectionAction, Event, SubscriptionId, SubscriptionParams, SubscriptionTarget,
};
use crate::executor::message::ProcessMessage;
use crate::executor::process::{Process, ProcessStatus};
use crate::executor::services::ProcessServices;
use crate::types::{EntityId, Pid, SiteId};
use crate::world::WorldContext;

const PROCESS_NAME: &str = "Connection Lifecycle Manager";

/// Daemon-style process that watches connection events for one site and
/// keeps a user agent per connected player.
#[derive(Debug)]
pub struct ConnectionLifecycleManager {
    world: WorldContext,
    site: SiteId,
    subscription: Option<SubscriptionId>,
    agents: HashMap<EntityId, Pid>,
}

impl ConnectionLifecycleManager {
    pub fn new(world: WorldContext, site: SiteId) -> Self {
        Self {
            world,
            site,
            subscription: None,
            agents: HashMap::new(),
        }
    }

    fn handle_connection(&mut self, entity: EntityId, action: ConnectionAction) {
        match action {
            ConnectionAction::Connected => {
                if self.agents.contains_key(&entity) {
                    debug!(%entity, "already has an agent; ignoring reconnect");
                    return;
                }
                let agent = UserAgent::new(self.world.clone(), entity);
                match self
                    .world
                    .scheduler
                    .add_process(Box::new(agent), None, Some(entity))
                {
                    Some(pid) => {
                        self.world.scheduler.start_process(pid);
                        self.agents.insert(entity, pid);
                        debug!(%entity, %pid, "user agent spawned");
                    }
                    None => warn!(%entity, "unable to spawn user agent"),
                }
            }
            ConnectionAction::Disconnected => {
                if let Some(pid) = self.agents.remove(&entity) {
                    self.world.scheduler.kill_process(pid);
                    debug!(%entity, %pid, "user agent killed on disconnect");
                }
            }
        }
    }
}

impl Process for ConnectionLifecycleManager {
    fn added(&mut self, pid: Pid, _services: &mut ProcessServices<'_>) {
        self.subscription = Some(self.world.events.subscribe(
            SubscriptionParams::Connection { site: self.site },
            SubscriptionTarget::Process(pid),
        ));
    }

    fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
        // Event-driven only.
        ProcessStatus::WaitMessage
    }

    fn execute_message(
        &mut self,
        _pid: Pid,
        _services: &mut ProcessServices<'_>,
        message: ProcessMessage,
    ) -> ProcessStatus {
        match message {
            ProcessMessage::Event {
                event: Event::Connection(connection),
                ..
            } => {
                self.handle_connection(connection.entity, connection.action);
                ProcessStatus::WaitMessage
            }
            ProcessMessage::SubscriptionDeleted { .. } => {
                error!("connection subscription deleted; shutting down manager");
                ProcessStatus::Finished
            }
            other => {
                error!(category = ?other.category(), "unknown message type");
                ProcessStatus::WaitMessage
            }
        }
    }

    fn name(&self, _pid: Pid) -> String {
        PROCESS_NAME.to_string()
    }

    fn finished(&mut self, _pid: Pid) {
        if let Some(sub) = self.subscription.take() {
            self.world.events.unsubscribe(sub);
        }
    }
}
