//! Keeping the online-name registry current.
//!
//! Spawned at server startup, this daemon-style process watches connects,
//! disconnects, renames, puppet creation and deletion, and ownership
//! changes for one site, and mirrors them into the name registry: connect
//! registers the player and every owned puppet, disconnect removes them,
//! renames update in place, and a puppet handed to an offline player drops
//! out of the registry.

use std::collections::HashSet;
use tracing::{debug, error};

use crate::events::{
    ConnectionAction, EntityChange, EntityChangedEvent, Event, SubscriptionId,
    SubscriptionParams, SubscriptionTarget,
};
use crate::executor::message::ProcessMessage;
use crate::executor::process::{Process, ProcessStatus};
use crate::executor::services::ProcessServices;
use crate::types::{EntityId, Pid, SiteId};
use crate::world::store::EntityType;
use crate::world::WorldContext;

const PROCESS_NAME: &str = "Entity Name Manager";

#[derive(Debug)]
pub struct EntityNameManager {
    world: WorldContext,
    site: SiteId,
    online: HashSet<EntityId>,
    connection_sub: Option<SubscriptionId>,
    change_sub: Option<SubscriptionId>,
}

impl EntityNameManager {
    pub fn new(world: WorldContext, site: SiteId) -> Self {
        Self {
            world,
            site,
            online: HashSet::new(),
            connection_sub: None,
            change_sub: None,
        }
    }

    fn register_with_puppets(&self, player: EntityId) {
        let Some(info) = self.world.store.entity(player) else {
            error!(%player, "connected entity not found in store");
            return;
        };
        self.world
            .names
            .register_name(player, &info.name, EntityType::Player);

        for puppet in self.world.store.puppets_owned_by(player) {
            self.world
                .names
                .register_name(puppet.id, &puppet.name, EntityType::Puppet);
        }
    }

    fn unregister_with_puppets(&self, player: EntityId) {
        self.world.names.unregister_name(player);
        for puppet in self.world.store.puppets_owned_by(player) {
            self.world.names.unregister_name(puppet.id);
        }
    }

    fn owner_online(&self, owner: Option<EntityId>) -> bool {
        owner.map_or(false, |owner| self.online.contains(&owner))
    }

    fn handle_connection(&mut self, entity: EntityId, action: ConnectionAction) {
        match action {
            ConnectionAction::Connected => {
                if self.online.insert(entity) {
                    self.register_with_puppets(entity);
                }
            }
            ConnectionAction::Disconnected => {
                if self.online.remove(&entity) {
                    self.unregister_with_puppets(entity);
                }
            }
        }
    }

    fn handle_entity_changed(&mut self, changed: EntityChangedEvent) {
        match changed.change {
            EntityChange::Updated => {
                // A rename; the registry ignores entities it does not hold.
                if let Some(info) = self.world.store.entity(changed.entity) {
                    self.world.names.update_name(changed.entity, &info.name);
                }
            }
            EntityChange::Created => {
                if changed.entity_type == EntityType::Puppet && self.owner_online(changed.owner) {
                    if let Some(info) = self.world.store.entity(changed.entity) {
                        self.world
                            .names
                            .register_name(info.id, &info.name, EntityType::Puppet);
                    }
                }
            }
            EntityChange::Deleted => {
                self.world.names.unregister_name(changed.entity);
            }
            EntityChange::OwnerChanged => {
                if changed.entity_type != EntityType::Puppet {
                    return;
                }
                if self.owner_online(changed.owner) {
                    if let Some(info) = self.world.store.entity(changed.entity) {
                        self.world
                            .names
                            .register_name(info.id, &info.name, EntityType::Puppet);
                    }
                } else {
                    // New owner is offline; the puppet leaves the registry.
                    self.world.names.unregister_name(changed.entity);
                }
            }
        }
    }
}

impl Process for EntityNameManager {
    fn added(&mut self, pid: Pid, _services: &mut ProcessServices<'_>) {
        let target = SubscriptionTarget::Process(pid);
        self.connection_sub = Some(self.world.events.subscribe(
            SubscriptionParams::Connection { site: self.site },
            target.clone(),
        ));
        self.change_sub = Some(self.world.events.subscribe(
            SubscriptionParams::EntityChanged {
                entities: Vec::new(),
                entity_type: None,
                owner: None,
                changes: vec![
                    EntityChange::Created,
                    EntityChange::Deleted,
                    EntityChange::Updated,
                    EntityChange::OwnerChanged,
                ],
            },
            target,
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
            ProcessMessage::Event { event, .. } => {
                match event {
                    Event::Connection(connection) => {
                        self.handle_connection(connection.entity, connection.action);
                    }
                    Event::EntityChanged(changed) => self.handle_entity_changed(changed),
                    other => debug!(?other, "unhandled event kind"),
                }
                ProcessStatus::WaitMessage
            }
            ProcessMessage::SubscriptionDeleted { .. } => {
                error!("name manager subscription deleted; shutting down");
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
        for sub in [self.connection_sub.take(), self.change_sub.take()]
            .into_iter()
            .flatten()
        {
            self.world.events.unsubscribe(sub);
        }
    }
}
