//! Event types and the event-bus collaborator seam.
//!
//! The core publishes process lifecycle events and the agent subsystem
//! consumes movement, emit, connection, and entity-change events. The
//! subscription *matching* engine is an external collaborator; this module
//! defines the event payloads, the subscription parameters, and the
//! [`EventBus`] trait the core is wired against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::channels::item::TextLine;
use crate::executor::record::ProcessState;
use crate::types::{EntityId, Pid, SiteId};
use crate::world::store::EntityType;

/// Identifier for a live subscription; carried inside matched-event
/// messages so recipients can tell their subscriptions apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Published by the scheduler on admit, kill, and final teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessExecutionEvent {
    pub pid: Pid,
    pub executable: Option<EntityId>,
    pub owner: Option<EntityId>,
    pub name: String,
    /// One of `Created`, `Killed`, `Completed`.
    pub state: ProcessState,
}

/// An entity moved between containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementEvent {
    pub who: EntityId,
    pub from: Option<EntityId>,
    pub to: EntityId,
    /// The exit used, when the movement went through one.
    pub via: Option<EntityId>,
}

/// Text emitted into a room or directly at an entity (private message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitEvent {
    pub source: EntityId,
    /// Direct target, for private messages.
    pub target: Option<EntityId>,
    /// Containing room, for room-scoped emits.
    pub room: Option<EntityId>,
    pub text: TextLine,
}

/// A session connected or disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub entity: EntityId,
    pub site: SiteId,
    pub action: ConnectionAction,
}

/// What changed about an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityChange {
    Created,
    Deleted,
    Updated,
    OwnerChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChangedEvent {
    pub entity: EntityId,
    pub entity_type: EntityType,
    pub change: EntityChange,
    pub owner: Option<EntityId>,
    /// Set for `OwnerChanged`.
    pub previous_owner: Option<EntityId>,
}

/// Everything that can travel over the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ProcessExecution(ProcessExecutionEvent),
    Movement(MovementEvent),
    Emit(EmitEvent),
    Connection(ConnectionEvent),
    EntityChanged(EntityChangedEvent),
}

/// What a subscription matches against. Evaluation is performed by the
/// external matching engine; the core only describes intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubscriptionParams {
    /// Movement of a specific entity.
    Movement { who: EntityId },
    /// Emits scoped to a container and/or targeting an entity directly.
    Emit {
        room: Option<EntityId>,
        target: Option<EntityId>,
    },
    /// Connection events for a site.
    Connection { site: SiteId },
    /// Entity-change events, filtered by entities, type, owner, and kinds
    /// of change. Empty filters match everything.
    EntityChanged {
        entities: Vec<EntityId>,
        entity_type: Option<EntityType>,
        owner: Option<EntityId>,
        changes: Vec<EntityChange>,
    },
}

/// Callback form of a subscription target.
pub trait EventListener: Send + Sync {
    fn event_matched(&self, subscription: SubscriptionId, event: &Event);
}

/// Where matched events are delivered.
#[derive(Clone)]
pub enum SubscriptionTarget {
    /// Delivered as `ProcessMessage::Event` to the process.
    Process(Pid),
    /// Delivered synchronously to the listener.
    Listener(Arc<dyn EventListener>),
}

impl fmt::Debug for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Process(pid) => f.debug_tuple("Process").field(pid).finish(),
            SubscriptionTarget::Listener(_) => f.write_str("Listener(..)"),
        }
    }
}

/// The event-bus collaborator.
pub trait EventBus: Send + Sync {
    fn subscribe(&self, params: SubscriptionParams, target: SubscriptionTarget) -> SubscriptionId;

    /// Returns false if the subscription was not known.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn publish(&self, event: Event);
}

/// Bus that matches nothing; useful for wiring and for processes that only
/// publish.
#[derive(Debug, Default)]
pub struct NullEventBus {
    next_id: AtomicU64,
}

impl NullEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for NullEventBus {
    fn subscribe(&self, _params: SubscriptionParams, _target: SubscriptionTarget) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn unsubscribe(&self, _id: SubscriptionId) -> bool {
        true
    }

    fn publish(&self, _event: Event) {}
}
