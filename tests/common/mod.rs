//! Shared stub collaborators for integration tests.
//!
//! The event bus here implements just enough subscription matching to
//! exercise the agent subsystem; the real matching engine lives outside
//! the core.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mudcore::channels::{ChannelReceiver, TextChannel, TextLine};
use mudcore::events::{
    Event, EventBus, SubscriptionId, SubscriptionParams, SubscriptionTarget,
};
use mudcore::executor::message::ProcessMessage;
use mudcore::executor::scheduler::Scheduler;
use mudcore::types::{AgentConfig, EntityId, Error, ExecutorConfig, Pid, Result};
use mudcore::world::comm::{CommService, SessionChannel, SessionStats};
use mudcore::world::movement::MovementService;
use mudcore::world::security::{
    Capability, SecurityContext, SecurityOperation, SecurityService,
};
use mudcore::world::softcode::SoftcodeService;
use mudcore::world::store::{ActionResolution, EntityInfo, EntityType, WorldStore};
use mudcore::world::WorldContext;

pub fn test_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        worker_threads: 2,
        max_processes: 128,
        ready_poll: Duration::from_millis(20),
        shutdown_poll: Duration::from_millis(5),
    }
}

/// Polls until the condition holds or the deadline passes.
pub fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ---------------------------------------------------------------------
// Event bus

struct Subscription {
    params: SubscriptionParams,
    target: SubscriptionTarget,
}

/// Minimal matching bus: delivers matched events to subscribed processes
/// through the scheduler and records everything published.
pub struct StubEventBus {
    scheduler: Mutex<Option<Arc<Scheduler>>>,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
    pub published: Mutex<Vec<Event>>,
}

impl StubEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scheduler: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn set_scheduler(&self, scheduler: Arc<Scheduler>) {
        *self.scheduler.lock() = Some(scheduler);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn published_process_states(&self) -> Vec<(Pid, mudcore::executor::ProcessState)> {
        self.published
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::ProcessExecution(pe) => Some((pe.pid, pe.state)),
                _ => None,
            })
            .collect()
    }

    fn matches(params: &SubscriptionParams, event: &Event) -> bool {
        match (params, event) {
            (SubscriptionParams::Movement { who }, Event::Movement(movement)) => {
                movement.who == *who
            }
            (SubscriptionParams::Emit { room, target }, Event::Emit(emit)) => {
                if let Some(target) = target {
                    emit.target == Some(*target)
                } else {
                    emit.target.is_none() && *room == emit.room
                }
            }
            (SubscriptionParams::Connection { site }, Event::Connection(connection)) => {
                connection.site == *site
            }
            (
                SubscriptionParams::EntityChanged {
                    entities,
                    entity_type,
                    owner,
                    changes,
                },
                Event::EntityChanged(changed),
            ) => {
                (entities.is_empty() || entities.contains(&changed.entity))
                    && entity_type.map_or(true, |t| t == changed.entity_type)
                    && (changes.is_empty() || changes.contains(&changed.change))
                    && owner.map_or(true, |o| {
                        changed.owner == Some(o) || changed.previous_owner == Some(o)
                    })
            }
            _ => false,
        }
    }
}

impl EventBus for StubEventBus {
    fn subscribe(&self, params: SubscriptionParams, target: SubscriptionTarget) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .insert(id, Subscription { params, target });
        SubscriptionId::new(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().remove(&id.get()).is_some()
    }

    fn publish(&self, event: Event) {
        self.published.lock().push(event.clone());

        let matched: Vec<(u64, SubscriptionTarget)> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, sub)| Self::matches(&sub.params, &event))
            .map(|(id, sub)| (*id, sub.target.clone()))
            .collect();

        for (id, target) in matched {
            match target {
                SubscriptionTarget::Process(pid) => {
                    if let Some(scheduler) = self.scheduler.lock().clone() {
                        scheduler.send_message(
                            pid,
                            ProcessMessage::Event {
                                subscription: SubscriptionId::new(id),
                                event: event.clone(),
                            },
                        );
                    }
                }
                SubscriptionTarget::Listener(listener) => {
                    listener.event_matched(SubscriptionId::new(id), &event);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// Session sink / comm

/// Collects every text line delivered to a session.
#[derive(Default)]
pub struct LineSink {
    pub lines: Mutex<Vec<TextLine>>,
}

impl LineSink {
    pub fn plain_lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .map(|line| line.to_plain_string())
            .collect()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.plain_lines().iter().any(|line| line == text)
    }
}

impl ChannelReceiver<TextLine> for LineSink {
    fn item_received(&self, _channel: &str, item: TextLine) {
        self.lines.lock().push(item);
    }
}

#[derive(Default)]
struct Session {
    sink: Arc<LineSink>,
    inputs: Vec<Arc<TextChannel>>,
    enhanced: bool,
}

/// Communication collaborator stub: binds output channels to a per-session
/// line sink and keeps input channels addressable for test input.
#[derive(Default)]
pub struct StubComm {
    sessions: Mutex<HashMap<EntityId, Session>>,
    pub disconnected: Mutex<Vec<EntityId>>,
}

impl StubComm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sink_for(&self, session: EntityId) -> Arc<LineSink> {
        self.sessions.lock().entry(session).or_default().sink.clone()
    }

    /// Simulates the user typing one line.
    pub fn type_line(&self, session: EntityId, text: &str) {
        let input = self
            .sessions
            .lock()
            .get(&session)
            .and_then(|s| s.inputs.last().cloned());
        let input = input.unwrap_or_else(|| panic!("no input channel for session {session}"));
        input
            .send(TextLine::plain(text))
            .unwrap_or_else(|_| panic!("input channel rejected line for {session}"));
    }

    pub fn close_session_input(&self, session: EntityId) {
        if let Some(input) = self
            .sessions
            .lock()
            .get(&session)
            .and_then(|s| s.inputs.last().cloned())
        {
            input.close();
        }
    }
}

impl CommService for StubComm {
    fn add_channel(&self, session: EntityId, channel: SessionChannel, to_client: bool) -> bool {
        let mut sessions = self.sessions.lock();
        let record = sessions.entry(session).or_default();

        match channel {
            SessionChannel::Text(text) => {
                if to_client {
                    text.register_receiver_callback(
                        record.sink.clone() as Arc<dyn ChannelReceiver<TextLine>>
                    )
                } else {
                    // The transport holds the channel and produces into it.
                    text.register_holder();
                    record.inputs.push(text);
                    true
                }
            }
            SessionChannel::ClientData(data) => {
                // Tests do not inspect data streams; just keep it alive.
                data.register_holder();
                true
            }
        }
    }

    fn disconnect_session(&self, session: EntityId) -> bool {
        self.disconnected.lock().push(session);
        true
    }

    fn session_stats(&self, session: EntityId) -> Option<SessionStats> {
        let enhanced = self
            .sessions
            .lock()
            .get(&session)
            .map(|s| s.enhanced)
            .unwrap_or(false);
        Some(SessionStats {
            connected: true,
            enhanced_client: enhanced,
        })
    }
}

// ---------------------------------------------------------------------
// World store

#[derive(Default)]
pub struct StubStore {
    pub entities: Mutex<HashMap<EntityId, EntityInfo>>,
    pub actions: Mutex<HashMap<String, EntityInfo>>,
    pub programs: Mutex<HashMap<EntityId, Vec<String>>>,
    pub documents: Mutex<HashMap<(EntityId, String), Vec<String>>>,
    pub unwritable_documents: Mutex<HashSet<EntityId>>,
}

impl StubStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_entity(&self, info: EntityInfo) {
        self.entities.lock().insert(info.id, info);
    }

    pub fn add_action(&self, command: &str, info: EntityInfo) {
        self.add_entity(info.clone());
        self.actions.lock().insert(command.to_string(), info);
    }

    pub fn document(&self, entity: EntityId, property: &str) -> Option<Vec<String>> {
        self.documents
            .lock()
            .get(&(entity, property.to_string()))
            .cloned()
    }
}

impl WorldStore for StubStore {
    fn entity(&self, id: EntityId) -> Option<EntityInfo> {
        self.entities.lock().get(&id).cloned()
    }

    fn resolve_action(
        &self,
        _requester: EntityId,
        _location: Option<EntityId>,
        command: &str,
    ) -> ActionResolution {
        match self.actions.lock().get(command) {
            Some(info) => ActionResolution::Action(info.clone()),
            None => ActionResolution::NotFound,
        }
    }

    fn puppets_owned_by(&self, owner: EntityId) -> Vec<EntityInfo> {
        self.entities
            .lock()
            .values()
            .filter(|info| info.entity_type == EntityType::Puppet && info.owner == Some(owner))
            .cloned()
            .collect()
    }

    fn program_source(&self, program: EntityId) -> Option<Vec<String>> {
        self.programs.lock().get(&program).cloned()
    }

    fn set_program_source(&self, program: EntityId, lines: Vec<String>) -> Result<()> {
        self.programs.lock().insert(program, lines);
        Ok(())
    }

    fn program_language(&self, program: EntityId) -> Option<String> {
        self.programs
            .lock()
            .contains_key(&program)
            .then(|| "script".to_string())
    }

    fn document_property(&self, entity: EntityId, property: &str) -> Option<Vec<String>> {
        self.document(entity, property)
    }

    fn set_document_property(
        &self,
        entity: EntityId,
        property: &str,
        lines: Vec<String>,
    ) -> Result<()> {
        if self.unwritable_documents.lock().contains(&entity) {
            return Err(Error::denied(format!("document on {entity} not writable")));
        }
        self.documents
            .lock()
            .insert((entity, property.to_string()), lines);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Security

/// Allow-all security stub with a configurable deny list.
#[derive(Default)]
pub struct StubSecurity {
    pub denied_ops: Mutex<HashSet<SecurityOperation>>,
    pub capabilities: Mutex<HashMap<EntityId, Vec<Capability>>>,
}

impl StubSecurity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, op: SecurityOperation) {
        self.denied_ops.lock().insert(op);
    }

    pub fn grant_capabilities(&self, entity: EntityId, capabilities: Vec<Capability>) {
        self.capabilities.lock().insert(entity, capabilities);
    }
}

impl SecurityService for StubSecurity {
    fn security_check(
        &self,
        op: SecurityOperation,
        context: &mut SecurityContext,
        target: Option<EntityId>,
    ) -> bool {
        if let Some(cached) = context.cached(op, target) {
            return cached;
        }
        let allowed = !self.denied_ops.lock().contains(&op);
        context.cache_result(op, target, allowed);
        allowed
    }

    fn populate_context_capabilities(&self, context: &mut SecurityContext) {
        let capabilities = self
            .capabilities
            .lock()
            .get(&context.requester())
            .cloned()
            .unwrap_or_default();
        for capability in capabilities {
            context.grant(capability);
        }
    }
}

// ---------------------------------------------------------------------
// Softcode

/// Process created by the softcode stub: writes one line to its output
/// channel and finishes.
struct ProgramProcess {
    output: Arc<TextChannel>,
    line: String,
}

impl mudcore::executor::Process for ProgramProcess {
    fn added(&mut self, _pid: Pid, services: &mut mudcore::executor::ProcessServices<'_>) {
        // Register as a sender so the channel closes when this process
        // finishes.
        let _ = services.add_resource(self.output.as_resource());
    }

    fn execute(
        &mut self,
        _pid: Pid,
        _services: &mut mudcore::executor::ProcessServices<'_>,
    ) -> mudcore::executor::ProcessStatus {
        if self.output.send(TextLine::plain(self.line.clone())).is_err() {
            return mudcore::executor::ProcessStatus::Error;
        }
        mudcore::executor::ProcessStatus::Finished
    }

    fn name(&self, _pid: Pid) -> String {
        format!("program: {}", self.line)
    }
}

/// Softcode collaborator stub: every command becomes a [`ProgramProcess`]
/// echoing its arguments (or `<command> output` when bare).
pub struct StubSoftcode {
    scheduler: Arc<Scheduler>,
    pub uncompiled: Mutex<Vec<EntityId>>,
}

impl StubSoftcode {
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            uncompiled: Mutex::new(Vec::new()),
        })
    }
}

impl SoftcodeService for StubSoftcode {
    fn make_process(
        &self,
        context: SecurityContext,
        command: &str,
        arguments: &str,
        output: Arc<TextChannel>,
        _input: Option<Arc<TextChannel>>,
    ) -> Option<Pid> {
        let line = if arguments.is_empty() {
            format!("{command} output")
        } else {
            arguments.to_string()
        };
        self.scheduler.add_process(
            Box::new(ProgramProcess { output, line }),
            context.program(),
            Some(context.requester()),
        )
    }

    fn compile(&self, _program: EntityId, _output: Arc<TextChannel>) -> bool {
        true
    }

    fn uncompile(&self, program: EntityId) -> bool {
        self.uncompiled.lock().push(program);
        true
    }
}

// ---------------------------------------------------------------------
// Name registry

/// In-memory name registry mirror.
#[derive(Default)]
pub struct StubNameRegistry {
    pub names: Mutex<HashMap<EntityId, (String, EntityType)>>,
}

impl StubNameRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn name_of(&self, entity: EntityId) -> Option<String> {
        self.names.lock().get(&entity).map(|(name, _)| name.clone())
    }
}

impl mudcore::world::names::NameRegistry for StubNameRegistry {
    fn register_name(&self, entity: EntityId, name: &str, entity_type: EntityType) -> bool {
        self.names
            .lock()
            .insert(entity, (name.to_string(), entity_type));
        true
    }

    fn unregister_name(&self, entity: EntityId) {
        self.names.lock().remove(&entity);
    }

    fn update_name(&self, entity: EntityId, name: &str) {
        if let Some(entry) = self.names.lock().get_mut(&entity) {
            entry.0 = name.to_string();
        }
    }
}

// ---------------------------------------------------------------------
// Movement

#[derive(Default)]
pub struct StubMovement {
    pub moves: Mutex<Vec<(EntityId, EntityId)>>,
}

impl StubMovement {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl MovementService for StubMovement {
    fn move_through_exit(
        &self,
        _context: &mut SecurityContext,
        who: EntityId,
        exit: EntityId,
    ) -> Result<()> {
        self.moves.lock().push((who, exit));
        Ok(())
    }
}

// ---------------------------------------------------------------------
// World assembly

pub struct TestWorld {
    pub executor: mudcore::executor::Executor,
    pub world: WorldContext,
    pub bus: Arc<StubEventBus>,
    pub store: Arc<StubStore>,
    pub security: Arc<StubSecurity>,
    pub softcode: Arc<StubSoftcode>,
    pub comm: Arc<StubComm>,
    pub movement: Arc<StubMovement>,
    pub names: Arc<StubNameRegistry>,
}

impl TestWorld {
    pub fn start() -> Self {
        let bus = StubEventBus::new();
        let executor = mudcore::executor::Executor::start(
            test_executor_config(),
            bus.clone() as Arc<dyn EventBus>,
        );
        let scheduler = executor.scheduler().clone();
        bus.set_scheduler(scheduler.clone());

        let store = StubStore::new();
        let security = StubSecurity::new();
        let softcode = StubSoftcode::new(scheduler.clone());
        let comm = StubComm::new();
        let movement = StubMovement::new();
        let names = StubNameRegistry::new();

        let world = WorldContext {
            scheduler,
            events: bus.clone(),
            store: store.clone(),
            security: security.clone(),
            softcode: softcode.clone(),
            comm: comm.clone(),
            movement: movement.clone(),
            names: names.clone(),
            agent_config: AgentConfig::default(),
        };

        Self {
            executor,
            world,
            bus,
            store,
            security,
            softcode,
            comm,
            movement,
            names,
        }
    }

    /// Registers the conventional `look` action every room description
    /// test relies on.
    pub fn add_look_action(&self, site: u16) {
        let look = EntityInfo {
            id: EntityId::new(site, 900),
            entity_type: EntityType::Command,
            name: "look".to_string(),
            owner: None,
            location: None,
        };
        self.store.add_action("look", look);
    }
}
