//! Session machinery shared by user and puppet agents.
//!
//! An agent is a message-driven process bound to a transport session: it
//! owns the session's text channels, subscribes to the events its entity
//! cares about, parses command lines, and dispatches actions, launching
//! softcode processes with optional output redirection. [`AgentCore`] holds
//! all of that; the concrete agent processes wrap it and decide what
//! termination and dormancy mean for them.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::agent::document::DocumentWriter;
use crate::channels::{ClientMessage, TextChannel, TextColor, TextLine};
use crate::events::{EmitEvent, Event, MovementEvent, SubscriptionId, SubscriptionParams, SubscriptionTarget};
use crate::executor::message::{FlowStatus, ProcessMessage};
use crate::executor::services::ProcessServices;
use crate::types::{EntityId, Error, Pid, Result, Rid};
use crate::world::comm::SessionChannel;
use crate::world::security::{
    SecurityContext, SecurityOperation, INHERITED_PUPPET_CAPABILITIES,
};
use crate::world::store::{ActionResolution, EntityInfo, EntityType};
use crate::world::WorldContext;

const QUIT_COMMAND: &str = "QUIT";
const LIST_PROG_COMMAND: &str = "/listprog";
const EDIT_PROG_COMMAND: &str = "/editprog";
const SAVE_EDIT_STRING: &str = ".save";
const ABORT_EDIT_STRING: &str = ".abort";
const REDIRECT_SYM: &str = ">>";
const PRIVATE_MARKER: &str = "(private) ";

/// Where an agent's capabilities come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilitySource {
    /// The agent's own entity carries its capabilities.
    Own,
    /// A puppet: capabilities are the inheritable subset of the owning
    /// player's.
    InheritedFrom(EntityId),
}

/// What the caller should do after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentDisposition {
    Continue,
    Terminate,
}

struct BoundText {
    channel: Arc<TextChannel>,
    rid: Rid,
}

struct BoundData {
    channel: Arc<crate::channels::ClientDataChannel>,
    rid: Rid,
}

struct EditSession {
    program: EntityId,
    lines: Vec<String>,
}

/// Shared per-session agent state and behavior.
pub struct AgentCore {
    world: WorldContext,
    agent_entity: EntityId,
    session_entity: EntityId,
    capability_source: CapabilitySource,

    pid: Option<Pid>,
    context: SecurityContext,
    last_refresh: Option<Instant>,

    output: Option<BoundText>,
    input: Option<BoundText>,
    data_out: Option<BoundData>,

    location: Option<EntityId>,
    movement_sub: Option<SubscriptionId>,
    emit_sub: Option<SubscriptionId>,
    private_sub: Option<SubscriptionId>,

    edit: Option<EditSession>,
}

impl AgentCore {
    pub fn new(
        world: WorldContext,
        agent_entity: EntityId,
        session_entity: EntityId,
        capability_source: CapabilitySource,
    ) -> Self {
        Self {
            context: SecurityContext::new(agent_entity),
            world,
            agent_entity,
            session_entity,
            capability_source,
            pid: None,
            last_refresh: None,
            output: None,
            input: None,
            data_out: None,
            location: None,
            movement_sub: None,
            emit_sub: None,
            private_sub: None,
            edit: None,
        }
    }

    pub fn agent_entity(&self) -> EntityId {
        self.agent_entity
    }

    pub fn session_entity(&self) -> EntityId {
        self.session_entity
    }

    pub fn world(&self) -> &WorldContext {
        &self.world
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// True once channels are bound; puppets stay dormant until then.
    pub fn is_active(&self) -> bool {
        self.output.is_some()
    }

    /// Binds session channels, refreshes capabilities, and subscribes to
    /// events. `with_input` is false for puppets, whose commands arrive as
    /// interprocess messages instead of an input channel.
    pub fn setup(
        &mut self,
        pid: Pid,
        services: &mut ProcessServices<'_>,
        channel_subtype: &str,
        with_input: bool,
    ) -> Result<()> {
        self.pid = Some(pid);
        self.refresh_context(true);
        self.location = self
            .world
            .store
            .entity(self.agent_entity)
            .and_then(|info| info.location);

        let scheduler = self.world.scheduler.clone();

        // Output: this process is the sender, the session the receiver.
        let output = TextChannel::new(
            "agent_out",
            Some(channel_subtype.to_string()),
            scheduler.clone(),
        );
        let out_rid = services.add_resource(output.as_resource())?;
        if !self
            .world
            .comm
            .add_channel(self.session_entity, SessionChannel::Text(output.clone()), true)
        {
            services.remove_resource(out_rid);
            return Err(Error::internal(format!(
                "unable to attach output channel to session {}",
                self.session_entity
            )));
        }
        output.unblock(0);
        self.output = Some(BoundText {
            channel: output,
            rid: out_rid,
        });

        if with_input {
            // Input: this process is the receiver and blocks on it.
            let input = TextChannel::new(
                "agent_in",
                Some(channel_subtype.to_string()),
                scheduler.clone(),
            );
            input.mark_next_add_receiver(pid);
            let in_rid = services.add_blocking_resource(input.as_resource())?;
            if !self
                .world
                .comm
                .add_channel(self.session_entity, SessionChannel::Text(input.clone()), false)
            {
                services.remove_resource(in_rid);
                return Err(Error::internal(format!(
                    "unable to attach input channel to session {}",
                    self.session_entity
                )));
            }
            input.unblock(0);
            self.input = Some(BoundText {
                channel: input,
                rid: in_rid,
            });
        }

        // Enhanced clients also get a structured data stream.
        let enhanced = self
            .world
            .comm
            .session_stats(self.session_entity)
            .map(|stats| stats.enhanced_client)
            .unwrap_or(false);
        if enhanced {
            let data = crate::channels::ClientDataChannel::new(
                "agent_data",
                Some(channel_subtype.to_string()),
                scheduler,
            );
            let data_rid = services.add_resource(data.as_resource())?;
            if self.world.comm.add_channel(
                self.session_entity,
                SessionChannel::ClientData(data.clone()),
                true,
            ) {
                data.unblock(0);
                self.data_out = Some(BoundData {
                    channel: data,
                    rid: data_rid,
                });
            } else {
                services.remove_resource(data_rid);
            }
        }

        self.subscribe_events();
        Ok(())
    }

    /// Detaches channels and subscriptions but keeps the process alive;
    /// this is puppet dormancy. Safe to call when already released.
    pub fn release(&mut self, services: &mut ProcessServices<'_>) {
        if let Some(bound) = self.input.take() {
            services.remove_resource(bound.rid);
        }
        if let Some(bound) = self.output.take() {
            services.remove_resource(bound.rid);
        }
        if let Some(bound) = self.data_out.take() {
            services.remove_resource(bound.rid);
        }
        self.unsubscribe_events();
        self.context.clear();
        self.last_refresh = None;
        self.edit = None;
    }

    /// Drops event subscriptions; the final cleanup hook for agents whose
    /// resources the scheduler tears down itself.
    pub fn unsubscribe_events(&mut self) {
        for sub in [
            self.movement_sub.take(),
            self.emit_sub.take(),
            self.private_sub.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.world.events.unsubscribe(sub);
        }
    }

    fn subscribe_events(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        let target = SubscriptionTarget::Process(pid);

        self.movement_sub = Some(self.world.events.subscribe(
            SubscriptionParams::Movement {
                who: self.agent_entity,
            },
            target.clone(),
        ));
        self.emit_sub = self.location.map(|room| {
            self.world.events.subscribe(
                SubscriptionParams::Emit {
                    room: Some(room),
                    target: None,
                },
                target.clone(),
            )
        });
        self.private_sub = Some(self.world.events.subscribe(
            SubscriptionParams::Emit {
                room: None,
                target: Some(self.agent_entity),
            },
            target,
        ));
    }

    fn resubscribe_emit(&mut self) {
        if let Some(old) = self.emit_sub.take() {
            self.world.events.unsubscribe(old);
        }
        if let (Some(pid), Some(room)) = (self.pid, self.location) {
            self.emit_sub = Some(self.world.events.subscribe(
                SubscriptionParams::Emit {
                    room: Some(room),
                    target: None,
                },
                SubscriptionTarget::Process(pid),
            ));
        }
    }

    /// Handles a message that arrived via one of the agent's resources.
    pub fn handle_resource_message(
        &mut self,
        rid: Rid,
        message: ProcessMessage,
    ) -> AgentDisposition {
        match message {
            ProcessMessage::TextChannel { line, .. } => {
                if self.input.as_ref().map(|b| b.rid) == Some(rid) {
                    self.handle_command_line(&line.to_plain_string())
                } else {
                    debug!(%rid, "text item on non-input resource ignored");
                    AgentDisposition::Continue
                }
            }
            ProcessMessage::ChannelFlow { status, channel } => {
                match status {
                    FlowStatus::Closed | FlowStatus::Destructed => {
                        debug!(%channel, ?status, "session channel gone");
                        AgentDisposition::Terminate
                    }
                    _ => AgentDisposition::Continue,
                }
            }
            other => {
                debug!(category = ?other.category(), "unexpected resource message");
                AgentDisposition::Continue
            }
        }
    }

    /// Handles a message that did not come from a resource: matched events
    /// and subscription teardown.
    pub fn handle_plain_message(&mut self, message: ProcessMessage) -> AgentDisposition {
        match message {
            ProcessMessage::Event {
                subscription,
                event,
            } => self.handle_event(subscription, event),
            ProcessMessage::SubscriptionDeleted { .. } => AgentDisposition::Terminate,
            other => {
                debug!(category = ?other.category(), "unexpected message ignored");
                AgentDisposition::Continue
            }
        }
    }

    pub fn handle_event(
        &mut self,
        subscription: SubscriptionId,
        event: Event,
    ) -> AgentDisposition {
        match event {
            Event::Movement(movement) => self.handle_movement(movement),
            Event::Emit(emit) => self.handle_emit(subscription, emit),
            other => {
                debug!(?other, "unhandled event kind");
                AgentDisposition::Continue
            }
        }
    }

    fn handle_movement(&mut self, movement: MovementEvent) -> AgentDisposition {
        if movement.who != self.agent_entity {
            return AgentDisposition::Continue;
        }

        self.location = Some(movement.to);
        self.resubscribe_emit();
        self.force_look();

        if let Some(data) = &self.data_out {
            let update = ClientMessage::new(
                "location_update",
                serde_json::json!({ "location": movement.to.to_string() }),
            );
            if data.channel.send(update).is_err() {
                debug!("data channel rejected location update");
            }
        }
        AgentDisposition::Continue
    }

    fn handle_emit(&mut self, subscription: SubscriptionId, emit: EmitEvent) -> AgentDisposition {
        let mut line = emit.text;
        if Some(subscription) == self.private_sub {
            line.prepend(crate::channels::TextSegment::colored(
                PRIVATE_MARKER,
                TextColor::Magenta,
            ));
        }
        self.send_line(line);
        AgentDisposition::Continue
    }

    /// Parses and dispatches one line of user input.
    pub fn handle_command_line(&mut self, line: &str) -> AgentDisposition {
        if self.edit.is_some() {
            self.process_edit_line(line);
            return AgentDisposition::Continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return AgentDisposition::Continue;
        }

        self.refresh_context(false);

        if trimmed == QUIT_COMMAND {
            self.world.comm.disconnect_session(self.session_entity);
            return AgentDisposition::Terminate;
        }

        // A leading ':' is a pose shortcut; inserting a space makes ':'
        // itself the action word.
        let command = if trimmed.len() > 1 && trimmed.starts_with(':') {
            format!(": {}", &trimmed[1..])
        } else {
            trimmed.to_string()
        };

        let (first, rest) = match command.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest.trim()),
            None => (command.as_str(), ""),
        };
        let first_lower = first.to_lowercase();
        if first_lower == LIST_PROG_COMMAND {
            self.list_program(rest);
            return AgentDisposition::Continue;
        }
        if first_lower == EDIT_PROG_COMMAND {
            self.enter_edit_program(rest);
            return AgentDisposition::Continue;
        }

        self.dispatch_command(&command);
        AgentDisposition::Continue
    }

    fn dispatch_command(&mut self, command: &str) {
        // Try the whole line as an action name first, then the first word
        // with the remainder as arguments.
        match self
            .world
            .store
            .resolve_action(self.agent_entity, self.location, command)
        {
            ActionResolution::Action(info) => return self.process_action(info, ""),
            ActionResolution::Denied => {
                return self.send_plain_text("Permission denied.", true);
            }
            ActionResolution::NotFound => {}
        }

        let (first, rest) = match command.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest.trim()),
            None => (command, ""),
        };

        match self
            .world
            .store
            .resolve_action(self.agent_entity, self.location, first)
        {
            ActionResolution::Action(info) => self.process_action(info, rest),
            ActionResolution::Denied => self.send_plain_text("Permission denied.", true),
            ActionResolution::NotFound => self.send_plain_text("Command not found.", true),
        }
    }

    /// Runs a resolved action: exits move the agent, commands launch a
    /// program.
    pub fn process_action(&mut self, info: EntityInfo, arguments: &str) {
        match info.entity_type {
            EntityType::Exit => {
                let result = self.world.movement.clone().move_through_exit(
                    &mut self.context,
                    self.agent_entity,
                    info.id,
                );
                if let Err(err) = result {
                    self.send_plain_text(&err.to_string(), true);
                }
            }
            EntityType::Command | EntityType::Program => self.run_program(info, arguments),
            _ => self.send_plain_text("That is not something you can do.", true),
        }
    }

    fn run_program(&mut self, info: EntityInfo, arguments: &str) {
        if !self.world.security.clone().security_check(
            SecurityOperation::RunProgram,
            &mut self.context,
            Some(info.id),
        ) {
            return self.send_plain_text("Permission denied.", true);
        }

        // Split off any redirect suffix before the program sees arguments.
        let mut arguments = arguments.trim().to_string();
        let mut redirect: Option<(EntityId, String)> = None;
        if let Some(position) = arguments.find(REDIRECT_SYM) {
            let target_spec = arguments[position + REDIRECT_SYM.len()..].trim().to_string();
            arguments.truncate(position);
            let trimmed = arguments.trim_end().len();
            arguments.truncate(trimmed);

            match self.parse_redirect(&target_spec) {
                Ok(target) => redirect = Some(target),
                Err(message) => return self.send_plain_text(message, true),
            }
        }

        if let Some((entity, property)) = &redirect {
            if !self.world.security.clone().security_check(
                SecurityOperation::WriteDocument,
                &mut self.context,
                Some(*entity),
            ) {
                return self.send_plain_text("Access denied on redirect target or property.", true);
            }
            // Probe with an empty document so failures surface before the
            // program runs.
            if self
                .world
                .store
                .set_document_property(*entity, property, Vec::new())
                .is_err()
            {
                return self.send_plain_text("Unable to set document on redirect target.", true);
            }
        }

        // The program runs with its own context; puppets pass along only
        // the inheritable capability subset.
        let mut program_context =
            SecurityContext::new(self.agent_entity).with_program(info.id);
        self.world
            .security
            .populate_context_capabilities(&mut program_context);
        if matches!(self.capability_source, CapabilitySource::InheritedFrom(_)) {
            program_context.restrict_to(&INHERITED_PUPPET_CAPABILITIES);
        }

        let channel = TextChannel::new(
            info.name.clone(),
            Some("prog".to_string()),
            self.world.scheduler.clone(),
        );

        let Some(program_pid) = self.world.softcode.make_process(
            program_context,
            &info.name,
            &arguments,
            channel.clone(),
            None,
        ) else {
            channel.close();
            return self.send_plain_text("Unable to create program process.", true);
        };

        let attached = match &redirect {
            Some((entity, property)) => DocumentWriter::attach(
                &channel,
                self.world.store.clone(),
                *entity,
                property.clone(),
            )
            .is_some(),
            None => self.world.comm.add_channel(
                self.session_entity,
                SessionChannel::Text(channel.clone()),
                true,
            ),
        };

        if !attached {
            self.world.scheduler.kill_process(program_pid);
            channel.close();
            return self.send_plain_text("Unable to attach program output.", true);
        }

        channel.unblock(0);
        self.world.scheduler.start_process(program_pid);
    }

    fn parse_redirect(&self, spec: &str) -> std::result::Result<(EntityId, String), &'static str> {
        let (entity_str, property) = spec
            .split_once('.')
            .ok_or("Unable to parse redirect parameters.")?;

        let entity = if entity_str == "me" {
            self.agent_entity
        } else {
            entity_str
                .parse()
                .map_err(|_| "Unable to parse redirect parameters.")?
        };

        if property.is_empty() {
            return Err("Unable to parse redirect parameters.");
        }
        if self.world.store.entity(entity).is_none() {
            return Err("Unable to find redirect target.");
        }
        Ok((entity, property.to_string()))
    }

    fn list_program(&mut self, argument: &str) {
        let Ok(program) = argument.parse::<EntityId>() else {
            return self.send_plain_text("Usage: /listprog <#site-entity>", true);
        };

        if !self.world.security.clone().security_check(
            SecurityOperation::ReadProgram,
            &mut self.context,
            Some(program),
        ) {
            return self.send_plain_text("Permission denied.", true);
        }

        match self.world.store.program_source(program) {
            Some(lines) => {
                for line in lines {
                    self.send_plain_text(&line, false);
                }
            }
            None => self.send_plain_text("Unable to find program.", true),
        }
    }

    fn enter_edit_program(&mut self, argument: &str) {
        let Ok(program) = argument.parse::<EntityId>() else {
            return self.send_plain_text("Usage: /editprog <#site-entity>", true);
        };

        if !self.world.security.clone().security_check(
            SecurityOperation::WriteProgram,
            &mut self.context,
            Some(program),
        ) {
            return self.send_plain_text("Permission denied.", true);
        }

        let lines = self.world.store.program_source(program).unwrap_or_default();
        self.edit = Some(EditSession { program, lines });
        self.send_plain_text(
            &format!("Editing program {program}. '{SAVE_EDIT_STRING}' saves, '{ABORT_EDIT_STRING}' discards."),
            false,
        );
    }

    fn process_edit_line(&mut self, line: &str) {
        match line.trim() {
            ABORT_EDIT_STRING => {
                self.edit = None;
                self.send_plain_text("Edit aborted.", false);
            }
            SAVE_EDIT_STRING => {
                let Some(session) = self.edit.take() else {
                    return;
                };
                match self
                    .world
                    .store
                    .set_program_source(session.program, session.lines)
                {
                    Ok(()) => {
                        // Stale compiled forms must not outlive the edit.
                        self.world.softcode.uncompile(session.program);
                        self.send_plain_text("Program saved.", false);
                    }
                    Err(err) => self.send_plain_text(&err.to_string(), true),
                }
            }
            _ => {
                if let Some(session) = self.edit.as_mut() {
                    session.lines.push(line.to_string());
                }
            }
        }
    }

    /// Forces a room description, as on connect or after movement.
    pub fn force_look(&mut self) {
        match self
            .world
            .store
            .resolve_action(self.agent_entity, self.location, "look")
        {
            ActionResolution::Action(info) => self.process_action(info, ""),
            _ => debug!("no look action available"),
        }
    }

    /// Re-populates cached capabilities when forced or stale.
    pub fn refresh_context(&mut self, force: bool) {
        let stale = self
            .last_refresh
            .map_or(true, |at| at.elapsed() >= self.world.agent_config.context_refresh);
        if !force && !stale {
            return;
        }

        self.context.clear();
        match self.capability_source {
            CapabilitySource::Own => {
                self.world
                    .security
                    .populate_context_capabilities(&mut self.context);
            }
            CapabilitySource::InheritedFrom(player) => {
                let mut parent = SecurityContext::new(player);
                self.world.security.populate_context_capabilities(&mut parent);
                for capability in parent.capabilities() {
                    if INHERITED_PUPPET_CAPABILITIES.contains(&capability) {
                        self.context.grant(capability);
                    }
                }
            }
        }
        if let Some(pid) = self.pid {
            self.context.set_pid(pid);
        }
        self.last_refresh = Some(Instant::now());
    }

    /// Sends one unformatted line to the session; errors go out in red.
    pub fn send_plain_text(&self, text: &str, is_error: bool) {
        let line = if is_error {
            TextLine::colored(text, TextColor::Red)
        } else {
            TextLine::plain(text)
        };
        self.send_line(line);
    }

    fn send_line(&self, line: TextLine) {
        match &self.output {
            Some(bound) => {
                if bound.channel.send(line).is_err() {
                    debug!(agent = %self.agent_entity, "output channel rejected line");
                }
            }
            None => warn!(agent = %self.agent_entity, "no output channel; line dropped"),
        }
    }
}

impl std::fmt::Debug for AgentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCore")
            .field("agent_entity", &self.agent_entity)
            .field("session_entity", &self.session_entity)
            .field("active", &self.is_active())
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
