//! The softcode collaborator: opaque program processes.
//!
//! The scheduler only ever sees the processes this collaborator creates.
//! Language interpreters self-register with [`SoftcodeRegistry`] during
//! server startup; afterwards the registry is safe to call from any
//! thread.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::channels::TextChannel;
use crate::types::{EntityId, Pid};
use crate::world::security::{SecurityContext, SecurityService};
use crate::world::store::WorldStore;

/// The softcode collaborator interface.
pub trait SoftcodeService: Send + Sync {
    /// Creates (but does not start) a process running the named command
    /// with the given arguments, wired to the provided channels. Returns
    /// the new PID, or `None` when the command has no runnable program or
    /// process admission failed.
    fn make_process(
        &self,
        context: SecurityContext,
        command: &str,
        arguments: &str,
        output: Arc<TextChannel>,
        input: Option<Arc<TextChannel>>,
    ) -> Option<Pid>;

    /// Compiles a program, reporting progress and errors on the channel.
    fn compile(&self, program: EntityId, output: Arc<TextChannel>) -> bool;

    /// Invalidates any compiled form of a program; called after its source
    /// changes.
    fn uncompile(&self, program: EntityId) -> bool;
}

/// One softcode language implementation.
///
/// The language name should stay short; it is the registry lookup key and
/// is matched against the program entity's language tag.
pub trait Interpreter: Send + Sync {
    fn language_name(&self) -> &str;

    /// Creates a ready-to-start process for the program in the context.
    /// If the program is not yet compiled and compilation is supported, it
    /// is compiled by the time the process starts.
    fn make_process(
        &self,
        context: SecurityContext,
        command: &str,
        arguments: &str,
        output: Arc<TextChannel>,
        input: Option<Arc<TextChannel>>,
    ) -> Option<Pid>;

    /// Compiles without running. A language without a compile step returns
    /// success.
    fn compile(&self, program: EntityId, output: Arc<TextChannel>) -> bool;

    /// Deletes any compiled form so a recompile can happen.
    fn uncompile(&self, program: EntityId) -> bool;
}

/// Dispatches softcode requests to registered language interpreters, by
/// the program's language tag.
pub struct SoftcodeRegistry {
    store: Arc<dyn WorldStore>,
    security: Arc<dyn SecurityService>,
    interpreters: RwLock<HashMap<String, Arc<dyn Interpreter>>>,
}

impl SoftcodeRegistry {
    pub fn new(store: Arc<dyn WorldStore>, security: Arc<dyn SecurityService>) -> Self {
        Self {
            store,
            security,
            interpreters: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a language interpreter. Fails when the language is
    /// already registered.
    pub fn register_language(&self, interpreter: Arc<dyn Interpreter>) -> bool {
        let language = interpreter.language_name().to_string();
        let mut interpreters = self.interpreters.write();
        if interpreters.contains_key(&language) {
            error!(%language, "language already registered");
            return false;
        }
        debug!(%language, "language registered");
        interpreters.insert(language, interpreter);
        true
    }

    /// Unregisters a language interpreter.
    pub fn unregister_language(&self, language: &str) {
        if self.interpreters.write().remove(language).is_none() {
            error!(%language, "cannot unregister unknown language");
        }
    }

    pub fn is_language_registered(&self, language: &str) -> bool {
        self.interpreters.read().contains_key(language)
    }

    pub fn registered_languages(&self) -> Vec<String> {
        self.interpreters.read().keys().cloned().collect()
    }

    /// Looks up the interpreter for a program's language tag.
    fn interpreter_for(&self, program: EntityId) -> Option<Arc<dyn Interpreter>> {
        let Some(language) = self.store.program_language(program) else {
            error!(%program, "program has no language tag");
            return None;
        };
        let interpreter = self.interpreters.read().get(&language).cloned();
        if interpreter.is_none() {
            error!(%program, %language, "no interpreter registered for language");
        }
        interpreter
    }
}

impl SoftcodeService for SoftcodeRegistry {
    fn make_process(
        &self,
        mut context: SecurityContext,
        command: &str,
        arguments: &str,
        output: Arc<TextChannel>,
        input: Option<Arc<TextChannel>>,
    ) -> Option<Pid> {
        let Some(program) = context.program() else {
            error!("make_process: context carries no program");
            return None;
        };
        let interpreter = self.interpreter_for(program)?;

        // The interpreter runs with current permissions.
        self.security.populate_context_capabilities(&mut context);

        interpreter.make_process(context, command, arguments, output, input)
    }

    fn compile(&self, program: EntityId, output: Arc<TextChannel>) -> bool {
        match self.interpreter_for(program) {
            Some(interpreter) => interpreter.compile(program, output),
            None => false,
        }
    }

    fn uncompile(&self, program: EntityId) -> bool {
        match self.interpreter_for(program) {
            Some(interpreter) => interpreter.uncompile(program),
            None => false,
        }
    }
}

impl std::fmt::Debug for SoftcodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftcodeRegistry")
            .field("languages", &self.registered_languages())
            .finish_non_exhaustive()
    }
}
