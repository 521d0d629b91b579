//! The agent subsystem: per-session and per-puppet processes.
//!
//! User agents parse input and dispatch actions; puppet agents multiplex
//! secondary characters onto the same session under a per-player manager;
//! the connection lifecycle manager spawns and reaps user agents as
//! sessions come and go. All of them are ordinary processes under the
//! executor.

pub mod core;
pub mod document;
pub mod lifecycle;
pub mod manager;
pub mod messages;
pub mod names;
pub mod puppet;
pub mod user;

pub use core::{AgentCore, AgentDisposition, CapabilitySource};
pub use document::DocumentWriter;
pub use lifecycle::ConnectionLifecycleManager;
pub use manager::PuppetManager;
pub use messages::{PuppetCommand, PuppetError, PuppetPing, PuppetStatus};
pub use names::EntityNameManager;
pub use puppet::PuppetAgent;
pub use user::UserAgent;
