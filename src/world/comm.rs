//! The communication collaborator: binding channels to transport sessions.

use std::sync::Arc;

use crate::channels::{ClientDataChannel, TextChannel};
use crate::types::EntityId;

/// A channel being handed to the transport layer.
#[derive(Debug, Clone)]
pub enum SessionChannel {
    Text(Arc<TextChannel>),
    ClientData(Arc<ClientDataChannel>),
}

/// Per-session statistics the agent subsystem cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub connected: bool,
    /// Enhanced clients can take structured data channels.
    pub enhanced_client: bool,
}

/// The communication collaborator interface.
pub trait CommService: Send + Sync {
    /// Attaches a channel to the entity's transport session. `to_client`
    /// is true when the session is the receiver (output), false when the
    /// session produces into the channel (input).
    fn add_channel(&self, session: EntityId, channel: SessionChannel, to_client: bool) -> bool;

    /// Forcibly disconnects the entity's session.
    fn disconnect_session(&self, session: EntityId) -> bool;

    /// Statistics for the entity's session, if connected.
    fn session_stats(&self, session: EntityId) -> Option<SessionStats>;
}
