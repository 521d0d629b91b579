//! Messages delivered to processes through the scheduler.
//!
//! One owned enum replaces the original's downcast-based class hierarchy:
//! every payload a process can receive is a variant here, and senders give
//! up ownership on a successful enqueue.

use serde::{Deserialize, Serialize};

use crate::channels::item::{ClientMessage, TextLine};
use crate::events::{Event, SubscriptionId};
use crate::types::Pid;

/// Flow status of a channel, broadcast to every peer on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Channel is ready to accept new items.
    Open,
    /// Channel is unable to accept new items for now.
    Blocked,
    /// Channel is permanently closed and will never accept new items.
    Closed,
    /// Channel has lost its last endpoint and is gone.
    Destructed,
}

/// Broad message category, for dispatch and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    TextChannel,
    ClientDataChannel,
    ChannelFlow,
    Event,
    SubscriptionDeleted,
    Interprocess,
    Generic,
    Other,
}

/// A message queued for a process.
///
/// Channel-originated messages carry the channel *name* rather than a
/// handle, because a message can arrive after the channel is gone; the
/// recipient correlates by RID and/or name.
#[derive(Debug, Clone)]
pub enum ProcessMessage {
    /// A formatted text line sent over a text channel.
    TextChannel { channel: String, line: TextLine },

    /// A structured client data item sent over a client data channel.
    ClientDataChannel {
        channel: String,
        data: ClientMessage,
    },

    /// A channel flow-status transition.
    ChannelFlow {
        channel: String,
        status: FlowStatus,
    },

    /// An event matched against one of the process's subscriptions.
    Event {
        subscription: SubscriptionId,
        event: Event,
    },

    /// One or more of the process's subscriptions were deleted bus-side
    /// (usually because a referenced entity was deleted).
    SubscriptionDeleted {
        subscriptions: Vec<SubscriptionId>,
    },

    /// Process-to-process message, discriminated by subtype string.
    Interprocess {
        subtype: String,
        source: Option<Pid>,
        payload: serde_json::Value,
    },

    /// Contentless poke; mostly useful for tests and self-wakeups.
    Generic,
}

impl ProcessMessage {
    /// The category of this message.
    pub fn category(&self) -> MessageCategory {
        match self {
            ProcessMessage::TextChannel { .. } => MessageCategory::TextChannel,
            ProcessMessage::ClientDataChannel { .. } => MessageCategory::ClientDataChannel,
            ProcessMessage::ChannelFlow { .. } => MessageCategory::ChannelFlow,
            ProcessMessage::Event { .. } => MessageCategory::Event,
            ProcessMessage::SubscriptionDeleted { .. } => MessageCategory::SubscriptionDeleted,
            ProcessMessage::Interprocess { .. } => MessageCategory::Interprocess,
            ProcessMessage::Generic => MessageCategory::Generic,
        }
    }

    /// The channel name, for channel-originated messages.
    pub fn channel_name(&self) -> Option<&str> {
        match self {
            ProcessMessage::TextChannel { channel, .. }
            | ProcessMessage::ClientDataChannel { channel, .. }
            | ProcessMessage::ChannelFlow { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        let msg = ProcessMessage::ChannelFlow {
            channel: "out".to_string(),
            status: FlowStatus::Open,
        };
        assert_eq!(msg.category(), MessageCategory::ChannelFlow);
        assert_eq!(msg.channel_name(), Some("out"));

        assert_eq!(ProcessMessage::Generic.category(), MessageCategory::Generic);
        assert_eq!(ProcessMessage::Generic.channel_name(), None);
    }
}
