//! Redirected program output: draining a text channel into a document.
//!
//! When a command carries a `>> entity.property` redirect, the launched
//! program's output channel is attached to a [`DocumentWriter`] instead of
//! the session. The writer accumulates plain text as the program runs and
//! persists the document when the channel closes.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channels::{ChannelControlListener, ChannelReceiver, TextChannel, TextLine};
use crate::types::EntityId;
use crate::world::store::WorldStore;

/// Channel receiver that collects program output and writes it into a
/// document property on close.
pub struct DocumentWriter {
    store: Arc<dyn WorldStore>,
    target: EntityId,
    property: String,
    /// `None` once the document has been persisted.
    lines: Mutex<Option<Vec<String>>>,
}

impl DocumentWriter {
    /// Creates a writer and wires it to the channel as both receiver and
    /// control listener. Fails when the channel already has a receiver.
    pub fn attach(
        channel: &Arc<TextChannel>,
        store: Arc<dyn WorldStore>,
        target: EntityId,
        property: impl Into<String>,
    ) -> Option<Arc<Self>> {
        let writer = Arc::new(Self {
            store,
            target,
            property: property.into(),
            lines: Mutex::new(Some(Vec::new())),
        });

        if !channel.register_receiver_callback(writer.clone() as Arc<dyn ChannelReceiver<TextLine>>)
        {
            return None;
        }
        channel.register_control_listener(writer.clone() as Arc<dyn ChannelControlListener>);
        Some(writer)
    }

    pub fn target(&self) -> EntityId {
        self.target
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    fn persist(&self, channel_name: &str) {
        let Some(lines) = self.lines.lock().take() else {
            return;
        };

        debug!(
            channel = channel_name,
            target = %self.target,
            property = %self.property,
            lines = lines.len(),
            "persisting redirected output"
        );

        if let Err(err) = self
            .store
            .set_document_property(self.target, &self.property, lines)
        {
            warn!(
                target = %self.target,
                property = %self.property,
                %err,
                "failed to persist redirected output"
            );
        }
    }
}

impl ChannelReceiver<TextLine> for DocumentWriter {
    fn item_received(&self, _channel_name: &str, item: TextLine) {
        if let Some(lines) = self.lines.lock().as_mut() {
            lines.push(item.to_plain_string());
        }
    }
}

impl ChannelControlListener for DocumentWriter {
    fn flow_closed(&self, channel_name: &str) {
        self.persist(channel_name);
    }

    fn destructed(&self, channel_name: &str) {
        self.persist(channel_name);
    }
}

impl std::fmt::Debug for DocumentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWriter")
            .field("target", &self.target)
            .field("property", &self.property)
            .finish_non_exhaustive()
    }
}
