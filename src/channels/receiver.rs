//! Receiver and control-listener callbacks for channels.

use crate::channels::item::ChannelItem;

/// Callback receiver for channel items. There is at most one receiver per
/// channel, and it is either a callback or a process, never both.
pub trait ChannelReceiver<T: ChannelItem>: Send + Sync {
    fn item_received(&self, channel_name: &str, item: T);
}

/// Callback notified of channel flow-status transitions and destruction.
///
/// Listeners are invoked outside the channel's lock from a snapshot of the
/// listener list, so they may freely call back into the channel.
pub trait ChannelControlListener: Send + Sync {
    fn flow_open(&self, channel_name: &str) {
        let _ = channel_name;
    }

    fn flow_blocked(&self, channel_name: &str) {
        let _ = channel_name;
    }

    fn flow_closed(&self, channel_name: &str) {
        let _ = channel_name;
    }

    fn destructed(&self, channel_name: &str) {
        let _ = channel_name;
    }
}
