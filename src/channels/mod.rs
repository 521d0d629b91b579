//! Typed, flow-controlled channels between processes and the outside
//! world.
//!
//! Channels are the primary runtime resource: external transports place
//! items into input channels registered as blocking resources of an agent,
//! and launched programs write their output into channels attached to the
//! session or to a document sink. Flow control and lifecycle are shared by
//! every channel type; the payload is the only difference.

pub mod channel;
pub mod item;
pub mod receiver;

pub use channel::{Channel, ClientDataChannel, HolderToken, TextChannel};
pub use item::{ChannelItem, ChannelKind, ClientMessage, TextColor, TextLine, TextSegment};
pub use receiver::{ChannelControlListener, ChannelReceiver};
