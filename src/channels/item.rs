//! Channel payload types.
//!
//! Two payloads exist: formatted text lines (the classic session stream)
//! and structured client data for enhanced clients. The [`ChannelItem`]
//! trait ties a payload to its wire message so the channel machinery stays
//! generic.

use serde::{Deserialize, Serialize};

use crate::executor::message::ProcessMessage;

/// Which kind of data a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    ClientData,
}

/// Colors a text segment can render in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextColor {
    #[default]
    Default,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
}

/// One styled fragment of a text line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    pub color: TextColor,
    pub bold: bool,
}

impl TextSegment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: TextColor::Default,
            bold: false,
        }
    }

    pub fn colored(text: impl Into<String>, color: TextColor) -> Self {
        Self {
            text: text.into(),
            color,
            bold: false,
        }
    }
}

/// A formatted line of mixed plain and styled fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TextLine(Vec<TextSegment>);

impl TextLine {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A single-segment line in the default color.
    pub fn plain(text: impl Into<String>) -> Self {
        Self(vec![TextSegment::plain(text)])
    }

    /// A single-segment colored line; red is the error convention.
    pub fn colored(text: impl Into<String>, color: TextColor) -> Self {
        Self(vec![TextSegment::colored(text, color)])
    }

    pub fn push(&mut self, segment: TextSegment) {
        self.0.push(segment);
    }

    /// Inserts a segment at the front; used for message markers.
    pub fn prepend(&mut self, segment: TextSegment) {
        self.0.insert(0, segment);
    }

    pub fn segments(&self) -> &[TextSegment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|seg| seg.text.is_empty())
    }

    /// Concatenates every segment, discarding styling.
    pub fn to_plain_string(&self) -> String {
        self.0.iter().map(|seg| seg.text.as_str()).collect()
    }
}

/// A structured data item for enhanced clients: a message kind plus an
/// arbitrary JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub kind: String,
    pub body: serde_json::Value,
}

impl ClientMessage {
    pub fn new(kind: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            body,
        }
    }
}

/// A payload a channel can carry.
pub trait ChannelItem: Send + Sized + 'static {
    /// The kind tag of channels carrying this payload.
    const KIND: ChannelKind;

    /// Wraps the payload in its process message, stamped with the channel
    /// name.
    fn into_message(self, channel_name: &str) -> ProcessMessage;
}

impl ChannelItem for TextLine {
    const KIND: ChannelKind = ChannelKind::Text;

    fn into_message(self, channel_name: &str) -> ProcessMessage {
        ProcessMessage::TextChannel {
            channel: channel_name.to_string(),
            line: self,
        }
    }
}

impl ChannelItem for ClientMessage {
    const KIND: ChannelKind = ChannelKind::ClientData;

    fn into_message(self, channel_name: &str) -> ProcessMessage {
        ProcessMessage::ClientDataChannel {
            channel: channel_name.to_string(),
            data: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_line_plain_rendering() {
        let mut line = TextLine::plain("hello ");
        line.push(TextSegment::colored("world", TextColor::Red));
        assert_eq!(line.to_plain_string(), "hello world");
        assert!(!line.is_empty());
    }

    #[test]
    fn test_prepend_marker() {
        let mut line = TextLine::plain("psst");
        line.prepend(TextSegment::colored("(private) ", TextColor::Magenta));
        assert_eq!(line.to_plain_string(), "(private) psst");
    }

    #[test]
    fn test_into_message_carries_channel_name() {
        let line = TextLine::plain("x");
        match line.into_message("out") {
            ProcessMessage::TextChannel { channel, .. } => assert_eq!(channel, "out"),
            other => panic!("wrong message category: {:?}", other.category()),
        }
    }
}
