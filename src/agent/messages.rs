//! Interprocess messages exchanged inside the agent subsystem.
//!
//! These ride in `ProcessMessage::Interprocess`, discriminated by subtype
//! string, with a serde payload. Helpers here keep the wire names in one
//! place.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::executor::message::ProcessMessage;
use crate::types::{EntityId, Pid};

/// A command the user agent wants a puppet to run.
pub const PUPPET_COMMAND_SUBTYPE: &str = "puppet.command";
/// A contentless activation poke for a dormant puppet agent.
pub const PUPPET_PING_SUBTYPE: &str = "puppet.ping";
/// A status report from a puppet agent to its manager.
pub const PUPPET_STATUS_SUBTYPE: &str = "puppet.status";
/// An error report from the manager back to the commanding agent.
pub const PUPPET_ERROR_SUBTYPE: &str = "puppet.error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuppetCommand {
    pub puppet: EntityId,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuppetPing {
    pub puppet: EntityId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuppetStatus {
    pub puppet: EntityId,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuppetError {
    pub puppet: Option<EntityId>,
    pub error: String,
}

fn wrap<T: Serialize>(subtype: &str, source: Option<Pid>, body: &T) -> ProcessMessage {
    ProcessMessage::Interprocess {
        subtype: subtype.to_string(),
        source,
        payload: serde_json::to_value(body).unwrap_or(serde_json::Value::Null),
    }
}

impl PuppetCommand {
    pub fn into_message(self, source: Option<Pid>) -> ProcessMessage {
        wrap(PUPPET_COMMAND_SUBTYPE, source, &self)
    }
}

impl PuppetPing {
    pub fn into_message(self, source: Option<Pid>) -> ProcessMessage {
        wrap(PUPPET_PING_SUBTYPE, source, &self)
    }
}

impl PuppetStatus {
    pub fn into_message(self, source: Option<Pid>) -> ProcessMessage {
        wrap(PUPPET_STATUS_SUBTYPE, source, &self)
    }
}

impl PuppetError {
    pub fn into_message(self, source: Option<Pid>) -> ProcessMessage {
        wrap(PUPPET_ERROR_SUBTYPE, source, &self)
    }
}

/// Decodes an interprocess payload; `None` on shape mismatch.
pub fn decode_payload<T: DeserializeOwned>(payload: &serde_json::Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_puppet_command_round_trip() {
        let command = PuppetCommand {
            puppet: EntityId::new(1, 50),
            command: "look".to_string(),
        };
        let message = command.clone().into_message(Some(Pid::new(9)));

        match message {
            ProcessMessage::Interprocess {
                subtype,
                source,
                payload,
            } => {
                assert_eq!(subtype, PUPPET_COMMAND_SUBTYPE);
                assert_eq!(source, Some(Pid::new(9)));
                assert_eq!(decode_payload::<PuppetCommand>(&payload), Some(command));
            }
            other => panic!("wrong category: {:?}", other.category()),
        }
    }

    #[test]
    fn test_decode_mismatch_is_none() {
        let ping = PuppetPing {
            puppet: EntityId::new(1, 2),
        };
        let message = ping.into_message(None);
        let ProcessMessage::Interprocess { payload, .. } = message else {
            unreachable!()
        };
        assert!(decode_payload::<PuppetStatus>(&payload).is_none());
    }
}
