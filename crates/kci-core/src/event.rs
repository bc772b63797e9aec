//! Pub/sub event envelopes for the `node` and `retry` channels.
//!
//! The central API's pub/sub fan-out carries one event per node
//! create/update; channel name and `event.data` shape match what the
//! scheduler, reconciler and job-retry listener all subscribe to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Node;

/// Channel an event was published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Node,
    Retry,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Retry => "retry",
        }
    }
}

/// A published node event: either a full `Node` (the common case) or a
/// raw JSON map (used by the retry channel, which republishes a parent
/// node's data with a handful of fields overwritten — see
/// `EventData::Patch`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Node(Node),
    Patch(Value),
}

/// Envelope published to a pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub channel: Channel,
    pub data: EventData,
}

impl Event {
    pub fn node(channel: Channel, node: Node) -> Self {
        Self {
            channel,
            data: EventData::Node(node),
        }
    }

    pub fn patch(channel: Channel, data: Value) -> Self {
        Self {
            channel,
            data: EventData::Patch(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Channel::Retry).unwrap(), "\"retry\"");
    }
}
