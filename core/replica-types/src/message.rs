//! Replication channel messages.
//!
//! Every store joins one channel per tenant, named after the store. Messages
//! are tagged by event name:
//!
//! ```json
//! {"event": "sync_group_packet", "payload": {"action": "APPEND", "ids": ["7"], "ref": "…"}}
//! {"event": "sync_packet", "payload": {"operation": {…}}}
//! ```

use crate::{ClientRef, GroupOperation, Operation};
use serde::{Deserialize, Serialize};

/// Event name of a field-level operation packet.
pub const SYNC_PACKET: &str = "sync_packet";

/// Event name of a structural group operation packet.
pub const SYNC_GROUP_PACKET: &str = "sync_group_packet";

/// A message delivered to a store by its channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A remote field-level operation.
    SyncPacket { operation: Operation },
    /// A remote structural operation.
    SyncGroupPacket(GroupOperation),
}

impl InboundMessage {
    /// The wire event name.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SyncPacket { .. } => SYNC_PACKET,
            Self::SyncGroupPacket(_) => SYNC_GROUP_PACKET,
        }
    }

    /// The client instance the message originated from.
    #[must_use]
    pub fn client_ref(&self) -> ClientRef {
        match self {
            Self::SyncPacket { operation } => operation.client_ref,
            Self::SyncGroupPacket(group) => group.client_ref,
        }
    }
}

/// A message a store pushes onto its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum OutboundMessage {
    SyncGroupPacket { operation: GroupOperation },
}

impl OutboundMessage {
    /// The wire event name.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SyncGroupPacket { .. } => SYNC_GROUP_PACKET,
        }
    }
}

/// How a relaying transport turns a push into what other members receive.
impl From<OutboundMessage> for InboundMessage {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::SyncGroupPacket { operation } => Self::SyncGroupPacket(operation),
        }
    }
}

/// Channel acknowledgement of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Channel version assigned to the pushed message.
    pub version: u64,
}
