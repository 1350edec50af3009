//! Wire types of the client-server endpoints used by [`ExtendedClient`]
//!
//! Only the fields the bot reads are modelled, everything else is ignored.
//!
//! [`ExtendedClient`]: super::ExtendedClient

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted client state, the bits the homeserver cannot give back to us
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientState {
    /// Sync cursor to resume from
    pub next_batch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NonceResponse {
    pub nonce: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub access_token: String,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub errcode: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoomIdResponse {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventIdResponse {
    pub event_id: String,
}

/// One page of `GET /rooms/{roomId}/hierarchy`
#[derive(Debug, Deserialize)]
pub(crate) struct HierarchyPage {
    #[serde(default)]
    pub rooms: Vec<HierarchyRoom>,
    pub next_batch: Option<String>,
}

/// A room (or space) as described by the hierarchy endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyRoom {
    pub room_id: String,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub canonical_alias: Option<String>,
    /// `m.space` for spaces, absent for plain rooms
    pub room_type: Option<String>,
    pub join_rule: Option<String>,
    #[serde(default)]
    pub num_joined_members: u64,
    #[serde(default)]
    pub world_readable: bool,
    #[serde(default)]
    pub guest_can_join: bool,
    /// Stripped `m.space.child` events
    #[serde(default)]
    pub children_state: Vec<Value>,
}

impl HierarchyRoom {
    pub fn is_space(&self) -> bool {
        self.room_type.as_deref() == Some("m.space")
    }
}

/// Response of `GET /sync`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: HashMap<String, InvitedRoom>,
    #[serde(default)]
    pub leave: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: EventList,
    #[serde(default)]
    pub account_data: EventList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: EventList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

/// Loosely typed room event
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: Option<String>,
    pub state_key: Option<String>,
    pub event_id: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub unsigned: Value,
}

impl RawEvent {
    /// `content.membership` of an `m.room.member` event
    pub fn membership(&self) -> Option<&str> {
        if self.kind != "m.room.member" {
            return None;
        }
        self.content.get("membership").and_then(Value::as_str)
    }

    /// Membership before this event, if the homeserver told us
    pub fn prev_membership(&self) -> Option<&str> {
        if self.kind != "m.room.member" {
            return None;
        }
        self.unsigned
            .get("prev_content")
            .and_then(|prev| prev.get("membership"))
            .and_then(Value::as_str)
    }
}
