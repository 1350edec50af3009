//! Local view of the rooms the client is joined to, rebuilt from sync
//! responses. Just enough to find an existing DM with a user.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::sync::{RawEvent, SyncResponse};

/// Tag marking a room as a direct chat
pub const DIRECT_TAG: &str = "m.direct";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: String,
    pub joined: BTreeSet<String>,
    pub invited: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub name: Option<String>,
    pub canonical_alias: Option<String>,
}

impl RoomSummary {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Default::default()
        }
    }

    /// A room without name or alias, displayed by its members
    pub fn is_group(&self) -> bool {
        self.name.is_none() && self.canonical_alias.is_none()
    }

    pub fn is_direct(&self) -> bool {
        self.tags.contains(DIRECT_TAG)
    }

    pub fn member_count(&self) -> usize {
        self.joined.len() + self.invited.len()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.joined.contains(user_id) || self.invited.contains(user_id)
    }

    /// Whether this room can be used to privately message `user_id`
    pub fn is_pm_with(&self, user_id: &str) -> bool {
        (self.is_direct() || self.is_group()) && self.member_count() == 2 && self.contains(user_id)
    }

    fn apply(&mut self, event: &RawEvent) {
        match event.kind.as_str() {
            "m.room.member" => {
                let (Some(user), Some(membership)) = (event.state_key.as_deref(), event.membership())
                else {
                    return;
                };
                self.joined.remove(user);
                self.invited.remove(user);
                match membership {
                    "join" => {
                        self.joined.insert(user.to_string());
                    }
                    "invite" => {
                        self.invited.insert(user.to_string());
                    }
                    _ => {}
                }
            }
            "m.room.name" => self.name = non_empty(&event.content, "name"),
            "m.room.canonical_alias" => self.canonical_alias = non_empty(&event.content, "alias"),
            "m.tag" => {
                self.tags = event
                    .content
                    .get("tags")
                    .and_then(Value::as_object)
                    .map(|tags| tags.keys().cloned().collect())
                    .unwrap_or_default();
            }
            _ => {}
        }
    }
}

fn non_empty(content: &Value, key: &str) -> Option<String> {
    content
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Rooms known to the client, ordered by room id
#[derive(Debug, Clone, Default)]
pub struct RoomCache {
    rooms: BTreeMap<String, RoomSummary>,
}

impl RoomCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a sync response into the cache
    pub fn apply_sync(&mut self, response: &SyncResponse) {
        for (room_id, room) in &response.rooms.join {
            let summary = self
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| RoomSummary::new(room_id.clone()));

            room.state
                .events
                .iter()
                .chain(room.timeline.events.iter())
                .chain(room.account_data.events.iter())
                .for_each(|event| summary.apply(event));
        }

        for room_id in response.rooms.leave.keys() {
            self.rooms.remove(room_id);
        }
    }

    pub fn insert(&mut self, summary: RoomSummary) {
        self.rooms.insert(summary.room_id.clone(), summary);
    }

    pub fn get(&self, room_id: &str) -> Option<&RoomSummary> {
        self.rooms.get(room_id)
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// First room usable to privately message `user_id`
    pub fn find_pm(&self, user_id: &str) -> Option<&RoomSummary> {
        self.rooms.values().find(|room| room.is_pm_with(user_id))
    }
}
