// Room store — in-memory rooms for one session
//
// Last write wins. Rooms are never deleted automatically. Any peer a room
// references counts as a contact for privacy gating.

use crate::message::{Invite, RoomType};
use crate::privacy::ContactView;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A conversation the local peer takes part in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub description: String,
    pub room_type: RoomType,
    /// Peer this room's traffic is addressed to: the remote peer for direct
    /// rooms, the host for joined groups, the local peer for hosted groups
    pub peer_id: String,
    pub host_peer_id: Option<String>,
    /// Populated only on the host; never contains the host itself
    pub participants: Vec<String>,
    pub is_admin: bool,
    pub is_connected: bool,
    pub is_private: bool,
    pub is_p2p: bool,
    pub bot_persona_ref: Option<String>,
}

impl Room {
    /// ID of the direct room with a peer
    pub fn direct_id(peer_id: &str) -> String {
        format!("direct-{}", peer_id)
    }

    /// A 1:1 room with `peer_id`
    pub fn direct(peer_id: &str, name: Option<String>, connected: bool) -> Self {
        Self {
            id: Self::direct_id(peer_id),
            name: name.unwrap_or_else(|| peer_id.to_string()),
            description: String::new(),
            room_type: RoomType::Direct,
            peer_id: peer_id.to_string(),
            host_peer_id: None,
            participants: Vec::new(),
            is_admin: false,
            is_connected: connected,
            is_private: true,
            is_p2p: true,
            bot_persona_ref: None,
        }
    }

    /// A group hosted by the local peer
    pub fn hosted(name: &str, description: &str, room_type: RoomType, local_peer_id: &str) -> Self {
        Self {
            id: format!("group-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            description: description.to_string(),
            room_type,
            peer_id: local_peer_id.to_string(),
            host_peer_id: Some(local_peer_id.to_string()),
            participants: Vec::new(),
            is_admin: true,
            is_connected: true,
            is_private: true,
            is_p2p: true,
            bot_persona_ref: None,
        }
    }

    /// A room joined through an invite. Not connected until we reach the host.
    pub fn from_invite(invite: &Invite) -> Self {
        Self {
            id: invite.room_id.clone(),
            name: invite.name.clone(),
            description: invite.description.clone(),
            room_type: invite.room_type,
            peer_id: invite.host_peer_id.clone(),
            host_peer_id: Some(invite.host_peer_id.clone()),
            participants: Vec::new(),
            is_admin: false,
            is_connected: false,
            is_private: true,
            is_p2p: true,
            bot_persona_ref: invite.bot_persona_ref.clone(),
        }
    }

    /// Build the invite a host sends for this room
    pub fn invite(&self) -> Invite {
        Invite {
            room_id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            room_type: self.room_type,
            host_peer_id: self.host_peer_id.clone().unwrap_or_else(|| self.peer_id.clone()),
            bot_persona_ref: self.bot_persona_ref.clone(),
        }
    }

    /// Whether this room mentions `peer_id` anywhere
    pub fn references(&self, peer_id: &str) -> bool {
        self.peer_id == peer_id
            || self.host_peer_id.as_deref() == Some(peer_id)
            || self.participants.iter().any(|p| p == peer_id)
    }
}

#[derive(Default)]
struct RoomTable {
    rooms: HashMap<String, Room>,
    /// Creation order
    order: Vec<String>,
}

/// Shared, cloneable handle to the session's rooms
#[derive(Clone, Default)]
pub struct RoomStore {
    inner: Arc<RwLock<RoomTable>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a room unless one with the same ID exists. Returns true if inserted.
    pub fn create(&self, room: Room) -> bool {
        let mut table = self.inner.write();
        if table.rooms.contains_key(&room.id) {
            return false;
        }
        debug!("Room created: {} ({})", room.id, room.room_type);
        table.order.push(room.id.clone());
        table.rooms.insert(room.id.clone(), room);
        true
    }

    pub fn get(&self, room_id: &str) -> Option<Room> {
        self.inner.read().rooms.get(room_id).cloned()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.inner.read().rooms.contains_key(room_id)
    }

    /// All rooms in creation order
    pub fn list(&self) -> Vec<Room> {
        let table = self.inner.read();
        table
            .order
            .iter()
            .filter_map(|id| table.rooms.get(id).cloned())
            .collect()
    }

    /// Set `is_connected` on every room addressed to `peer_id`.
    ///
    /// Returns the IDs of rooms whose status changed.
    pub fn update_connection_state(&self, peer_id: &str, connected: bool) -> Vec<String> {
        let mut table = self.inner.write();
        let RoomTable { rooms, order } = &mut *table;
        order
            .iter()
            .filter_map(|id| {
                let room = rooms.get_mut(id)?;
                if room.peer_id == peer_id && !room.is_admin && room.is_connected != connected {
                    room.is_connected = connected;
                    Some(room.id.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Add a participant to a hosted room. Returns true if the set changed.
    pub fn append_participant(&self, room_id: &str, peer_id: &str) -> bool {
        let mut table = self.inner.write();
        let Some(room) = table.rooms.get_mut(room_id) else {
            return false;
        };
        if room.host_peer_id.as_deref() == Some(peer_id)
            || room.participants.iter().any(|p| p == peer_id)
        {
            return false;
        }
        room.participants.push(peer_id.to_string());
        true
    }

    /// Point hosted rooms at a new local peer ID after re-registration
    pub fn rehost(&self, old_peer_id: &str, new_peer_id: &str) {
        let mut table = self.inner.write();
        for room in table.rooms.values_mut().filter(|room| room.is_admin) {
            if room.peer_id == old_peer_id {
                room.peer_id = new_peer_id.to_string();
            }
            if room.host_peer_id.as_deref() == Some(old_peer_id) {
                room.host_peer_id = Some(new_peer_id.to_string());
            }
        }
    }
}

impl ContactView for RoomStore {
    fn is_contact(&self, peer_id: &str) -> bool {
        self.inner
            .read()
            .rooms
            .values()
            .any(|room| room.references(peer_id))
    }
}
