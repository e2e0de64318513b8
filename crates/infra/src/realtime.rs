use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use reclaim_domain::ports::realtime::MessageFanout;
use reclaim_domain::rooms::{RoomEvent, RoomId};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

const SHARD_COUNT: usize = 16;

type RoomMembers = HashMap<RoomId, HashMap<String, UnboundedSender<RoomEvent>>>;

struct ConnectionEntry {
    sender: UnboundedSender<RoomEvent>,
    rooms: HashSet<RoomId>,
}

/// The single owning registry for live connections and room membership.
/// Membership tables are sharded by room id so a broadcast only contends on
/// the target room's shard; the connection index is touched only on
/// register/join/leave/disconnect. Join and leave are idempotent, and a
/// dropped connection is swept out of every room it belonged to.
///
/// Lock order is always connections -> shard; never the reverse.
pub struct RoomBroadcaster {
    shards: Vec<Mutex<RoomMembers>>,
    connections: Mutex<HashMap<String, ConnectionEntry>>,
}

impl Default for RoomBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Announce a live connection. Must be called before `join`.
    pub fn register(&self, connection_id: &str, sender: UnboundedSender<RoomEvent>) {
        let mut connections = self.connections.lock().expect("connection table lock");
        connections.insert(
            connection_id.to_string(),
            ConnectionEntry {
                sender,
                rooms: HashSet::new(),
            },
        );
    }

    /// Idempotent: joining a room twice leaves membership unchanged. Returns
    /// false for an unregistered connection.
    pub fn join(&self, connection_id: &str, room: &RoomId) -> bool {
        let sender = {
            let mut connections = self.connections.lock().expect("connection table lock");
            let Some(entry) = connections.get_mut(connection_id) else {
                return false;
            };
            entry.rooms.insert(room.clone());
            entry.sender.clone()
        };

        let mut rooms = self.shard_for(room).lock().expect("room shard lock");
        rooms
            .entry(room.clone())
            .or_default()
            .insert(connection_id.to_string(), sender);
        true
    }

    /// Idempotent: leaving a room that was never joined is a no-op.
    pub fn leave(&self, connection_id: &str, room: &RoomId) {
        {
            let mut connections = self.connections.lock().expect("connection table lock");
            if let Some(entry) = connections.get_mut(connection_id) {
                entry.rooms.remove(room);
            }
        }

        let mut rooms = self.shard_for(room).lock().expect("room shard lock");
        if let Some(members) = rooms.get_mut(room) {
            members.remove(connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Abrupt-disconnect sweep: the connection is removed from every room it
    /// belonged to without requiring explicit leave events.
    pub fn disconnect(&self, connection_id: &str) {
        let entry = {
            let mut connections = self.connections.lock().expect("connection table lock");
            connections.remove(connection_id)
        };
        let Some(entry) = entry else { return };

        for room in entry.rooms {
            let mut rooms = self.shard_for(&room).lock().expect("room shard lock");
            if let Some(members) = rooms.get_mut(&room) {
                members.remove(connection_id);
                if members.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        let rooms = self.shard_for(room).lock().expect("room shard lock");
        rooms.get(room).map(HashMap::len).unwrap_or(0)
    }

    fn shard_for(&self, room: &RoomId) -> &Mutex<RoomMembers> {
        let mut hasher = DefaultHasher::new();
        room.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }
}

impl MessageFanout for RoomBroadcaster {
    fn broadcast(&self, room: &RoomId, event: RoomEvent) -> usize {
        let mut rooms = self.shard_for(room).lock().expect("room shard lock");
        let Some(members) = rooms.get_mut(room) else {
            return 0;
        };

        let mut delivered = 0;
        members.retain(|connection_id, sender| match sender.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!(%connection_id, "pruning closed connection from room");
                false
            }
        });
        if members.is_empty() {
            rooms.remove(room);
        }
        delivered
    }
}
