use crate::rooms::{RoomEvent, RoomId};

/// Fan-out half of the room broadcaster: deliver an event to every current
/// member of a room, the sender included. In-memory and non-blocking; returns
/// the number of live connections the event was handed to. Zero recipients is
/// not an error — offline participants catch up on their next history fetch.
pub trait MessageFanout: Send + Sync {
    fn broadcast(&self, room: &RoomId, event: RoomEvent) -> usize;
}
