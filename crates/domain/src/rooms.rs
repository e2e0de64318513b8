use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::discussion::ItemDiscussionMessage;

/// Realtime fan-out unit. Both delivery models share the same broadcaster;
/// the room kind decides which persistence path fed the event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RoomId {
    Conversation(String),
    Item(String),
}

impl RoomId {
    pub fn kind(&self) -> &'static str {
        match self {
            RoomId::Conversation(_) => "conversation",
            RoomId::Item(_) => "item",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RoomId::Conversation(id) | RoomId::Item(id) => id,
        }
    }
}

/// Event pushed to every member of a room after the message it carries has
/// been persisted. Broadcast never precedes a successful persist.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    ConversationMessage {
        conversation_id: String,
        message: Message,
    },
    ItemMessage { message: ItemDiscussionMessage },
}

impl RoomEvent {
    pub fn room(&self) -> RoomId {
        match self {
            RoomEvent::ConversationMessage {
                conversation_id, ..
            } => RoomId::Conversation(conversation_id.clone()),
            RoomEvent::ItemMessage { message } => RoomId::Item(message.item_id.clone()),
        }
    }
}
