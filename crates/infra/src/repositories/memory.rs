use std::collections::HashMap;
use std::sync::Arc;

use reclaim_domain::DomainResult;
use reclaim_domain::conversation::{Conversation, ConversationKey, ConversationStatus, Message};
use reclaim_domain::discussion::ItemDiscussionMessage;
use reclaim_domain::error::DomainError;
use reclaim_domain::ports::BoxFuture;
use reclaim_domain::ports::conversation::ConversationRepository;
use reclaim_domain::ports::discussion::DiscussionRepository;
use reclaim_domain::util::now_ms;
use tokio::sync::RwLock;

/// Default backend and the one the test suite runs against. Every mutation
/// of a conversation happens under one write lock, which gives the same
/// "message append and counter update are one write" guarantee the document
/// store provides.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    by_id: Arc<RwLock<HashMap<String, Conversation>>>,
    by_key: Arc<RwLock<HashMap<ConversationKey, String>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn create(&self, conversation: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation = conversation.clone();
        let by_id = self.by_id.clone();
        let by_key = self.by_key.clone();
        Box::pin(async move {
            // The key table lock is held across both inserts, so a concurrent
            // create for the same (pair, item) key observes the constraint.
            let mut by_key = by_key.write().await;
            if by_key.contains_key(&conversation.key()) {
                return Err(DomainError::Conflict);
            }
            let mut by_id = by_id.write().await;
            if by_id.contains_key(&conversation.conversation_id) {
                return Err(DomainError::Conflict);
            }
            by_key.insert(conversation.key(), conversation.conversation_id.clone());
            by_id.insert(conversation.conversation_id.clone(), conversation.clone());
            Ok(conversation)
        })
    }

    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let conversation_id = conversation_id.to_string();
        let by_id = self.by_id.clone();
        Box::pin(async move {
            let by_id = by_id.read().await;
            Ok(by_id.get(&conversation_id).cloned())
        })
    }

    fn get_by_key(
        &self,
        key: &ConversationKey,
    ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let key = key.clone();
        let by_id = self.by_id.clone();
        let by_key = self.by_key.clone();
        Box::pin(async move {
            let by_key = by_key.read().await;
            let Some(conversation_id) = by_key.get(&key) else {
                return Ok(None);
            };
            let by_id = by_id.read().await;
            Ok(by_id.get(conversation_id).cloned())
        })
    }

    fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        let user_id = user_id.to_string();
        let by_id = self.by_id.clone();
        Box::pin(async move {
            let by_id = by_id.read().await;
            let mut conversations: Vec<_> = by_id
                .values()
                .filter(|conversation| {
                    conversation.participants.contains(&user_id)
                        && conversation.status == ConversationStatus::Active
                })
                .cloned()
                .collect();
            conversations.sort_by(|a, b| {
                b.last_message_time_ms
                    .cmp(&a.last_message_time_ms)
                    .then_with(|| b.conversation_id.cmp(&a.conversation_id))
            });
            Ok(conversations)
        })
    }

    fn append_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let message = message.clone();
        let by_id = self.by_id.clone();
        Box::pin(async move {
            let mut by_id = by_id.write().await;
            let conversation = by_id
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound)?;
            conversation.last_message = message.content.clone();
            conversation.last_message_time_ms = message.created_at_ms;
            conversation.updated_at_ms = message.created_at_ms;
            for participant in conversation.participants.as_array() {
                if participant != message.sender_id {
                    *conversation
                        .unread_counts
                        .entry(participant.to_string())
                        .or_insert(0) += 1;
                }
            }
            conversation.messages.push(message);
            Ok(conversation.clone())
        })
    }

    fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        let by_id = self.by_id.clone();
        Box::pin(async move {
            let mut by_id = by_id.write().await;
            let conversation = by_id
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound)?;
            for message in &mut conversation.messages {
                if message.sender_id != user_id {
                    message.read = true;
                }
            }
            conversation.unread_counts.insert(user_id, 0);
            conversation.updated_at_ms = now_ms();
            Ok(conversation.clone())
        })
    }

    fn update_status(
        &self,
        conversation_id: &str,
        expected: ConversationStatus,
        next: ConversationStatus,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let by_id = self.by_id.clone();
        Box::pin(async move {
            let mut by_id = by_id.write().await;
            let conversation = by_id
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound)?;
            if conversation.status != expected {
                return Err(DomainError::Conflict);
            }
            conversation.status = next;
            conversation.updated_at_ms = now_ms();
            Ok(conversation.clone())
        })
    }
}

#[derive(Default)]
pub struct InMemoryDiscussionRepository {
    logs: Arc<RwLock<HashMap<String, Vec<ItemDiscussionMessage>>>>,
}

impl InMemoryDiscussionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiscussionRepository for InMemoryDiscussionRepository {
    fn append(
        &self,
        message: &ItemDiscussionMessage,
    ) -> BoxFuture<'_, DomainResult<ItemDiscussionMessage>> {
        let message = message.clone();
        let logs = self.logs.clone();
        Box::pin(async move {
            let mut logs = logs.write().await;
            logs.entry(message.item_id.clone())
                .or_default()
                .push(message.clone());
            Ok(message)
        })
    }

    fn list_by_item(
        &self,
        item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ItemDiscussionMessage>>> {
        let item_id = item_id.to_string();
        let logs = self.logs.clone();
        Box::pin(async move {
            let logs = logs.read().await;
            let mut messages = logs.get(&item_id).cloned().unwrap_or_default();
            messages.sort_by(|a, b| {
                a.created_at_ms
                    .cmp(&b.created_at_ms)
                    .then_with(|| a.message_id.cmp(&b.message_id))
            });
            Ok(messages)
        })
    }

    fn delete_by_item(&self, item_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let item_id = item_id.to_string();
        let logs = self.logs.clone();
        Box::pin(async move {
            let mut logs = logs.write().await;
            let removed = logs.remove(&item_id).map(|log| log.len()).unwrap_or(0);
            Ok(removed as u64)
        })
    }
}
