use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::conversation::validate_content;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::discussion::DiscussionRepository;
use crate::util::{new_id, now_ms};

/// One entry of the N-participant per-item discussion log. No conversation
/// wrapper, no unread tracking, no lifecycle: any authenticated user may post
/// and the sender name is denormalized at write time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemDiscussionMessage {
    pub message_id: String,
    pub item_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Clone)]
pub struct ItemDiscussionService {
    repository: Arc<dyn DiscussionRepository>,
}

impl ItemDiscussionService {
    pub fn new(repository: Arc<dyn DiscussionRepository>) -> Self {
        Self { repository }
    }

    pub async fn post(
        &self,
        actor: &ActorIdentity,
        item_id: &str,
        content: &str,
    ) -> DomainResult<ItemDiscussionMessage> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(DomainError::Validation("item_id is required".into()));
        }
        let content = validate_content(content)?;
        let message = ItemDiscussionMessage {
            message_id: new_id(),
            item_id: item_id.to_string(),
            sender_id: actor.user_id.clone(),
            sender_name: actor.display_name.clone(),
            content,
            created_at_ms: now_ms(),
        };
        self.repository.append(&message).await
    }

    /// Discussion log oldest first.
    pub async fn list(&self, item_id: &str) -> DomainResult<Vec<ItemDiscussionMessage>> {
        self.repository.list_by_item(item_id.trim()).await
    }

    /// Administrative bulk delete, run as a side effect of item deletion.
    pub async fn purge_for_item(&self, item_id: &str) -> DomainResult<u64> {
        self.repository.delete_by_item(item_id.trim()).await
    }
}
