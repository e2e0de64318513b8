use crate::DomainResult;
use crate::conversation::{Conversation, ConversationKey, ConversationStatus, Message};

use super::BoxFuture;

/// Durable store for 1:1 conversations and their embedded message logs.
///
/// `append_message` and `mark_read` must apply the message mutation and the
/// unread-counter mutation as one atomic write; a crash must never leave a
/// message persisted with stale counters.
pub trait ConversationRepository: Send + Sync {
    /// Insert a new conversation. Fails with `Conflict` when a conversation
    /// already exists for the same (participant-pair, item) key, which the
    /// registry resolves by re-reading.
    fn create(&self, conversation: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>>;

    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>>;

    fn get_by_key(&self, key: &ConversationKey)
    -> BoxFuture<'_, DomainResult<Option<Conversation>>>;

    /// Active conversations for a participant, newest activity first.
    fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Conversation>>>;

    /// Append a message, refresh the `last_message` denormalization and bump
    /// the unread counter of every participant except the sender, all in one
    /// write. Returns the updated conversation.
    fn append_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> BoxFuture<'_, DomainResult<Conversation>>;

    /// Flag every message not authored by `user_id` as read and zero that
    /// user's unread counter, in one write.
    fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Conversation>>;

    /// Compare-and-set status transition. Fails with `Conflict` when the
    /// stored status no longer matches `expected`.
    fn update_status(
        &self,
        conversation_id: &str,
        expected: ConversationStatus,
        next: ConversationStatus,
    ) -> BoxFuture<'_, DomainResult<Conversation>>;
}
