use crate::DomainResult;
use crate::discussion::ItemDiscussionMessage;

use super::BoxFuture;

/// Flat append-only log of per-item discussion messages.
pub trait DiscussionRepository: Send + Sync {
    fn append(
        &self,
        message: &ItemDiscussionMessage,
    ) -> BoxFuture<'_, DomainResult<ItemDiscussionMessage>>;

    /// Messages for one item, oldest first.
    fn list_by_item(
        &self,
        item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ItemDiscussionMessage>>>;

    /// Bulk delete of an item's log; returns the number of removed messages.
    fn delete_by_item(&self, item_id: &str) -> BoxFuture<'_, DomainResult<u64>>;
}
