use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;

/// Item metadata used to label conversations about an item.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemSummary {
    pub item_id: String,
    pub name: String,
    pub kind: String,
    pub owner_id: String,
}

#[derive(Debug, Error)]
pub enum ItemServiceError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("item service unavailable: {0}")]
    Unavailable(String),
    #[error("item service rejected request: {0}")]
    Rejected(String),
}

/// The item catalog collaborator. The messaging core never mutates item
/// records directly; `resolve_item` is a best-effort notification fired when
/// a conversation about the item is resolved.
pub trait ItemDirectory: Send + Sync {
    fn get_item(
        &self,
        item_id: &str,
    ) -> BoxFuture<'_, Result<Option<ItemSummary>, ItemServiceError>>;

    fn resolve_item(&self, item_id: &str) -> BoxFuture<'_, Result<(), ItemServiceError>>;
}
