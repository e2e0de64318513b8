use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::conversation::ConversationRepository;
use crate::ports::items::{ItemDirectory, ItemSummary};
use crate::util::{new_id, now_ms};

pub const MAX_CONTENT_LENGTH: usize = 2_000;

/// Unordered pair of participant ids, stored canonically so that lookups are
/// insensitive to which side initiated the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[String; 2]", into = "[String; 2]")]
pub struct ParticipantPair {
    low: String,
    high: String,
}

impl ParticipantPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> DomainResult<Self> {
        let a = a.into().trim().to_string();
        let b = b.into().trim().to_string();
        if a.is_empty() || b.is_empty() {
            return Err(DomainError::Validation(
                "both participant ids are required".into(),
            ));
        }
        if a == b {
            return Err(DomainError::Validation(
                "a conversation needs two distinct participants".into(),
            ));
        }
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The counterpart of `user_id`, if they belong to the pair.
    pub fn other(&self, user_id: &str) -> Option<&str> {
        if self.low == user_id {
            Some(&self.high)
        } else if self.high == user_id {
            Some(&self.low)
        } else {
            None
        }
    }

    pub fn as_array(&self) -> [&str; 2] {
        [&self.low, &self.high]
    }
}

impl TryFrom<[String; 2]> for ParticipantPair {
    type Error = DomainError;

    fn try_from([a, b]: [String; 2]) -> Result<Self, Self::Error> {
        Self::new(a, b)
    }
}

impl From<ParticipantPair> for [String; 2] {
    fn from(pair: ParticipantPair) -> Self {
        [pair.low, pair.high]
    }
}

/// Uniqueness key of a conversation: at most one conversation exists per
/// (participant-pair, item) combination; `item_id = None` is the global
/// conversation between the two users.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub participants: ParticipantPair,
    pub item_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Resolved,
    Archived,
}

impl ConversationStatus {
    /// `active -> resolved`, `active -> archived`, `resolved -> archived`.
    /// `archived` is terminal.
    pub fn can_transition(self, next: ConversationStatus) -> bool {
        use ConversationStatus::{Active, Archived, Resolved};
        matches!(
            (self, next),
            (Active, Resolved) | (Active, Archived) | (Resolved, Archived)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Resolved => "resolved",
            ConversationStatus::Archived => "archived",
        }
    }
}

/// Immutable once written; only the `read` flag is ever flipped, and only by
/// the receiving counterpart marking the conversation read.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub content: String,
    pub read: bool,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub conversation_id: String,
    pub participants: ParticipantPair,
    pub item_id: Option<String>,
    pub messages: Vec<Message>,
    pub last_message: String,
    pub last_message_time_ms: i64,
    pub status: ConversationStatus,
    pub unread_counts: HashMap<String, u32>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Conversation {
    pub fn key(&self) -> ConversationKey {
        ConversationKey {
            participants: self.participants.clone(),
            item_id: self.item_id.clone(),
        }
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread_counts.get(user_id).copied().unwrap_or(0)
    }
}

/// Conversation enriched with item metadata from the item collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationWithItem {
    pub conversation: Conversation,
    pub item: Option<ItemSummary>,
}

#[derive(Clone)]
pub struct ConversationService {
    repository: Arc<dyn ConversationRepository>,
    items: Arc<dyn ItemDirectory>,
}

impl ConversationService {
    pub fn new(repository: Arc<dyn ConversationRepository>, items: Arc<dyn ItemDirectory>) -> Self {
        Self { repository, items }
    }

    /// Atomic find-or-create for the (participant-pair, item) key. Under
    /// concurrent calls exactly one conversation is created; the loser of the
    /// race re-reads the winner's record instead of surfacing the conflict.
    pub async fn find_or_create(
        &self,
        actor: &ActorIdentity,
        other_user_id: &str,
        item_id: Option<String>,
    ) -> DomainResult<ConversationWithItem> {
        let participants = ParticipantPair::new(actor.user_id.clone(), other_user_id)?;
        let item_id = normalize_item_id(item_id);
        let key = ConversationKey {
            participants: participants.clone(),
            item_id: item_id.clone(),
        };

        if let Some(existing) = self.repository.get_by_key(&key).await? {
            return Ok(self.with_item_label(existing).await);
        }

        let now = now_ms();
        let mut unread_counts = HashMap::new();
        for participant in participants.as_array() {
            unread_counts.insert(participant.to_string(), 0);
        }
        let conversation = Conversation {
            conversation_id: new_id(),
            participants,
            item_id,
            messages: Vec::new(),
            last_message: String::new(),
            last_message_time_ms: now,
            status: ConversationStatus::Active,
            unread_counts,
            created_at_ms: now,
            updated_at_ms: now,
        };

        match self.repository.create(&conversation).await {
            Ok(created) => Ok(self.with_item_label(created).await),
            Err(DomainError::Conflict) => {
                let existing = self
                    .repository
                    .get_by_key(&conversation.key())
                    .await?
                    .ok_or(DomainError::Conflict)?;
                Ok(self.with_item_label(existing).await)
            }
            Err(err) => Err(err),
        }
    }

    /// Active conversations for the actor, most recent activity first.
    pub async fn list_for_user(
        &self,
        actor: &ActorIdentity,
    ) -> DomainResult<Vec<ConversationWithItem>> {
        let conversations = self.repository.list_for_user(&actor.user_id).await?;
        let mut labelled = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            labelled.push(self.with_item_label(conversation).await);
        }
        Ok(labelled)
    }

    pub async fn messages(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
    ) -> DomainResult<Vec<Message>> {
        let conversation = self.get_for_participant(actor, conversation_id).await?;
        Ok(conversation.messages)
    }

    /// Append a message with a server-assigned id and timestamp. The
    /// repository applies the append, the `last_message` refresh and the
    /// counterpart's unread increment as one write.
    pub async fn append_message(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
        content: &str,
    ) -> DomainResult<(Conversation, Message)> {
        let conversation = self.get_for_participant(actor, conversation_id).await?;
        if conversation.status == ConversationStatus::Archived {
            return Err(DomainError::Validation(
                "conversation is archived and no longer accepts messages".into(),
            ));
        }
        let content = validate_content(content)?;
        let message = Message {
            message_id: new_id(),
            sender_id: actor.user_id.clone(),
            content,
            read: false,
            created_at_ms: now_ms(),
        };
        let updated = self
            .repository
            .append_message(conversation_id, &message)
            .await?;
        Ok((updated, message))
    }

    pub async fn mark_read(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
    ) -> DomainResult<Conversation> {
        self.get_for_participant(actor, conversation_id).await?;
        self.repository
            .mark_read(conversation_id, &actor.user_id)
            .await
    }

    /// Resolve the conversation and best-effort notify the item collaborator
    /// when an item is linked. A failed item update is logged and never rolls
    /// back the conversation's own transition.
    pub async fn resolve(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
    ) -> DomainResult<Conversation> {
        let conversation = self.get_for_participant(actor, conversation_id).await?;
        let updated = self
            .transition(&conversation, ConversationStatus::Resolved)
            .await?;
        if let Some(item_id) = updated.item_id.as_deref() {
            match self.items.resolve_item(item_id).await {
                Ok(()) => {
                    tracing::info!(conversation_id, item_id, "linked item marked resolved");
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        conversation_id,
                        item_id,
                        "failed to mark linked item resolved"
                    );
                }
            }
        }
        Ok(updated)
    }

    pub async fn archive(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
    ) -> DomainResult<Conversation> {
        let conversation = self.get_for_participant(actor, conversation_id).await?;
        self.transition(&conversation, ConversationStatus::Archived)
            .await
    }

    pub async fn assert_participant(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
    ) -> DomainResult<()> {
        self.get_for_participant(actor, conversation_id).await?;
        Ok(())
    }

    async fn get_for_participant(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
    ) -> DomainResult<Conversation> {
        let conversation = self
            .repository
            .get(conversation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !conversation.participants.contains(&actor.user_id) {
            return Err(DomainError::Validation(
                "user is not a participant of this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    async fn transition(
        &self,
        conversation: &Conversation,
        next: ConversationStatus,
    ) -> DomainResult<Conversation> {
        if !conversation.status.can_transition(next) {
            return Err(invalid_transition(conversation.status, next));
        }
        match self
            .repository
            .update_status(&conversation.conversation_id, conversation.status, next)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(DomainError::Conflict) => {
                // Lost a transition race; report against the current state.
                let current = self
                    .repository
                    .get(&conversation.conversation_id)
                    .await?
                    .ok_or(DomainError::NotFound)?;
                Err(invalid_transition(current.status, next))
            }
            Err(err) => Err(err),
        }
    }

    async fn with_item_label(&self, conversation: Conversation) -> ConversationWithItem {
        let item = match conversation.item_id.as_deref() {
            Some(item_id) => match self.items.get_item(item_id).await {
                Ok(found) => found,
                Err(err) => {
                    tracing::debug!(error = %err, item_id, "item lookup for conversation label failed");
                    None
                }
            },
            None => None,
        };
        ConversationWithItem { conversation, item }
    }
}

fn invalid_transition(current: ConversationStatus, next: ConversationStatus) -> DomainError {
    DomainError::Validation(format!(
        "cannot move a {} conversation to {}",
        current.as_str(),
        next.as_str()
    ))
}

fn normalize_item_id(item_id: Option<String>) -> Option<String> {
    item_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn validate_content(content: &str) -> DomainResult<String> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(DomainError::Validation("content is required".into()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(DomainError::Validation(format!(
            "content exceeds max length of {MAX_CONTENT_LENGTH}"
        )));
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::BoxFuture;
    use crate::ports::items::ItemServiceError;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub(crate) struct MockConversationRepo {
        by_id: Arc<RwLock<HashMap<String, Conversation>>>,
        by_key: Arc<RwLock<HashMap<ConversationKey, String>>>,
    }

    impl ConversationRepository for MockConversationRepo {
        fn create(
            &self,
            conversation: &Conversation,
        ) -> BoxFuture<'_, DomainResult<Conversation>> {
            let conversation = conversation.clone();
            let by_id = self.by_id.clone();
            let by_key = self.by_key.clone();
            Box::pin(async move {
                let mut by_key = by_key.write().await;
                if by_key.contains_key(&conversation.key()) {
                    return Err(DomainError::Conflict);
                }
                by_key.insert(conversation.key(), conversation.conversation_id.clone());
                let mut by_id = by_id.write().await;
                by_id.insert(conversation.conversation_id.clone(), conversation.clone());
                Ok(conversation)
            })
        }

        fn get(
            &self,
            conversation_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
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
                conversations.sort_by(|a, b| b.last_message_time_ms.cmp(&a.last_message_time_ms));
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
                Ok(conversation.clone())
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct MockItemDirectory {
        items: Arc<RwLock<HashMap<String, ItemSummary>>>,
        resolve_calls: Arc<RwLock<Vec<String>>>,
    }

    impl MockItemDirectory {
        pub(crate) async fn seed(&self, item: ItemSummary) {
            self.items.write().await.insert(item.item_id.clone(), item);
        }

        pub(crate) async fn resolve_calls(&self) -> Vec<String> {
            self.resolve_calls.read().await.clone()
        }
    }

    impl ItemDirectory for MockItemDirectory {
        fn get_item(
            &self,
            item_id: &str,
        ) -> BoxFuture<'_, Result<Option<ItemSummary>, ItemServiceError>> {
            let item_id = item_id.to_string();
            let items = self.items.clone();
            Box::pin(async move {
                let items = items.read().await;
                Ok(items.get(&item_id).cloned())
            })
        }

        fn resolve_item(&self, item_id: &str) -> BoxFuture<'_, Result<(), ItemServiceError>> {
            let item_id = item_id.to_string();
            let calls = self.resolve_calls.clone();
            Box::pin(async move {
                calls.write().await.push(item_id);
                Ok(())
            })
        }
    }

    fn service() -> (ConversationService, Arc<MockItemDirectory>) {
        let items = Arc::new(MockItemDirectory::default());
        let service = ConversationService::new(Arc::new(MockConversationRepo::default()), items.clone());
        (service, items)
    }

    fn actor(user_id: &str) -> ActorIdentity {
        ActorIdentity {
            user_id: user_id.to_string(),
            display_name: format!("{user_id}-name"),
        }
    }

    fn bike() -> ItemSummary {
        ItemSummary {
            item_id: "item-1".to_string(),
            name: "Blue bike".to_string(),
            kind: "found".to_string(),
            owner_id: "bob".to_string(),
        }
    }

    #[tokio::test]
    async fn find_or_create_is_order_insensitive() {
        let (service, _) = service();
        let first = service
            .find_or_create(&actor("alice"), "bob", None)
            .await
            .expect("first");
        let second = service
            .find_or_create(&actor("bob"), "alice", None)
            .await
            .expect("second");
        assert_eq!(
            first.conversation.conversation_id,
            second.conversation.conversation_id
        );
    }

    #[tokio::test]
    async fn find_or_create_under_concurrency_yields_one_conversation() {
        let (service, _) = service();
        let alice = actor("alice");
        let bob = actor("bob");
        let (left, right) = tokio::join!(
            service.find_or_create(&alice, "bob", Some("item-1".to_string())),
            service.find_or_create(&bob, "alice", Some("item-1".to_string())),
        );
        let left = left.expect("left");
        let right = right.expect("right");
        assert_eq!(
            left.conversation.conversation_id,
            right.conversation.conversation_id
        );
    }

    #[tokio::test]
    async fn find_or_create_distinguishes_item_scopes() {
        let (service, _) = service();
        let global = service
            .find_or_create(&actor("alice"), "bob", None)
            .await
            .expect("global");
        let scoped = service
            .find_or_create(&actor("alice"), "bob", Some("item-1".to_string()))
            .await
            .expect("scoped");
        assert_ne!(
            global.conversation.conversation_id,
            scoped.conversation.conversation_id
        );
        assert_eq!(scoped.conversation.item_id.as_deref(), Some("item-1"));
    }

    #[tokio::test]
    async fn find_or_create_labels_conversation_with_item_metadata() {
        let (service, items) = service();
        items.seed(bike()).await;
        let created = service
            .find_or_create(&actor("alice"), "bob", Some("item-1".to_string()))
            .await
            .expect("created");
        assert_eq!(created.item.map(|item| item.name).as_deref(), Some("Blue bike"));
    }

    #[tokio::test]
    async fn find_or_create_rejects_self_conversation() {
        let (service, _) = service();
        let err = service
            .find_or_create(&actor("alice"), "alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn append_updates_counters_order_and_denormalization() {
        let (service, _) = service();
        let alice = actor("alice");
        let conversation_id = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("conversation")
            .conversation
            .conversation_id;

        for body in ["is this yours?", "it has a bell", "blue frame"] {
            service
                .append_message(&alice, &conversation_id, body)
                .await
                .expect("append");
        }

        let conversation = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("reload")
            .conversation;
        assert_eq!(conversation.messages.len(), 3);
        assert_eq!(conversation.last_message, "blue frame");
        assert_eq!(conversation.unread_for("bob"), 3);
        assert_eq!(conversation.unread_for("alice"), 0);
        let timestamps: Vec<i64> = conversation
            .messages
            .iter()
            .map(|message| message.created_at_ms)
            .collect();
        assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(
            conversation.last_message_time_ms,
            *timestamps.last().expect("timestamp")
        );
    }

    #[tokio::test]
    async fn mark_read_zeroes_counter_and_flags_counterpart_messages() {
        let (service, _) = service();
        let alice = actor("alice");
        let bob = actor("bob");
        let conversation_id = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("conversation")
            .conversation
            .conversation_id;
        service
            .append_message(&alice, &conversation_id, "hello")
            .await
            .expect("alice sends");
        service
            .append_message(&bob, &conversation_id, "hi back")
            .await
            .expect("bob sends");

        let updated = service
            .mark_read(&bob, &conversation_id)
            .await
            .expect("mark read");
        assert_eq!(updated.unread_for("bob"), 0);
        assert_eq!(updated.unread_for("alice"), 1);
        for message in &updated.messages {
            if message.sender_id == "alice" {
                assert!(message.read, "counterpart message should be flagged read");
            } else {
                assert!(!message.read, "own message must keep its flag");
            }
        }
    }

    #[tokio::test]
    async fn resolve_fires_item_notification_exactly_once() {
        let (service, items) = service();
        items.seed(bike()).await;
        let alice = actor("alice");
        let conversation_id = service
            .find_or_create(&alice, "bob", Some("item-1".to_string()))
            .await
            .expect("conversation")
            .conversation
            .conversation_id;

        let resolved = service
            .resolve(&alice, &conversation_id)
            .await
            .expect("resolve");
        assert_eq!(resolved.status, ConversationStatus::Resolved);
        assert_eq!(items.resolve_calls().await, vec!["item-1".to_string()]);
    }

    #[tokio::test]
    async fn resolve_without_item_ref_fires_no_notification() {
        let (service, items) = service();
        let alice = actor("alice");
        let conversation_id = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("conversation")
            .conversation
            .conversation_id;
        service
            .resolve(&alice, &conversation_id)
            .await
            .expect("resolve");
        assert!(items.resolve_calls().await.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_rejects_invalid_transitions() {
        let (service, _) = service();
        let alice = actor("alice");
        let conversation_id = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("conversation")
            .conversation
            .conversation_id;

        service
            .resolve(&alice, &conversation_id)
            .await
            .expect("first resolve");
        let err = service.resolve(&alice, &conversation_id).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        service
            .archive(&alice, &conversation_id)
            .await
            .expect("archive resolved");
        let err = service.archive(&alice, &conversation_id).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        let err = service.resolve(&alice, &conversation_id).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn active_conversation_archives_directly() {
        let (service, _) = service();
        let alice = actor("alice");
        let conversation_id = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("conversation")
            .conversation
            .conversation_id;
        let archived = service
            .archive(&alice, &conversation_id)
            .await
            .expect("archive");
        assert_eq!(archived.status, ConversationStatus::Archived);
    }

    #[tokio::test]
    async fn archived_conversation_rejects_sends() {
        let (service, _) = service();
        let alice = actor("alice");
        let conversation_id = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("conversation")
            .conversation
            .conversation_id;
        service
            .archive(&alice, &conversation_id)
            .await
            .expect("archive");
        let err = service
            .append_message(&alice, &conversation_id, "anyone there?")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn list_for_user_returns_active_only_most_recent_first() {
        let (service, _) = service();
        let alice = actor("alice");
        let older = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("older")
            .conversation
            .conversation_id;
        let newer = service
            .find_or_create(&alice, "carol", None)
            .await
            .expect("newer")
            .conversation
            .conversation_id;
        let archived = service
            .find_or_create(&alice, "dave", None)
            .await
            .expect("archived")
            .conversation
            .conversation_id;

        service
            .append_message(&alice, &older, "first")
            .await
            .expect("older message");
        service
            .append_message(&alice, &newer, "second")
            .await
            .expect("newer message");
        service
            .archive(&alice, &archived)
            .await
            .expect("archive third");

        let listed = service.list_for_user(&alice).await.expect("list");
        let ids: Vec<&str> = listed
            .iter()
            .map(|entry| entry.conversation.conversation_id.as_str())
            .collect();
        assert_eq!(ids, vec![newer.as_str(), older.as_str()]);
    }

    #[tokio::test]
    async fn outsiders_cannot_read_a_conversation() {
        let (service, _) = service();
        let alice = actor("alice");
        let conversation_id = service
            .find_or_create(&alice, "bob", None)
            .await
            .expect("conversation")
            .conversation
            .conversation_id;
        let err = service
            .messages(&actor("mallory"), &conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn content_validation_bounds() {
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_LENGTH + 1)).is_err());
        assert_eq!(validate_content("  hello  ").expect("trimmed"), "hello");
    }

    #[test]
    fn participant_pair_canonicalizes() {
        let forward = ParticipantPair::new("bob", "alice").expect("pair");
        let backward = ParticipantPair::new("alice", "bob").expect("pair");
        assert_eq!(forward, backward);
        assert_eq!(forward.other("alice"), Some("bob"));
        assert_eq!(forward.other("mallory"), None);
    }
}
