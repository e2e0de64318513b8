use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::DomainResult;
use crate::conversation::{ConversationService, Message};
use crate::discussion::{ItemDiscussionMessage, ItemDiscussionService};
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::realtime::MessageFanout;
use crate::rooms::{RoomEvent, RoomId};

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a 1:1 send names its conversation: an existing id, or the
/// (counterpart, item) pair resolved through the registry on first contact.
#[derive(Clone, Debug)]
pub enum SendTarget {
    Conversation {
        conversation_id: String,
    },
    Participant {
        other_user_id: String,
        item_id: Option<String>,
    },
}

/// Ack returned to the sender so its optimistic placeholder can be replaced
/// by the server-stamped message.
#[derive(Clone, Debug, Serialize)]
pub struct DeliveryReceipt {
    pub conversation_id: String,
    pub message: Message,
    pub delivered_to: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ItemDeliveryReceipt {
    pub message: ItemDiscussionMessage,
    pub delivered_to: usize,
}

/// Ingestion pipeline: validate, persist (bounded, serialized per
/// conversation), fan out, acknowledge. A validation failure performs no side
/// effect; a persist failure broadcasts nothing; a fan-out reaching zero live
/// connections leaves the persisted message to be picked up by the next
/// history fetch.
#[derive(Clone)]
pub struct MessagePipeline {
    conversations: ConversationService,
    discussions: ItemDiscussionService,
    fanout: Arc<dyn MessageFanout>,
    append_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    store_timeout: Duration,
}

impl MessagePipeline {
    pub fn new(
        conversations: ConversationService,
        discussions: ItemDiscussionService,
        fanout: Arc<dyn MessageFanout>,
    ) -> Self {
        Self {
            conversations,
            discussions,
            fanout,
            append_locks: Arc::new(Mutex::new(HashMap::new())),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub async fn send_to_conversation(
        &self,
        actor: &ActorIdentity,
        target: SendTarget,
        content: &str,
    ) -> DomainResult<DeliveryReceipt> {
        let conversation_id = match target {
            SendTarget::Conversation { conversation_id } => conversation_id,
            SendTarget::Participant {
                other_user_id,
                item_id,
            } => {
                self.bounded(self.conversations.find_or_create(actor, &other_user_id, item_id))
                    .await?
                    .conversation
                    .conversation_id
            }
        };

        // Appends to one conversation are serialized so concurrent sends from
        // both participants cannot interleave the last-message denormalization
        // out of timestamp order.
        let lock = self.append_lock(&conversation_id).await;
        let guard = lock.lock().await;
        let append = self
            .bounded(
                self.conversations
                    .append_message(actor, &conversation_id, content),
            )
            .await;
        drop(guard);
        let (conversation, message) = append?;

        let event = RoomEvent::ConversationMessage {
            conversation_id: conversation.conversation_id.clone(),
            message: message.clone(),
        };
        let delivered_to = self.broadcast(event);

        Ok(DeliveryReceipt {
            conversation_id: conversation.conversation_id,
            message,
            delivered_to,
        })
    }

    pub async fn send_to_item(
        &self,
        actor: &ActorIdentity,
        item_id: &str,
        content: &str,
    ) -> DomainResult<ItemDeliveryReceipt> {
        let message = self
            .bounded(self.discussions.post(actor, item_id, content))
            .await?;

        let event = RoomEvent::ItemMessage {
            message: message.clone(),
        };
        let delivered_to = self.broadcast(event);

        Ok(ItemDeliveryReceipt {
            message,
            delivered_to,
        })
    }

    fn broadcast(&self, event: RoomEvent) -> usize {
        let room = event.room();
        let delivered_to = self.fanout.broadcast(&room, event);
        if delivered_to == 0 {
            // Accepted gap: the message is durable, only the live push is
            // lost. Recipients catch up on their next history fetch.
            tracing::debug!(
                room_kind = room.kind(),
                room_id = room.id(),
                "no live subscribers for message broadcast"
            );
        }
        delivered_to
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = DomainResult<T>>,
    ) -> DomainResult<T> {
        match timeout(self.store_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Unavailable(
                "message store did not answer in time".into(),
            )),
        }
    }

    async fn append_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.append_locks.lock().await;
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Conversation, ConversationKey, ConversationStatus};
    use crate::ports::BoxFuture;
    use crate::ports::conversation::ConversationRepository;
    use crate::ports::discussion::DiscussionRepository;
    use crate::ports::items::{ItemDirectory, ItemServiceError, ItemSummary};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct RecordingFanout {
        events: StdMutex<Vec<(RoomId, RoomEvent)>>,
        recipients: StdMutex<usize>,
    }

    impl RecordingFanout {
        fn with_recipients(recipients: usize) -> Self {
            Self {
                events: StdMutex::new(Vec::new()),
                recipients: StdMutex::new(recipients),
            }
        }

        fn events(&self) -> Vec<(RoomId, RoomEvent)> {
            self.events.lock().expect("fanout events lock").clone()
        }
    }

    impl MessageFanout for RecordingFanout {
        fn broadcast(&self, room: &RoomId, event: RoomEvent) -> usize {
            self.events
                .lock()
                .expect("fanout events lock")
                .push((room.clone(), event));
            *self.recipients.lock().expect("fanout recipients lock")
        }
    }

    #[derive(Default)]
    struct MemoryConversationRepo {
        by_id: Arc<RwLock<HashMap<String, Conversation>>>,
        by_key: Arc<RwLock<HashMap<ConversationKey, String>>>,
    }

    impl ConversationRepository for MemoryConversationRepo {
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
                by_id
                    .write()
                    .await
                    .insert(conversation.conversation_id.clone(), conversation.clone());
                Ok(conversation)
            })
        }

        fn get(
            &self,
            conversation_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
            let conversation_id = conversation_id.to_string();
            let by_id = self.by_id.clone();
            Box::pin(async move { Ok(by_id.read().await.get(&conversation_id).cloned()) })
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
                Ok(by_id.read().await.get(conversation_id).cloned())
            })
        }

        fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
            let user_id = user_id.to_string();
            let by_id = self.by_id.clone();
            Box::pin(async move {
                let by_id = by_id.read().await;
                Ok(by_id
                    .values()
                    .filter(|conversation| conversation.participants.contains(&user_id))
                    .cloned()
                    .collect())
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

    /// Repository whose append either fails outright or stalls past any
    /// reasonable store timeout.
    struct BrokenConversationRepo {
        inner: MemoryConversationRepo,
        stall: bool,
    }

    impl ConversationRepository for BrokenConversationRepo {
        fn create(
            &self,
            conversation: &Conversation,
        ) -> BoxFuture<'_, DomainResult<Conversation>> {
            self.inner.create(conversation)
        }

        fn get(
            &self,
            conversation_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
            self.inner.get(conversation_id)
        }

        fn get_by_key(
            &self,
            key: &ConversationKey,
        ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
            self.inner.get_by_key(key)
        }

        fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
            self.inner.list_for_user(user_id)
        }

        fn append_message(
            &self,
            _conversation_id: &str,
            _message: &Message,
        ) -> BoxFuture<'_, DomainResult<Conversation>> {
            let stall = self.stall;
            Box::pin(async move {
                if stall {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Err(DomainError::Unavailable("append failed".into()))
            })
        }

        fn mark_read(
            &self,
            conversation_id: &str,
            user_id: &str,
        ) -> BoxFuture<'_, DomainResult<Conversation>> {
            self.inner.mark_read(conversation_id, user_id)
        }

        fn update_status(
            &self,
            conversation_id: &str,
            expected: ConversationStatus,
            next: ConversationStatus,
        ) -> BoxFuture<'_, DomainResult<Conversation>> {
            self.inner.update_status(conversation_id, expected, next)
        }
    }

    #[derive(Default)]
    struct MemoryDiscussionRepo {
        logs: Arc<RwLock<HashMap<String, Vec<ItemDiscussionMessage>>>>,
    }

    impl DiscussionRepository for MemoryDiscussionRepo {
        fn append(
            &self,
            message: &ItemDiscussionMessage,
        ) -> BoxFuture<'_, DomainResult<ItemDiscussionMessage>> {
            let message = message.clone();
            let logs = self.logs.clone();
            Box::pin(async move {
                logs.write()
                    .await
                    .entry(message.item_id.clone())
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
            Box::pin(async move { Ok(logs.read().await.get(&item_id).cloned().unwrap_or_default()) })
        }

        fn delete_by_item(&self, item_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
            let item_id = item_id.to_string();
            let logs = self.logs.clone();
            Box::pin(async move {
                let removed = logs
                    .write()
                    .await
                    .remove(&item_id)
                    .map(|log| log.len())
                    .unwrap_or(0);
                Ok(removed as u64)
            })
        }
    }

    #[derive(Default)]
    struct NullItemDirectory;

    impl ItemDirectory for NullItemDirectory {
        fn get_item(
            &self,
            _item_id: &str,
        ) -> BoxFuture<'_, Result<Option<ItemSummary>, ItemServiceError>> {
            Box::pin(async move { Ok(None) })
        }

        fn resolve_item(&self, _item_id: &str) -> BoxFuture<'_, Result<(), ItemServiceError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    fn pipeline_with(
        repo: Arc<dyn ConversationRepository>,
        fanout: Arc<RecordingFanout>,
    ) -> MessagePipeline {
        let conversations = ConversationService::new(repo, Arc::new(NullItemDirectory));
        let discussions = ItemDiscussionService::new(Arc::new(MemoryDiscussionRepo::default()));
        MessagePipeline::new(conversations, discussions, fanout)
    }

    fn actor(user_id: &str) -> ActorIdentity {
        ActorIdentity::with_user_id(user_id)
    }

    #[tokio::test]
    async fn send_broadcasts_the_persisted_message() {
        let fanout = Arc::new(RecordingFanout::with_recipients(2));
        let pipeline = pipeline_with(Arc::new(MemoryConversationRepo::default()), fanout.clone());

        let receipt = pipeline
            .send_to_conversation(
                &actor("alice"),
                SendTarget::Participant {
                    other_user_id: "bob".to_string(),
                    item_id: None,
                },
                "is this yours?",
            )
            .await
            .expect("send");

        assert_eq!(receipt.delivered_to, 2);
        let events = fanout.events();
        assert_eq!(events.len(), 1);
        let (room, event) = &events[0];
        assert_eq!(*room, RoomId::Conversation(receipt.conversation_id.clone()));
        match event {
            RoomEvent::ConversationMessage { message, .. } => {
                assert_eq!(message.message_id, receipt.message.message_id);
                assert_eq!(message.content, "is this yours?");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_persist_broadcasts_nothing() {
        let fanout = Arc::new(RecordingFanout::with_recipients(2));
        let repo = BrokenConversationRepo {
            inner: MemoryConversationRepo::default(),
            stall: false,
        };
        let pipeline = pipeline_with(Arc::new(repo), fanout.clone());

        let err = pipeline
            .send_to_conversation(
                &actor("alice"),
                SendTarget::Participant {
                    other_user_id: "bob".to_string(),
                    item_id: None,
                },
                "hello",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unavailable(_)));
        assert!(fanout.events().is_empty());
    }

    #[tokio::test]
    async fn stalled_persist_times_out_with_a_retryable_error() {
        let fanout = Arc::new(RecordingFanout::with_recipients(0));
        let repo = BrokenConversationRepo {
            inner: MemoryConversationRepo::default(),
            stall: true,
        };
        let pipeline = pipeline_with(Arc::new(repo), fanout.clone())
            .with_store_timeout(Duration::from_millis(20));

        let err = pipeline
            .send_to_conversation(
                &actor("alice"),
                SendTarget::Participant {
                    other_user_id: "bob".to_string(),
                    item_id: None,
                },
                "hello",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unavailable(_)));
        assert!(fanout.events().is_empty());
    }

    #[tokio::test]
    async fn zero_recipients_is_not_a_send_failure() {
        let fanout = Arc::new(RecordingFanout::with_recipients(0));
        let pipeline = pipeline_with(Arc::new(MemoryConversationRepo::default()), fanout.clone());

        let receipt = pipeline
            .send_to_conversation(
                &actor("alice"),
                SendTarget::Participant {
                    other_user_id: "bob".to_string(),
                    item_id: None,
                },
                "anyone?",
            )
            .await
            .expect("send persists even with nobody connected");
        assert_eq!(receipt.delivered_to, 0);
        assert_eq!(fanout.events().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_sends_keep_per_conversation_order() {
        let fanout = Arc::new(RecordingFanout::with_recipients(0));
        let repo = Arc::new(MemoryConversationRepo::default());
        let pipeline = pipeline_with(repo.clone(), fanout);

        let conversation_id = pipeline
            .send_to_conversation(
                &actor("alice"),
                SendTarget::Participant {
                    other_user_id: "bob".to_string(),
                    item_id: None,
                },
                "opening",
            )
            .await
            .expect("open")
            .conversation_id;

        let mut handles = Vec::new();
        for round in 0..8 {
            let pipeline = pipeline.clone();
            let conversation_id = conversation_id.clone();
            let sender = if round % 2 == 0 { "alice" } else { "bob" };
            let sender = actor(sender);
            handles.push(tokio::spawn(async move {
                pipeline
                    .send_to_conversation(
                        &sender,
                        SendTarget::Conversation { conversation_id },
                        &format!("message {round}"),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("send");
        }

        let conversation = repo
            .get(&conversation_id)
            .await
            .expect("get")
            .expect("conversation");
        assert_eq!(conversation.messages.len(), 9);
        let timestamps: Vec<i64> = conversation
            .messages
            .iter()
            .map(|message| message.created_at_ms)
            .collect();
        assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(
            conversation.last_message,
            conversation.messages.last().expect("last").content
        );
    }

    #[tokio::test]
    async fn item_sends_reach_the_item_room() {
        let fanout = Arc::new(RecordingFanout::with_recipients(3));
        let pipeline = pipeline_with(Arc::new(MemoryConversationRepo::default()), fanout.clone());

        let receipt = pipeline
            .send_to_item(&actor("carol"), "item-7", "seen at the station")
            .await
            .expect("send");
        assert_eq!(receipt.delivered_to, 3);
        assert_eq!(receipt.message.sender_id, "carol");

        let events = fanout.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, RoomId::Item("item-7".to_string()));
    }
}
