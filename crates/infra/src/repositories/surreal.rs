use std::collections::HashMap;
use std::sync::Arc;

use reclaim_domain::DomainResult;
use reclaim_domain::conversation::{
    Conversation, ConversationKey, ConversationStatus, Message, ParticipantPair,
};
use reclaim_domain::discussion::ItemDiscussionMessage;
use reclaim_domain::error::DomainError;
use reclaim_domain::ports::BoxFuture;
use reclaim_domain::ports::conversation::ConversationRepository;
use reclaim_domain::ports::discussion::DiscussionRepository;
use reclaim_domain::util::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::{
    Surreal,
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::db::DbConfig;

const CONVERSATION_PROJECTION: &str = "SELECT\n\
    conversation_id,\n\
    participant_low,\n\
    participant_high,\n\
    item_id,\n\
    messages,\n\
    last_message,\n\
    type::string(last_message_time) AS last_message_time,\n\
    status,\n\
    unread_counts,\n\
    type::string(created_at) AS created_at,\n\
    type::string(updated_at) AS updated_at\n\
 FROM conversation";

async fn connect_client(config: &DbConfig) -> anyhow::Result<Surreal<Client>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&config.endpoint).await?;
    db.signin(Root {
        username: &config.username,
        password: &config.password,
    })
    .await?;
    db.use_ns(&config.namespace).use_db(&config.database).await?;
    Ok(db)
}

fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let message = err.to_string().to_lowercase();
    if message.contains("already exists")
        || message.contains("duplicate")
        || message.contains("unique")
        || message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Unavailable(format!("surreal query failed: {message}"))
}

fn to_rfc3339(epoch_ms: i64) -> DomainResult<String> {
    let instant = OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
        .map_err(|err| DomainError::Validation(format!("invalid timestamp: {err}")))?;
    Ok(instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()))
}

fn parse_datetime(value: &str) -> DomainResult<i64> {
    let datetime = OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| DomainError::Validation(format!("invalid datetime: {err}")))?;
    Ok((datetime.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn parse_status(value: &str) -> DomainResult<ConversationStatus> {
    match value {
        "active" => Ok(ConversationStatus::Active),
        "resolved" => Ok(ConversationStatus::Resolved),
        "archived" => Ok(ConversationStatus::Archived),
        other => Err(DomainError::Validation(format!(
            "unknown conversation status '{other}'"
        ))),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealMessageRow {
    message_id: String,
    sender_id: String,
    content: String,
    read: bool,
    created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealConversationRow {
    conversation_id: String,
    participant_low: String,
    participant_high: String,
    #[serde(default)]
    item_id: Option<String>,
    messages: Vec<SurrealMessageRow>,
    last_message: String,
    last_message_time: String,
    status: String,
    unread_counts: HashMap<String, u32>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SurrealDiscussionRow {
    message_id: String,
    item_id: String,
    sender_id: String,
    sender_name: String,
    content: String,
    created_at: String,
}

fn message_row(message: &Message) -> DomainResult<SurrealMessageRow> {
    Ok(SurrealMessageRow {
        message_id: message.message_id.clone(),
        sender_id: message.sender_id.clone(),
        content: message.content.clone(),
        read: message.read,
        created_at: to_rfc3339(message.created_at_ms)?,
    })
}

fn map_message_row(row: SurrealMessageRow) -> DomainResult<Message> {
    Ok(Message {
        message_id: row.message_id,
        sender_id: row.sender_id,
        content: row.content,
        read: row.read,
        created_at_ms: parse_datetime(&row.created_at)?,
    })
}

fn map_conversation_row(row: SurrealConversationRow) -> DomainResult<Conversation> {
    let participants = ParticipantPair::new(row.participant_low, row.participant_high)?;
    let messages = row
        .messages
        .into_iter()
        .map(map_message_row)
        .collect::<DomainResult<Vec<_>>>()?;
    Ok(Conversation {
        conversation_id: row.conversation_id,
        participants,
        item_id: row.item_id,
        messages,
        last_message: row.last_message,
        last_message_time_ms: parse_datetime(&row.last_message_time)?,
        status: parse_status(&row.status)?,
        unread_counts: row.unread_counts,
        created_at_ms: parse_datetime(&row.created_at)?,
        updated_at_ms: parse_datetime(&row.updated_at)?,
    })
}

fn decode_conversation_rows(rows: Vec<Value>) -> DomainResult<Vec<Conversation>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<SurrealConversationRow>(row)
                .map_err(|err| DomainError::Validation(format!("invalid conversation row: {err}")))
                .and_then(map_conversation_row)
        })
        .collect()
}

fn decode_discussion_rows(rows: Vec<Value>) -> DomainResult<Vec<ItemDiscussionMessage>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<SurrealDiscussionRow>(row)
                .map_err(|err| DomainError::Validation(format!("invalid discussion row: {err}")))
                .and_then(|row| {
                    Ok(ItemDiscussionMessage {
                        message_id: row.message_id,
                        item_id: row.item_id,
                        sender_id: row.sender_id,
                        sender_name: row.sender_name,
                        content: row.content,
                        created_at_ms: parse_datetime(&row.created_at)?,
                    })
                })
        })
        .collect()
}

/// Conversations as single documents with an embedded message array; the
/// canonical participant pair plus `item_id` carries the uniqueness
/// constraint. Appends and read-marking are single-document UPDATE
/// statements, so the message mutation and the counter mutation land in one
/// write.
#[derive(Clone)]
pub struct SurrealConversationRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealConversationRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Arc::new(connect_client(db_config).await?),
        })
    }

    fn key_conditions(key: &ConversationKey) -> &'static str {
        if key.item_id.is_some() {
            "participant_low = $low AND participant_high = $high AND item_id = $item_id"
        } else {
            "participant_low = $low AND participant_high = $high AND item_id IS NONE"
        }
    }
}

impl ConversationRepository for SurrealConversationRepository {
    fn create(&self, conversation: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation = conversation.clone();
        let created_at = match to_rfc3339(conversation.created_at_ms) {
            Ok(value) => value,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let last_message_time = match to_rfc3339(conversation.last_message_time_ms) {
            Ok(value) => value,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let client = self.client.clone();
        let key = conversation.key();
        let [low, high] = conversation.participants.as_array();
        let low = low.to_string();
        let high = high.to_string();
        Box::pin(async move {
            let existing_query = format!(
                "SELECT conversation_id FROM conversation WHERE {} LIMIT 1",
                Self::key_conditions(&key)
            );
            let mut existing = client
                .query(existing_query)
                .bind(("low", low.clone()))
                .bind(("high", high.clone()))
                .bind(("item_id", key.item_id.clone()))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = existing
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            if !rows.is_empty() {
                return Err(DomainError::Conflict);
            }

            let response = client
                .query(
                    "CREATE conversation CONTENT {\n\
                        conversation_id: $conversation_id,\n\
                        participant_low: $low,\n\
                        participant_high: $high,\n\
                        item_id: $item_id,\n\
                        messages: [],\n\
                        last_message: \"\",\n\
                        last_message_time: <datetime>$last_message_time,\n\
                        status: $status,\n\
                        unread_counts: $unread_counts,\n\
                        created_at: <datetime>$created_at,\n\
                        updated_at: <datetime>$created_at\n\
                    };",
                )
                .bind(("conversation_id", conversation.conversation_id.clone()))
                .bind(("low", low))
                .bind(("high", high))
                .bind(("item_id", conversation.item_id.clone()))
                .bind(("last_message_time", last_message_time))
                .bind(("status", conversation.status.as_str()))
                .bind(("unread_counts", conversation.unread_counts.clone()))
                .bind(("created_at", created_at))
                .await
                .map_err(map_surreal_error)?;
            response.check().map_err(map_surreal_error)?;
            Ok(conversation)
        })
    }

    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let conversation_id = conversation_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "{CONVERSATION_PROJECTION} WHERE conversation_id = $conversation_id LIMIT 1"
                ))
                .bind(("conversation_id", conversation_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            Ok(decode_conversation_rows(rows)?.into_iter().next())
        })
    }

    fn get_by_key(
        &self,
        key: &ConversationKey,
    ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let conditions = Self::key_conditions(key);
        let [low, high] = key.participants.as_array();
        let low = low.to_string();
        let high = high.to_string();
        let item_id = key.item_id.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!("{CONVERSATION_PROJECTION} WHERE {conditions} LIMIT 1"))
                .bind(("low", low))
                .bind(("high", high))
                .bind(("item_id", item_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            Ok(decode_conversation_rows(rows)?.into_iter().next())
        })
    }

    fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "{CONVERSATION_PROJECTION}\n\
                     WHERE (participant_low = $user_id OR participant_high = $user_id)\n\
                       AND status = \"active\"\n\
                     ORDER BY last_message_time DESC, conversation_id DESC"
                ))
                .bind(("user_id", user_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            decode_conversation_rows(rows)
        })
    }

    fn append_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let row = match message_row(message) {
            Ok(row) => row,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let sender_id = message.sender_id.clone();
        let content = message.content.clone();
        let created_at = row.created_at.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE conversation SET\n\
                        messages += $message,\n\
                        last_message = $content,\n\
                        last_message_time = <datetime>$created_at,\n\
                        updated_at = <datetime>$created_at,\n\
                        unread_counts[participant_low] = IF participant_low = $sender_id\n\
                            THEN unread_counts[participant_low]\n\
                            ELSE unread_counts[participant_low] + 1 END,\n\
                        unread_counts[participant_high] = IF participant_high = $sender_id\n\
                            THEN unread_counts[participant_high]\n\
                            ELSE unread_counts[participant_high] + 1 END\n\
                     WHERE conversation_id = $conversation_id RETURN NONE;",
                )
                .query(format!(
                    "{CONVERSATION_PROJECTION} WHERE conversation_id = $conversation_id LIMIT 1"
                ))
                .bind(("message", row))
                .bind(("content", content))
                .bind(("created_at", created_at))
                .bind(("sender_id", sender_id))
                .bind(("conversation_id", conversation_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(1)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            decode_conversation_rows(rows)?
                .into_iter()
                .next()
                .ok_or(DomainError::NotFound)
        })
    }

    fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        let now = match to_rfc3339(now_ms()) {
            Ok(value) => value,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE conversation SET\n\
                        messages = array::map(messages, |$m| IF $m.sender_id = $user_id\n\
                            THEN $m\n\
                            ELSE object::merge($m, { read: true }) END),\n\
                        unread_counts[$user_id] = 0,\n\
                        updated_at = <datetime>$now\n\
                     WHERE conversation_id = $conversation_id RETURN NONE;",
                )
                .query(format!(
                    "{CONVERSATION_PROJECTION} WHERE conversation_id = $conversation_id LIMIT 1"
                ))
                .bind(("user_id", user_id))
                .bind(("now", now))
                .bind(("conversation_id", conversation_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(1)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            decode_conversation_rows(rows)?
                .into_iter()
                .next()
                .ok_or(DomainError::NotFound)
        })
    }

    fn update_status(
        &self,
        conversation_id: &str,
        expected: ConversationStatus,
        next: ConversationStatus,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let now = match to_rfc3339(now_ms()) {
            Ok(value) => value,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE conversation SET status = $next, updated_at = <datetime>$now\n\
                     WHERE conversation_id = $conversation_id AND status = $expected RETURN NONE;",
                )
                .query(format!(
                    "{CONVERSATION_PROJECTION} WHERE conversation_id = $conversation_id LIMIT 1"
                ))
                .bind(("next", next.as_str()))
                .bind(("expected", expected.as_str()))
                .bind(("now", now))
                .bind(("conversation_id", conversation_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(1)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            let conversation = decode_conversation_rows(rows)?
                .into_iter()
                .next()
                .ok_or(DomainError::NotFound)?;
            if conversation.status != next {
                // The guarded UPDATE matched nothing: the stored status moved
                // on under us.
                return Err(DomainError::Conflict);
            }
            Ok(conversation)
        })
    }
}

/// Flat per-item discussion rows with a time-ordered secondary index.
#[derive(Clone)]
pub struct SurrealDiscussionRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealDiscussionRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Arc::new(connect_client(db_config).await?),
        })
    }
}

impl DiscussionRepository for SurrealDiscussionRepository {
    fn append(
        &self,
        message: &ItemDiscussionMessage,
    ) -> BoxFuture<'_, DomainResult<ItemDiscussionMessage>> {
        let message = message.clone();
        let created_at = match to_rfc3339(message.created_at_ms) {
            Ok(value) => value,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query(
                    "CREATE item_message CONTENT {\n\
                        message_id: $message_id,\n\
                        item_id: $item_id,\n\
                        sender_id: $sender_id,\n\
                        sender_name: $sender_name,\n\
                        content: $content,\n\
                        created_at: <datetime>$created_at\n\
                    };",
                )
                .bind(("message_id", message.message_id.clone()))
                .bind(("item_id", message.item_id.clone()))
                .bind(("sender_id", message.sender_id.clone()))
                .bind(("sender_name", message.sender_name.clone()))
                .bind(("content", message.content.clone()))
                .bind(("created_at", created_at))
                .await
                .map_err(map_surreal_error)?;
            response.check().map_err(map_surreal_error)?;
            Ok(message)
        })
    }

    fn list_by_item(
        &self,
        item_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ItemDiscussionMessage>>> {
        let item_id = item_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT\n\
                        message_id,\n\
                        item_id,\n\
                        sender_id,\n\
                        sender_name,\n\
                        content,\n\
                        type::string(created_at) AS created_at\n\
                     FROM item_message\n\
                     WHERE item_id = $item_id\n\
                     ORDER BY created_at ASC, message_id ASC",
                )
                .bind(("item_id", item_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            decode_discussion_rows(rows)
        })
    }

    fn delete_by_item(&self, item_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let item_id = item_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("DELETE item_message WHERE item_id = $item_id RETURN BEFORE")
                .bind(("item_id", item_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            Ok(rows.len() as u64)
        })
    }
}
