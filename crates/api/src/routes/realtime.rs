use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::interval;
use uuid::Uuid;

use reclaim_domain::delivery::SendTarget;
use reclaim_domain::error::DomainError;
use reclaim_domain::identity::ActorIdentity;
use reclaim_domain::rooms::{RoomEvent, RoomId};

use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::observability;
use crate::routes::actor_identity;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame {
    Join { room: RoomRef },
    Leave { room: RoomRef },
    Send { room: RoomRef, content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomRef {
    kind: RoomKind,
    id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RoomKind {
    Conversation,
    Item,
}

impl RoomRef {
    fn room_id(&self) -> RoomId {
        match self.kind {
            RoomKind::Conversation => RoomId::Conversation(self.id.clone()),
            RoomKind::Item => RoomId::Item(self.id.clone()),
        }
    }

    fn from_room_id(room: &RoomId) -> Self {
        match room {
            RoomId::Conversation(id) => Self {
                kind: RoomKind::Conversation,
                id: id.clone(),
            },
            RoomId::Item(id) => Self {
                kind: RoomKind::Item,
                id: id.clone(),
            },
        }
    }

    fn kind_str(&self) -> &'static str {
        match self.kind {
            RoomKind::Conversation => "conversation",
            RoomKind::Item => "item",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ServerFrame {
    Joined {
        room: RoomRef,
    },
    Left {
        room: RoomRef,
    },
    /// Authoritative copy pushed to every room member after persistence.
    MessageCreated {
        room: RoomRef,
        payload: RoomEvent,
    },
    /// Direct ack to the sender carrying the server-stamped message, so the
    /// client can reconcile its optimistic placeholder even when it has not
    /// joined the room it sent to.
    Ack {
        room: RoomRef,
        payload: serde_json::Value,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

pub async fn connect(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let actor = actor_identity(&auth)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

async fn handle_socket(socket: WebSocket, state: AppState, actor: ActorIdentity) {
    let connection_id = Uuid::now_v7().simple().to_string();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<RoomEvent>();
    state.broadcaster.register(&connection_id, events_tx);
    tracing::debug!(%connection_id, user_id = %actor.user_id, "realtime connection opened");

    let (mut sink, mut incoming) = socket.split();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                let frame = ServerFrame::MessageCreated {
                    room: RoomRef::from_room_id(&event.room()),
                    payload: event,
                };
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
            frame = incoming.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if handle_frame(&state, &actor, &connection_id, &text, &mut sink)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Abrupt or orderly, every exit sweeps the connection from its rooms.
    state.broadcaster.disconnect(&connection_id);
    tracing::debug!(%connection_id, user_id = %actor.user_id, "realtime connection closed");
}

async fn handle_frame(
    state: &AppState,
    actor: &ActorIdentity,
    connection_id: &str,
    text: &str,
    sink: &mut SplitSink<WebSocket, WsMessage>,
) -> Result<(), axum::Error> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            return send_frame(
                sink,
                &ServerFrame::Error {
                    code: "bad_frame",
                    message: err.to_string(),
                },
            )
            .await;
        }
    };

    match frame {
        ClientFrame::Join { room } => {
            if let Err(err) = authorize_join(state, actor, &room).await {
                return send_frame(sink, &domain_error_frame(err)).await;
            }
            state.broadcaster.join(connection_id, &room.room_id());
            observability::register_realtime_event("join", room.kind_str());
            send_frame(sink, &ServerFrame::Joined { room }).await
        }
        ClientFrame::Leave { room } => {
            state.broadcaster.leave(connection_id, &room.room_id());
            observability::register_realtime_event("leave", room.kind_str());
            send_frame(sink, &ServerFrame::Left { room }).await
        }
        ClientFrame::Send { room, content } => {
            let payload = match room.kind {
                RoomKind::Conversation => state
                    .pipeline
                    .send_to_conversation(
                        actor,
                        SendTarget::Conversation {
                            conversation_id: room.id.clone(),
                        },
                        &content,
                    )
                    .await
                    .map(|receipt| {
                        serde_json::to_value(&receipt).unwrap_or(serde_json::Value::Null)
                    }),
                RoomKind::Item => state
                    .pipeline
                    .send_to_item(actor, &room.id, &content)
                    .await
                    .map(|receipt| {
                        serde_json::to_value(&receipt).unwrap_or(serde_json::Value::Null)
                    }),
            };
            match payload {
                Ok(payload) => {
                    observability::register_realtime_event("send", room.kind_str());
                    send_frame(sink, &ServerFrame::Ack { room, payload }).await
                }
                Err(err) => send_frame(sink, &domain_error_frame(err)).await,
            }
        }
    }
}

/// Conversation rooms admit participants only; item-discussion rooms admit
/// any authenticated user.
async fn authorize_join(
    state: &AppState,
    actor: &ActorIdentity,
    room: &RoomRef,
) -> Result<(), DomainError> {
    match room.kind {
        RoomKind::Conversation => state.conversations.assert_participant(actor, &room.id).await,
        RoomKind::Item => Ok(()),
    }
}

fn domain_error_frame(err: DomainError) -> ServerFrame {
    let code = match &err {
        DomainError::Validation(_) => "validation_error",
        DomainError::NotFound => "not_found",
        DomainError::Conflict => "conflict",
        DomainError::Unavailable(_) => "retry_later",
    };
    ServerFrame::Error {
        code,
        message: err.to_string(),
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(frame)
        .unwrap_or_else(|_| "{\"event\":\"error\",\"code\":\"serialization_failed\"}".to_string());
    sink.send(WsMessage::Text(payload)).await
}
