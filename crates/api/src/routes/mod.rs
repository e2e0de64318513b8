pub(crate) mod realtime;

use axum::extract::{Extension, Path, State};
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use reclaim_domain::conversation::{ConversationWithItem, Message};
use reclaim_domain::delivery::SendTarget;
use reclaim_domain::discussion::ItemDiscussionMessage;
use reclaim_domain::idempotency::BeginOutcome;
use reclaim_domain::identity::ActorIdentity;
use reclaim_domain::ports::idempotency::{IdempotencyKey, IdempotencyResponse};

use crate::middleware::AuthContext;
use crate::{
    error::ApiError, middleware as app_middleware, observability, state::AppState, validation,
};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/v1/conversations",
            post(create_or_get_conversation).get(list_conversations),
        )
        .route(
            "/v1/conversations/:conversation_id/messages",
            get(get_conversation_messages).post(send_conversation_message),
        )
        .route("/v1/messages", post(send_message))
        .route(
            "/v1/conversations/:conversation_id/read",
            post(mark_conversation_read),
        )
        .route(
            "/v1/conversations/:conversation_id/resolve",
            post(resolve_conversation),
        )
        .route(
            "/v1/conversations/:conversation_id/archive",
            post(archive_conversation),
        )
        .route(
            "/v1/items/:item_id/messages",
            get(list_item_messages)
                .post(send_item_message)
                .delete(purge_item_messages),
        )
        .route("/v1/realtime", get(realtime::connect))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ))
        .layer(middleware::from_fn(app_middleware::metrics_layer));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    storage: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = match state.db_adapter.as_ref() {
        Some(adapter) => match adapter.health_check().await {
            Ok(()) => "ok",
            Err(err) => {
                tracing::warn!(error = %err, adapter = adapter.name(), "storage health check failed");
                "unreachable"
            }
        },
        None => "memory",
    };
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        storage,
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => ApiError::Unavailable("metrics recorder not initialized".into()).into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct CreateConversationRequest {
    #[validate(length(min = 1, max = 128))]
    other_user_id: String,
    #[validate(length(min = 1, max = 128))]
    item_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessageRequest {
    #[validate(length(min = 1, max = 128))]
    conversation_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    other_user_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    item_id: Option<String>,
    #[validate(length(min = 1, max = 2_000))]
    content: String,
}

impl SendMessageRequest {
    fn target(&self) -> Result<SendTarget, ApiError> {
        match (&self.conversation_id, &self.other_user_id) {
            (Some(conversation_id), _) => Ok(SendTarget::Conversation {
                conversation_id: conversation_id.clone(),
            }),
            (None, Some(other_user_id)) => Ok(SendTarget::Participant {
                other_user_id: other_user_id.clone(),
                item_id: self.item_id.clone(),
            }),
            (None, None) => Err(ApiError::Validation(
                "conversation_id or other_user_id is required".into(),
            )),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct SendConversationMessageRequest {
    #[validate(length(min = 1, max = 2_000))]
    content: String,
}

#[derive(Debug, Deserialize, Validate)]
struct SendItemMessageRequest {
    #[validate(length(min = 1, max = 2_000))]
    content: String,
}

async fn create_or_get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let request_id = request_id_from_headers(&headers)?;
    let key = IdempotencyKey::new("conversation_create", actor.user_id.clone(), request_id);
    let conversations = state.conversations.clone();
    with_idempotency(&state, key, async {
        let conversation = conversations
            .find_or_create(&actor, &payload.other_user_id, payload.item_id.clone())
            .await?;
        json_response(StatusCode::OK, &conversation)
    })
    .await
}

async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ConversationWithItem>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let conversations = state.conversations.list_for_user(&actor).await?;
    Ok(Json(conversations))
}

async fn get_conversation_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let messages = state.conversations.messages(&actor, &conversation_id).await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let request_id = request_id_from_headers(&headers)?;
    let target = payload.target()?;
    let key = IdempotencyKey::new("message_send", actor.user_id.clone(), request_id);
    let pipeline = state.pipeline.clone();
    let content = payload.content.clone();
    with_idempotency(&state, key, async {
        let receipt = pipeline.send_to_conversation(&actor, target, &content).await?;
        observability::register_realtime_event("send", "conversation");
        json_response(StatusCode::CREATED, &receipt)
    })
    .await
}

async fn send_conversation_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SendConversationMessageRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let request_id = request_id_from_headers(&headers)?;
    let key = IdempotencyKey::new(
        "message_send",
        format!("{}:{conversation_id}", actor.user_id),
        request_id,
    );
    let pipeline = state.pipeline.clone();
    let content = payload.content.clone();
    with_idempotency(&state, key, async {
        let receipt = pipeline
            .send_to_conversation(&actor, SendTarget::Conversation { conversation_id }, &content)
            .await?;
        observability::register_realtime_event("send", "conversation");
        json_response(StatusCode::CREATED, &receipt)
    })
    .await
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let actor = actor_identity(&auth)?;
    let request_id = request_id_from_headers(&headers)?;
    let key = IdempotencyKey::new(
        "conversation_mark_read",
        format!("{}:{conversation_id}", actor.user_id),
        request_id,
    );
    let conversations = state.conversations.clone();
    with_idempotency(&state, key, async {
        let conversation = conversations.mark_read(&actor, &conversation_id).await?;
        json_response(StatusCode::OK, &conversation)
    })
    .await
}

async fn resolve_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let actor = actor_identity(&auth)?;
    let request_id = request_id_from_headers(&headers)?;
    let key = IdempotencyKey::new(
        "conversation_resolve",
        format!("{}:{conversation_id}", actor.user_id),
        request_id,
    );
    let conversations = state.conversations.clone();
    with_idempotency(&state, key, async {
        let conversation = conversations.resolve(&actor, &conversation_id).await?;
        json_response(StatusCode::OK, &conversation)
    })
    .await
}

async fn archive_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let actor = actor_identity(&auth)?;
    let request_id = request_id_from_headers(&headers)?;
    let key = IdempotencyKey::new(
        "conversation_archive",
        format!("{}:{conversation_id}", actor.user_id),
        request_id,
    );
    let conversations = state.conversations.clone();
    with_idempotency(&state, key, async {
        let conversation = conversations.archive(&actor, &conversation_id).await?;
        json_response(StatusCode::OK, &conversation)
    })
    .await
}

async fn list_item_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(item_id): Path<String>,
) -> Result<Json<Vec<ItemDiscussionMessage>>, ApiError> {
    actor_identity(&auth)?;
    let messages = state.discussions.list(&item_id).await?;
    Ok(Json(messages))
}

async fn send_item_message(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SendItemMessageRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let request_id = request_id_from_headers(&headers)?;
    let key = IdempotencyKey::new(
        "item_message_send",
        format!("{}:{item_id}", actor.user_id),
        request_id,
    );
    let pipeline = state.pipeline.clone();
    let content = payload.content.clone();
    with_idempotency(&state, key, async {
        let receipt = pipeline.send_to_item(&actor, &item_id, &content).await?;
        observability::register_realtime_event("send", "item");
        json_response(StatusCode::CREATED, &receipt)
    })
    .await
}

async fn purge_item_messages(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    actor_identity(&auth)?;
    if !auth.role.can_administer() {
        return Err(ApiError::Forbidden);
    }
    let deleted = state.discussions.purge_for_item(&item_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn with_idempotency<Fut>(
    state: &AppState,
    key: IdempotencyKey,
    run: Fut,
) -> Result<Response, ApiError>
where
    Fut: std::future::Future<Output = Result<IdempotencyResponse, ApiError>>,
{
    let outcome = state.idempotency.begin(&key).await.map_err(|err| {
        tracing::error!(error = %err, "idempotency begin failed");
        ApiError::Internal
    })?;

    match outcome {
        BeginOutcome::Replay(response) => Ok(to_response(response)),
        BeginOutcome::InProgress => Err(ApiError::Conflict),
        BeginOutcome::Started => {
            let response = run.await?;
            state
                .idempotency
                .complete(&key, response.clone())
                .await
                .map_err(|err| {
                    tracing::error!(error = %err, "idempotency complete failed");
                    ApiError::Internal
                })?;
            Ok(to_response(response))
        }
    }
}

fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<IdempotencyResponse, ApiError> {
    Ok(IdempotencyResponse {
        status_code: status.as_u16(),
        body: serde_json::to_value(body).map_err(|_| ApiError::Internal)?,
    })
}

fn to_response(response: IdempotencyResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK);
    (status, Json(response.body)).into_response()
}

pub(crate) fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    let user_id = auth
        .user_id
        .as_ref()
        .filter(|user_id| !user_id.trim().is_empty())
        .ok_or(ApiError::Unauthorized)?;
    let display_name = auth
        .display_name
        .as_ref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(user_id);
    Ok(ActorIdentity {
        user_id: user_id.to_string(),
        display_name: display_name.to_string(),
    })
}

fn request_id_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(std::string::ToString::to_string)
        .ok_or_else(|| ApiError::Validation("missing request id".into()))
}
