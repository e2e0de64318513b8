use std::sync::Arc;
use std::time::Duration;

use reclaim_domain::idempotency::{
    BeginOutcome, IdempotencyConfig, IdempotencyService, InMemoryIdempotencyStore,
};
use reclaim_domain::ports::idempotency::{IdempotencyKey, IdempotencyResponse};
use serde_json::json;

fn service(in_progress_ttl: Duration) -> IdempotencyService {
    IdempotencyService::new(
        Arc::new(InMemoryIdempotencyStore::new("test")),
        IdempotencyConfig {
            in_progress_ttl,
            completed_ttl: Duration::from_secs(60),
        },
    )
}

#[tokio::test]
async fn replay_returns_prior_response() {
    let service = service(Duration::from_secs(60));

    let key = IdempotencyKey::new("message_send", "alice:conv-1", "req-1");
    let outcome = service.begin(&key).await.unwrap();
    assert_eq!(outcome, BeginOutcome::Started);

    let response = IdempotencyResponse {
        status_code: 201,
        body: json!({ "message_id": "m-1" }),
    };
    service.complete(&key, response.clone()).await.unwrap();

    let replay = service.begin(&key).await.unwrap();
    assert_eq!(replay, BeginOutcome::Replay(response));
}

#[tokio::test]
async fn in_progress_conflict_is_visible() {
    let service = service(Duration::from_secs(60));

    let key = IdempotencyKey::new("message_send", "alice:conv-2", "req-2");
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::InProgress);
}

#[tokio::test]
async fn in_progress_expiry_allows_new_start() {
    let service = service(Duration::from_millis(10));

    let key = IdempotencyKey::new("message_send", "alice:conv-3", "req-3");
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);
}

#[tokio::test]
async fn keys_are_scoped_per_operation_and_entity() {
    let service = service(Duration::from_secs(60));

    let send = IdempotencyKey::new("message_send", "alice:conv-4", "req-4");
    let resolve = IdempotencyKey::new("conversation_resolve", "alice:conv-4", "req-4");
    assert_eq!(service.begin(&send).await.unwrap(), BeginOutcome::Started);
    assert_eq!(service.begin(&resolve).await.unwrap(), BeginOutcome::Started);
}
