use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::ports::idempotency::{
    IdempotencyError, IdempotencyKey, IdempotencyRecord, IdempotencyResponse, IdempotencyState,
    IdempotencyStore, PutOutcome,
};

#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    pub in_progress_ttl: Duration,
    pub completed_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            in_progress_ttl: Duration::from_secs(60),
            completed_ttl: Duration::from_secs(60 * 60 * 24),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BeginOutcome {
    Started,
    InProgress,
    Replay(IdempotencyResponse),
}

/// Replay protection for mutating requests: the first call for a key claims
/// it, completes it with the response to replay, and every retry with the
/// same request id gets that stored response back.
#[derive(Clone)]
pub struct IdempotencyService {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyService {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub async fn begin(&self, key: &IdempotencyKey) -> Result<BeginOutcome, IdempotencyError> {
        let claim = IdempotencyRecord::in_progress();
        match self
            .store
            .put_if_absent(key, &claim, self.config.in_progress_ttl)
            .await?
        {
            PutOutcome::Stored => Ok(BeginOutcome::Started),
            PutOutcome::Existing(existing) => match existing.state {
                IdempotencyState::InProgress => Ok(BeginOutcome::InProgress),
                IdempotencyState::Completed => {
                    let response = existing.response.ok_or_else(|| {
                        IdempotencyError::Store("completed record missing response".into())
                    })?;
                    Ok(BeginOutcome::Replay(response))
                }
            },
        }
    }

    pub async fn complete(
        &self,
        key: &IdempotencyKey,
        response: IdempotencyResponse,
    ) -> Result<(), IdempotencyError> {
        self.store
            .update(
                key,
                &IdempotencyRecord::completed(response),
                self.config.completed_ttl,
            )
            .await
    }
}

#[derive(Clone, Debug)]
pub struct InMemoryIdempotencyStore {
    prefix: String,
    entries: Arc<Mutex<HashMap<String, StoredEntry>>>,
}

#[derive(Clone, Debug)]
struct StoredEntry {
    record: IdempotencyRecord,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(record: IdempotencyRecord, ttl: Duration) -> Self {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        Self { record, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl InMemoryIdempotencyStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cache_key(&self, key: &IdempotencyKey) -> String {
        key.cache_key(&self.prefix)
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get(
        &self,
        key: &IdempotencyKey,
    ) -> crate::ports::BoxFuture<'_, Result<Option<IdempotencyRecord>, IdempotencyError>> {
        let cache_key = self.cache_key(key);
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.lock().expect("idempotency store lock");
            match entries.get(&cache_key) {
                Some(entry) if entry.is_expired() => {
                    entries.remove(&cache_key);
                    Ok(None)
                }
                Some(entry) => Ok(Some(entry.record.clone())),
                None => Ok(None),
            }
        })
    }

    fn put_if_absent(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> crate::ports::BoxFuture<'_, Result<PutOutcome, IdempotencyError>> {
        let cache_key = self.cache_key(key);
        let record = record.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.lock().expect("idempotency store lock");
            if let Some(existing) = entries.get(&cache_key) {
                if !existing.is_expired() {
                    return Ok(PutOutcome::Existing(existing.record.clone()));
                }
                entries.remove(&cache_key);
            }
            entries.insert(cache_key, StoredEntry::new(record, ttl));
            Ok(PutOutcome::Stored)
        })
    }

    fn update(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> crate::ports::BoxFuture<'_, Result<(), IdempotencyError>> {
        let cache_key = self.cache_key(key);
        let record = record.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut entries = entries.lock().expect("idempotency store lock");
            entries.insert(cache_key, StoredEntry::new(record, ttl));
            Ok(())
        })
    }
}
