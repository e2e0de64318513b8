use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use reclaim_domain::ports::BoxFuture;
use reclaim_domain::ports::items::{ItemDirectory, ItemServiceError, ItemSummary};
use reqwest::StatusCode;
use tokio::sync::RwLock;

use crate::config::AppConfig;

const PLATFORM_TOKEN_HEADER: &str = "x-platform-token";

/// HTTP client for the item catalog collaborator. Lookups label
/// conversations; `resolve_item` is the best-effort notification fired when a
/// conversation about an item is resolved.
#[derive(Clone)]
pub struct RestItemService {
    http: reqwest::Client,
    base_url: String,
    platform_token: String,
}

impl RestItemService {
    pub fn new(config: &AppConfig) -> Result<Self, ItemServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.item_service_timeout_ms))
            .build()
            .map_err(|err| ItemServiceError::Unavailable(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.item_service_base_url.trim_end_matches('/').to_string(),
            platform_token: config.item_service_token.clone(),
        })
    }

    fn item_url(&self, item_id: &str) -> String {
        format!("{}/items/{item_id}", self.base_url)
    }
}

impl ItemDirectory for RestItemService {
    fn get_item(
        &self,
        item_id: &str,
    ) -> BoxFuture<'_, Result<Option<ItemSummary>, ItemServiceError>> {
        let url = self.item_url(item_id);
        Box::pin(async move {
            let response = self
                .http
                .get(&url)
                .header(PLATFORM_TOKEN_HEADER, &self.platform_token)
                .send()
                .await
                .map_err(|err| ItemServiceError::Unavailable(err.to_string()))?;
            match response.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => {
                    let summary = response.json::<ItemSummary>().await.map_err(|err| {
                        ItemServiceError::Rejected(format!("invalid item payload: {err}"))
                    })?;
                    Ok(Some(summary))
                }
                status if status.is_server_error() => Err(ItemServiceError::Unavailable(format!(
                    "item lookup returned {status}"
                ))),
                status => Err(ItemServiceError::Rejected(format!(
                    "item lookup returned {status}"
                ))),
            }
        })
    }

    fn resolve_item(&self, item_id: &str) -> BoxFuture<'_, Result<(), ItemServiceError>> {
        let url = format!("{}/resolve", self.item_url(item_id));
        let item_id = item_id.to_string();
        Box::pin(async move {
            let response = self
                .http
                .post(&url)
                .header(PLATFORM_TOKEN_HEADER, &self.platform_token)
                .send()
                .await
                .map_err(|err| ItemServiceError::Unavailable(err.to_string()))?;
            match response.status() {
                StatusCode::NOT_FOUND => Err(ItemServiceError::NotFound(item_id)),
                status if status.is_success() => Ok(()),
                status if status.is_server_error() => Err(ItemServiceError::Unavailable(format!(
                    "item resolve returned {status}"
                ))),
                status => Err(ItemServiceError::Rejected(format!(
                    "item resolve returned {status}"
                ))),
            }
        })
    }
}

/// Item directory for the memory backend and the test suite. Records every
/// resolve call so tests can assert the exactly-once-per-transition contract.
#[derive(Default)]
pub struct InMemoryItemService {
    items: Arc<RwLock<HashMap<String, ItemSummary>>>,
    resolved: Arc<RwLock<HashSet<String>>>,
    resolve_calls: Arc<RwLock<Vec<String>>>,
}

impl InMemoryItemService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, item: ItemSummary) {
        self.items.write().await.insert(item.item_id.clone(), item);
    }

    pub async fn is_resolved(&self, item_id: &str) -> bool {
        self.resolved.read().await.contains(item_id)
    }

    pub async fn resolve_calls(&self) -> Vec<String> {
        self.resolve_calls.read().await.clone()
    }
}

impl ItemDirectory for InMemoryItemService {
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
        let resolved = self.resolved.clone();
        let calls = self.resolve_calls.clone();
        Box::pin(async move {
            calls.write().await.push(item_id.clone());
            resolved.write().await.insert(item_id);
            Ok(())
        })
    }
}
