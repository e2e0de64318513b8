use std::sync::Arc;
use std::time::Duration;

use reclaim_domain::conversation::ConversationService;
use reclaim_domain::delivery::MessagePipeline;
use reclaim_domain::discussion::ItemDiscussionService;
use reclaim_domain::idempotency::{IdempotencyConfig, IdempotencyService, InMemoryIdempotencyStore};
use reclaim_domain::ports::conversation::ConversationRepository;
use reclaim_domain::ports::db::DbAdapter;
use reclaim_domain::ports::discussion::DiscussionRepository;
use reclaim_domain::ports::idempotency::IdempotencyStore;
use reclaim_domain::ports::items::ItemDirectory;
use reclaim_infra::config::AppConfig;
use reclaim_infra::db::{DbConfig, SurrealAdapter};
use reclaim_infra::idempotency::RedisIdempotencyStore;
use reclaim_infra::items::{InMemoryItemService, RestItemService};
use reclaim_infra::realtime::RoomBroadcaster;
use reclaim_infra::repositories::{
    InMemoryConversationRepository, InMemoryDiscussionRepository, SurrealConversationRepository,
    SurrealDiscussionRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub conversations: ConversationService,
    pub discussions: ItemDiscussionService,
    pub pipeline: MessagePipeline,
    pub broadcaster: Arc<RoomBroadcaster>,
    pub idempotency: IdempotencyService,
    pub db_adapter: Option<Arc<dyn DbAdapter>>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let (conversation_repo, discussion_repo, items, db_adapter): (
            Arc<dyn ConversationRepository>,
            Arc<dyn DiscussionRepository>,
            Arc<dyn ItemDirectory>,
            Option<Arc<dyn DbAdapter>>,
        ) = match config.data_backend.as_str() {
            "surreal" => {
                let db_config = DbConfig::from_app_config(&config);
                let conversations = SurrealConversationRepository::new(&db_config).await?;
                let discussions = SurrealDiscussionRepository::new(&db_config).await?;
                let items = RestItemService::new(&config)?;
                (
                    Arc::new(conversations),
                    Arc::new(discussions),
                    Arc::new(items),
                    Some(Arc::new(SurrealAdapter::new(db_config))),
                )
            }
            _ => (
                Arc::new(InMemoryConversationRepository::new()),
                Arc::new(InMemoryDiscussionRepository::new()),
                Arc::new(InMemoryItemService::new()),
                None,
            ),
        };

        let idempotency_store: Arc<dyn IdempotencyStore> =
            match config.idempotency_backend.as_str() {
                "redis" => Arc::new(RedisIdempotencyStore::connect(&config.redis_url).await?),
                _ => Arc::new(InMemoryIdempotencyStore::new("reclaim")),
            };

        Ok(Self::assemble(
            config,
            conversation_repo,
            discussion_repo,
            items,
            idempotency_store,
            db_adapter,
        ))
    }

    /// Wiring shared by `new` and the test suite, which injects its own
    /// repositories and item directory.
    pub fn assemble(
        config: AppConfig,
        conversation_repo: Arc<dyn ConversationRepository>,
        discussion_repo: Arc<dyn DiscussionRepository>,
        items: Arc<dyn ItemDirectory>,
        idempotency_store: Arc<dyn IdempotencyStore>,
        db_adapter: Option<Arc<dyn DbAdapter>>,
    ) -> Self {
        let broadcaster = Arc::new(RoomBroadcaster::new());
        let conversations = ConversationService::new(conversation_repo, items);
        let discussions = ItemDiscussionService::new(discussion_repo);
        let pipeline = MessagePipeline::new(
            conversations.clone(),
            discussions.clone(),
            broadcaster.clone(),
        )
        .with_store_timeout(Duration::from_millis(config.store_timeout_ms));
        let idempotency = IdempotencyService::new(idempotency_store, IdempotencyConfig::default());
        Self {
            config,
            conversations,
            discussions,
            pipeline,
            broadcaster,
            idempotency,
            db_adapter,
        }
    }
}
