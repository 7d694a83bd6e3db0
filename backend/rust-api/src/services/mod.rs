use std::sync::Arc;

use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::repositories::{
    CatalogRepository, MemoryCatalog, MemoryPendingStore, MemorySessionStore, MongoCatalog,
    MongoSessionStore, PendingRepository, RedisPendingStore, SessionRepository,
};
use broadcaster::Broadcaster;

pub struct AppState {
    pub config: Config,
    pub catalog: Arc<dyn CatalogRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub pending: Arc<dyn PendingRepository>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let sessions = MongoSessionStore::new(mongo.clone());
        sessions.ensure_indexes().await?;

        Ok(Self {
            catalog: Arc::new(MongoCatalog::new(mongo)),
            sessions: Arc::new(sessions),
            pending: Arc::new(RedisPendingStore::new(redis)),
            broadcaster: Broadcaster::new(config.broadcast_capacity),
            config,
        })
    }

    /// State backed by in-process stores. Nothing survives a restart.
    pub fn in_memory(config: Config) -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            pending: Arc::new(MemoryPendingStore::new()),
            broadcaster: Broadcaster::new(config.broadcast_capacity),
            config,
        }
    }
}

pub mod answer_service;
pub mod broadcaster;
pub mod catalog_seed;
pub mod expiry_worker;
pub mod grader;
pub mod session_service;
