use std::sync::Arc;

use crate::auth::JwtKeys;
use crate::config::AppConfig;
use crate::db::{Database, MemoryDatabase, PgDatabase};
use crate::storage::{MemoryStorage, S3Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub storage: Arc<dyn StorageClient>,
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
}

impl AppState {
    /// Reads the environment, connects to Postgres, applies migrations and
    /// configures the image bucket.
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let db = PgDatabase::connect(&config.database).await?;
        db.migrate().await?;

        let storage = Arc::new(S3Storage::connect(&config.storage).await?) as Arc<dyn StorageClient>;

        Ok(Self::from_parts(Arc::new(db), storage, config))
    }

    pub fn from_parts(
        db: Arc<dyn Database>,
        storage: Arc<dyn StorageClient>,
        config: AppConfig,
    ) -> Self {
        let keys = JwtKeys::new(&config.jwt);
        Self {
            db,
            storage,
            config: Arc::new(config),
            keys,
        }
    }

    /// State backed by [`MemoryDatabase`] and [`MemoryStorage`], no external services needed.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::from_parts(
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemoryStorage::new()),
            config,
        )
    }
}
