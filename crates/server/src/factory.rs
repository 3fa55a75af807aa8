//! Backend construction from configuration.

use std::sync::Arc;

use tracing::info;

use artifacthub_db::Database;
use artifacthub_db_memory::MemoryDatabase;
use artifacthub_db_postgres::PostgresDatabase;
use artifacthub_storage::StorageClient;
use artifacthub_storage_local::LocalStorage;
use artifacthub_storage_memory::MemoryStorage;

use crate::config::{DatabaseConfig, StorageConfig};
use crate::error::ServerError;

/// Connect to the configured database. The Postgres backend runs its
/// migrations on connect.
pub async fn create_database(config: &DatabaseConfig) -> Result<Arc<dyn Database>, ServerError> {
    let db: Arc<dyn Database> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryDatabase::new()),
        "postgres" => {
            let db = PostgresDatabase::new(config.postgres_config()).await?;
            Arc::new(db)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unknown database backend: {other}"
            )));
        }
    };
    info!(backend = %config.backend, "database initialized");
    Ok(db)
}

/// Open the configured bucket storage.
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn StorageClient>, ServerError> {
    let storage: Arc<dyn StorageClient> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryStorage::new()),
        "local" => Arc::new(LocalStorage::new(&config.root).await?),
        other => {
            return Err(ServerError::Config(format!(
                "unknown storage backend: {other}"
            )));
        }
    };
    info!(backend = %config.backend, root = %config.root, "storage initialized");
    Ok(storage)
}
