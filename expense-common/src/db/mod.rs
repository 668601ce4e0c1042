//! Record Store collaborator
//!
//! Durable key-value persistence of [`Record`]s by id. Stores do not do any
//! concurrency control: concurrent updates to the same Record are
//! last-writer-wins. The pipeline layers its own single-writer check on top.

mod memory;
mod postgres;
mod retry;
mod sqlite;

pub use memory::InMemoryRecordStore;
pub use postgres::{connect_options, PostgresRecordStore};
pub use retry::retry_on_lock;
pub use sqlite::SqliteRecordStore;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::Record;
use crate::Result;

/// Persistence contract:
/// - `get` fails with `Error::NotFound` for an unknown id
/// - `create` fails with `Error::AlreadyExists` when the id is taken
/// - `update` fails with `Error::NotFound` for an unknown id
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Record>;

    async fn create(&self, record: &Record) -> Result<()>;

    async fn update(&self, record: &Record) -> Result<()>;
}

/// Open the configured Record Store backend
pub async fn open_record_store(config: &DatabaseConfig) -> Result<Arc<dyn RecordStore>> {
    match config {
        DatabaseConfig::Sqlite { path } => {
            tracing::info!(path = %path.display(), "Opening SQLite record store");
            Ok(Arc::new(SqliteRecordStore::open(path).await?))
        }
        DatabaseConfig::Postgres(pg) => {
            let options = connect_options(pg)?;
            tracing::info!(
                host = %options.get_host(),
                database = ?options.get_database(),
                "Opening PostgreSQL record store"
            );
            Ok(Arc::new(PostgresRecordStore::connect(options).await?))
        }
        DatabaseConfig::Memory => {
            tracing::info!("Using in-memory record store");
            Ok(Arc::new(InMemoryRecordStore::new()))
        }
    }
}
