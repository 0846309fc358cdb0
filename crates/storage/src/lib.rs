//! Persistent backends for the learning core's `save_all`/`load_all` store.

pub mod json_file;
pub mod sqlite;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;

use hivemind_core::config::StorageBackend;
use hivemind_core::{Config, Paths, Result};
use hivemind_learning::{InMemoryStore, LearningStore};
use std::sync::Arc;
use tracing::info;

/// Build the store selected by `config.storage`.
pub fn open_store(config: &Config, paths: &Paths) -> Result<Arc<dyn LearningStore>> {
    let store: Arc<dyn LearningStore> = match config.storage.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::new(config.storage_path(paths))),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.storage_path(paths))?),
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
    };
    info!(backend = store.name(), "Learning store ready");
    Ok(store)
}
