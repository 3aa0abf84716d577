//! In-memory storage backend, used by tests and local dry runs.

use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path;
use std::sync::Arc;

use super::{BackendConfig, StorageProvider};

/// In-memory bucket configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub bucket: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) fn construct_memory(config: MemoryConfig) -> Self {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let canonical_url = format!("memory://{}", config.bucket);

        Self {
            config: BackendConfig::Memory(config),
            object_store,
            canonical_url,
        }
    }

    /// Create an empty in-memory bucket.
    ///
    /// Clones of the returned provider share the same objects.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::construct_memory(MemoryConfig {
            bucket: bucket.into(),
            key: None,
        })
    }
}
