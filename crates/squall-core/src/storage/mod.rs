//! Object storage abstraction.
//!
//! Provides a unified interface over Google Cloud Storage, the local
//! filesystem and an in-memory store, all backed by the `object_store` crate.

mod gcs;
mod local;
mod memory;
mod url_parser;

pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use memory::MemoryConfig;
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over different storage backends.
///
/// All paths handed to and returned from the provider are relative to the
/// key prefix of the URL it was built from.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.base_url())
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    ///
    /// Accepts `gs://bucket[/key]`, GCS https URLs, `file://` or absolute
    /// local paths, and `memory://bucket[/key]`.
    pub async fn for_url(url: &str) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::Gcs(config) => Self::construct_gcs(config),
            BackendConfig::Local(config) => Self::construct_local(config).await,
            BackendConfig::Memory(config) => Ok(Self::construct_memory(config)),
        }
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// URL of the storage root including the key prefix, without trailing slash.
    pub fn base_url(&self) -> String {
        match self.config.key() {
            Some(key) => format!("{}/{key}", self.canonical_url),
            None => self.canonical_url.clone(),
        }
    }

    /// Fully qualified URI of a relative path (e.g. `gs://bucket/t1/part-0.parquet`).
    pub fn uri_for(&self, path: &Path) -> String {
        format!("{}/{path}", self.base_url())
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every object under `prefix` (relative to the configured base prefix).
    ///
    /// Prefix matching is segment-wise: `t1` matches `t1/part-0.parquet` but
    /// not `t10/part-0.parquet`. Returned paths are relative to the
    /// configured base prefix, in listing order.
    pub async fn list_with_prefix(&self, prefix: &str) -> Result<Vec<Path>, StorageError> {
        let full_prefix: Path = match self.config.key() {
            Some(key) => key.parts().chain(Path::from(prefix).parts()).collect(),
            None => Path::from(prefix),
        };
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let start = Instant::now();
        let result: Result<Vec<Path>, object_store::Error> = self
            .object_store
            .list(Some(&full_prefix))
            .map_ok(move |meta| -> Path { meta.location.parts().skip(key_part_count).collect() })
            .try_collect()
            .await;

        record(StorageOperation::List, start, result.is_ok());
        let paths = result.context(ObjectStoreSnafu)?;
        debug!(prefix, count = paths.len(), "Listed objects");
        Ok(paths)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: impl Into<Path>) -> Result<Bytes, StorageError> {
        let path = path.into();
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(&path)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };

        record(StorageOperation::Get, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// Put bytes to a path, replacing any existing object.
    pub async fn put(&self, path: impl Into<Path>, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        let path = path.into();
        let payload = PutPayload::from(bytes.into());
        let start = Instant::now();
        let result = self
            .object_store
            .put(&self.qualify_path(&path), payload)
            .await;

        record(StorageOperation::Put, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete a file at the given path.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(&self.qualify_path(path)).await;

        record(StorageOperation::Delete, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}

fn record(operation: StorageOperation, start: Instant, ok: bool) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_with_prefix_is_segment_wise() {
        let storage = StorageProvider::in_memory("outputs");
        storage.put("t1/part-0.parquet", "a").await.unwrap();
        storage.put("t1/_SUCCESS", "").await.unwrap();
        storage.put("t10/part-0.parquet", "b").await.unwrap();

        let mut listed: Vec<String> = storage
            .list_with_prefix("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.to_string())
            .collect();
        listed.sort();

        assert_eq!(listed, vec!["t1/_SUCCESS", "t1/part-0.parquet"]);
    }

    #[tokio::test]
    async fn test_clones_share_objects() {
        let storage = StorageProvider::in_memory("shared");
        let clone = storage.clone();
        storage.put("a/b.parquet", "data").await.unwrap();

        let bytes = clone.get("a/b.parquet").await.unwrap();
        assert_eq!(bytes.as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_local_list_returns_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("total_crimes_per_year");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("part-00000.parquet"), b"PAR1").unwrap();

        let storage = StorageProvider::for_url(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();
        let listed = storage.list_with_prefix("total_crimes_per_year").await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].to_string(),
            "total_crimes_per_year/part-00000.parquet"
        );
        let content = storage.get(listed[0].clone()).await.unwrap();
        assert_eq!(content.as_ref(), b"PAR1");
    }

    #[tokio::test]
    async fn test_key_prefix_is_stripped_and_qualified() {
        let storage = StorageProvider::for_url("memory://bucket/runs/2024")
            .await
            .unwrap();
        storage.put("t1/part-0.parquet", "x").await.unwrap();

        let listed = storage.list_with_prefix("t1").await.unwrap();
        assert_eq!(listed[0].to_string(), "t1/part-0.parquet");
        assert_eq!(
            storage.uri_for(&listed[0]),
            "memory://bucket/runs/2024/t1/part-0.parquet"
        );
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let storage = StorageProvider::in_memory("empty");
        let err = storage.get("nope.parquet").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
