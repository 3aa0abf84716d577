//! Resolution of a job's output artifacts.
//!
//! A result set is a directory of part files written by the distributed
//! write framework, which drops a completion marker next to them once the
//! commit succeeded. Nothing under a prefix is considered loadable until
//! that marker exists.

use object_store::path::Path;
use tracing::debug;

use squall_core::{StorageError, StorageProvider};

/// Name of the completion marker object.
pub const COMPLETION_MARKER: &str = "_SUCCESS";
/// Extension of loadable data files.
pub const DATA_EXTENSION: &str = ".parquet";

/// Finds the file to load for a result set.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    storage: StorageProvider,
}

impl ArtifactLocator {
    pub fn new(storage: StorageProvider) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageProvider {
        &self.storage
    }

    /// Resolve the data file under `prefix`.
    ///
    /// Returns `None` unless `{prefix}/_SUCCESS` exists, even if data files
    /// are present. Otherwise returns the lexically smallest data file
    /// outside hidden (`_` or `.` prefixed) directories, so repeated calls
    /// against a stable prefix agree.
    pub async fn locate(&self, prefix: &str) -> Result<Option<Path>, StorageError> {
        let prefix = prefix.trim_matches('/');
        let listed = self.storage.list_with_prefix(prefix).await?;
        let depth = Path::from(prefix).parts().count();

        let mut complete = false;
        let mut data_files = Vec::new();
        for path in listed {
            match classify(&path, depth) {
                Entry::Marker => complete = true,
                Entry::Data => data_files.push(path),
                Entry::Other => {}
            }
        }

        if !complete {
            debug!(prefix, files = data_files.len(), "No completion marker, result set not ready");
            return Ok(None);
        }

        let selected = data_files.into_iter().min();
        debug!(prefix, selected = ?selected.as_ref().map(|p| p.as_ref()), "Resolved artifact");
        Ok(selected)
    }

    /// Fully qualified URI of a located artifact.
    pub fn uri_for(&self, path: &Path) -> String {
        self.storage.uri_for(path)
    }
}

enum Entry {
    Marker,
    Data,
    Other,
}

fn classify(path: &Path, depth: usize) -> Entry {
    let relative: Vec<String> = path.parts().skip(depth).map(|part| part.as_ref().to_string()).collect();
    match relative.as_slice() {
        [name] if name == COMPLETION_MARKER => Entry::Marker,
        [] => Entry::Other,
        parts => {
            let hidden = parts.iter().any(|part| part.starts_with(['_', '.']));
            let is_data = parts
                .last()
                .is_some_and(|name| name.ends_with(DATA_EXTENSION));
            if is_data && !hidden {
                Entry::Data
            } else {
                Entry::Other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn locator_with(objects: &[&str]) -> ArtifactLocator {
        let storage = StorageProvider::in_memory("data");
        for object in objects {
            storage.put(*object, "x").await.unwrap();
        }
        ArtifactLocator::new(storage)
    }

    #[tokio::test]
    async fn test_partial_write_is_not_found() {
        let locator = locator_with(&["t1/part-00000.parquet", "t1/part-00001.parquet"]).await;
        assert_eq!(locator.locate("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_marker_makes_result_set_visible() {
        let locator = locator_with(&[
            "t1/part-00001.parquet",
            "t1/part-00000.parquet",
            "t1/_SUCCESS",
        ])
        .await;

        let first = locator.locate("t1").await.unwrap();
        let second = locator.locate("t1").await.unwrap();
        assert_eq!(first, Some(Path::from("t1/part-00000.parquet")));
        assert_eq!(first, second);
        assert_eq!(
            locator.uri_for(&Path::from("t1/part-00000.parquet")),
            "memory://data/t1/part-00000.parquet"
        );
    }

    #[tokio::test]
    async fn test_marker_must_be_direct_child() {
        let locator = locator_with(&["t1/part-00000.parquet", "t1/nested/_SUCCESS"]).await;
        assert_eq!(locator.locate("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_marker_of_sibling_prefix_ignored() {
        let locator = locator_with(&["t1/part-00000.parquet", "t10/_SUCCESS"]).await;
        assert_eq!(locator.locate("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_skips_hidden_and_foreign_files() {
        let locator = locator_with(&[
            "t1/_temporary/0/part-00000.parquet",
            "t1/.part-00000.parquet.crc",
            "t1/_SUCCESS",
            "t1/date=2026-10-19/part-00003.parquet",
            "t1/README.txt",
        ])
        .await;

        assert_eq!(
            locator.locate("/t1/").await.unwrap(),
            Some(Path::from("t1/date=2026-10-19/part-00003.parquet"))
        );
    }

    #[tokio::test]
    async fn test_marker_without_data_files() {
        let locator = locator_with(&["t1/_SUCCESS"]).await;
        assert_eq!(locator.locate("t1").await.unwrap(), None);
    }
}
