//! URL parsing for storage backends.
//!
//! Extracts backend configuration from the URL formats squall accepts
//! (GCS, local filesystem, in-memory).

use object_store::path::Path;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{GcsConfig, LocalConfig, MemoryConfig};

const GCS_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.*))?$";
const GCS_PATH: &str =
    r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.*))?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.*))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

const MEMORY_URL: &str = r"^memory://(?P<bucket>[A-Za-z0-9\-\._]+)(/(?P<key>.*))?$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Gcs,
    Local,
    Memory,
}

fn matchers() -> &'static [(Backend, Vec<Regex>)] {
    static MATCHERS: OnceLock<Vec<(Backend, Vec<Regex>)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("storage URL pattern must compile"))
                .collect::<Vec<_>>()
        };
        vec![
            (Backend::Gcs, compile(&[GCS_PATH, GCS_VIRTUAL, GCS_URL])),
            (Backend::Local, compile(&[FILE_URI, FILE_PATH])),
            (Backend::Memory, compile(&[MEMORY_URL])),
        ]
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Gcs(GcsConfig),
    Local(LocalConfig),
    Memory(MemoryConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, patterns) in matchers() {
            if let Some(caps) = patterns.iter().find_map(|r| r.captures(url)) {
                return Ok(match backend {
                    Backend::Gcs => Self::Gcs(GcsConfig {
                        bucket: caps["bucket"].to_string(),
                        key: key_of(&caps),
                    }),
                    Backend::Memory => Self::Memory(MemoryConfig {
                        bucket: caps["bucket"].to_string(),
                        key: key_of(&caps),
                    }),
                    Backend::Local => {
                        let path = &caps["path"];
                        let path = if path.starts_with('/') {
                            path.to_string()
                        } else {
                            format!("/{path}")
                        };
                        Self::Local(LocalConfig { path })
                    }
                });
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    /// The key prefix inside the bucket, if any.
    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Memory(memory) => memory.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

fn key_of(caps: &regex::Captures) -> Option<Path> {
    caps.name("key")
        .map(|m| m.as_str().trim_end_matches('/'))
        .filter(|k| !k.is_empty())
        .map(Path::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcs_url_parsing() {
        let config = BackendConfig::parse_url("gs://crimes-data/outputs").unwrap();
        match config {
            BackendConfig::Gcs(gcs) => {
                assert_eq!(gcs.bucket, "crimes-data");
                assert_eq!(gcs.key, Some(Path::from("outputs")));
            }
            _ => panic!("Expected GCS config"),
        }
    }

    #[test]
    fn test_gcs_bucket_only() {
        let config = BackendConfig::parse_url("gs://crimes-data").unwrap();
        assert_eq!(
            config,
            BackendConfig::Gcs(GcsConfig {
                bucket: "crimes-data".to_string(),
                key: None
            })
        );
    }

    #[test]
    fn test_gcs_trailing_slash_is_ignored() {
        let config = BackendConfig::parse_url("gs://crimes-data/").unwrap();
        assert_eq!(config.key(), None);
    }

    #[test]
    fn test_trailing_slash_keeps_bucket_and_key() {
        let config = BackendConfig::parse_url("memory://bucket/").unwrap();
        assert_eq!(
            config,
            BackendConfig::Memory(MemoryConfig {
                bucket: "bucket".to_string(),
                key: None
            })
        );

        let config = BackendConfig::parse_url("gs://crimes-data/outputs/").unwrap();
        assert_eq!(config.key(), Some(&Path::from("outputs")));
    }

    #[test]
    fn test_gcs_https_forms() {
        for url in [
            "https://storage.googleapis.com/crimes-data/out",
            "https://crimes-data.storage.googleapis.com/out",
        ] {
            match BackendConfig::parse_url(url).unwrap() {
                BackendConfig::Gcs(gcs) => {
                    assert_eq!(gcs.bucket, "crimes-data", "{url}");
                    assert_eq!(gcs.key, Some(Path::from("out")), "{url}");
                }
                other => panic!("Expected GCS config for {url}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_local_paths() {
        for url in ["/tmp/data", "file:///tmp/data"] {
            assert_eq!(
                BackendConfig::parse_url(url).unwrap(),
                BackendConfig::Local(LocalConfig {
                    path: "/tmp/data".to_string()
                })
            );
        }
    }

    #[test]
    fn test_memory_url() {
        match BackendConfig::parse_url("memory://bucket/prefix").unwrap() {
            BackendConfig::Memory(memory) => {
                assert_eq!(memory.bucket, "bucket");
                assert_eq!(memory.key, Some(Path::from("prefix")));
            }
            other => panic!("Expected memory config, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_url() {
        let err = BackendConfig::parse_url("ftp://nope").unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl { .. }));
    }
}
