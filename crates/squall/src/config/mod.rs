//! Configuration for the squall orchestrator.
//!
//! A [`PipelineConfig`] is built once per invocation, either from the
//! process environment or from an explicit YAML file, and handed to every
//! component by reference. Nothing below the entry points reads the
//! environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::ConfigError;
use squall_core::error::{ReadFileSnafu, YamlParseSnafu};
pub use squall_core::{MetricsConfig, ServerConfig, interpolate, interpolate_with};

/// Template used by [`PipelineConfig::from_env`].
const ENV_TEMPLATE: &str = r#"
project_id: "${PROJECT}"
region: "${REGION}"
cluster_name: "${CLUSTER_NAME:-dataproc-cluster}"
job_bucket: "${JOB_BUCKET_NAME}"
job_file: "${JOB_FILE_NAME}"
data_bucket: "${DATA_BUCKET_NAME}"
data_file: "${DATA_FILE_NAME}"
output_bucket: "${OUTPUT_BUCKET_NAME:-}"
dataset: "${DATASET}"
completion_topic: "${COMPLETION_TOPIC:-processing_job_ended}"
"#;

/// Escape a value for a double-quoted YAML scalar in [`ENV_TEMPLATE`].
fn escape_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Deadlines applied to blocking waits, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Cluster creation (default: 30 minutes).
    #[serde(default = "default_cluster_create_secs")]
    pub cluster_create_secs: u64,
    /// Cluster deletion (default: 10 minutes).
    #[serde(default = "default_cluster_delete_secs")]
    pub cluster_delete_secs: u64,
    /// Job submission acknowledgment (default: 2 minutes).
    #[serde(default = "default_job_submit_secs")]
    pub job_submit_secs: u64,
    /// A single table load (default: 15 minutes).
    #[serde(default = "default_table_load_secs")]
    pub table_load_secs: u64,
    /// Interval between provider operation polls (default: 5 seconds).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_cluster_create_secs() -> u64 {
    30 * 60
}

fn default_cluster_delete_secs() -> u64 {
    10 * 60
}

fn default_job_submit_secs() -> u64 {
    120
}

fn default_table_load_secs() -> u64 {
    15 * 60
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cluster_create_secs: default_cluster_create_secs(),
            cluster_delete_secs: default_cluster_delete_secs(),
            job_submit_secs: default_job_submit_secs(),
            table_load_secs: default_table_load_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn cluster_create(&self) -> Duration {
        Duration::from_secs(self.cluster_create_secs)
    }

    pub fn cluster_delete(&self) -> Duration {
        Duration::from_secs(self.cluster_delete_secs)
    }

    pub fn job_submit(&self) -> Duration {
        Duration::from_secs(self.job_submit_secs)
    }

    pub fn table_load(&self) -> Duration {
        Duration::from_secs(self.table_load_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("timeouts.cluster_create_secs", self.cluster_create_secs),
            ("timeouts.cluster_delete_secs", self.cluster_delete_secs),
            ("timeouts.job_submit_secs", self.job_submit_secs),
            ("timeouts.table_load_secs", self.table_load_secs),
            ("timeouts.poll_interval_secs", self.poll_interval_secs),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Main configuration for squall.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Project hosting the cluster, the warehouse and the message bus.
    pub project_id: String,
    /// Region of the compute cluster.
    pub region: String,
    /// Name of the ephemeral cluster.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Bucket holding the batch job's entry point.
    pub job_bucket: String,
    /// Object name of the batch job's entry point.
    pub job_file: String,
    /// Bucket holding the job's input data.
    pub data_bucket: String,
    /// Object name of the job's input data.
    pub data_file: String,
    /// Bucket the job writes its result sets to (default: `data_bucket`).
    #[serde(default)]
    pub output_bucket: Option<String>,
    /// Warehouse dataset receiving the loaded tables.
    pub dataset: String,
    /// Topic the job publishes its status envelope to.
    #[serde(default = "default_completion_topic")]
    pub completion_topic: String,
    /// Name of the deployed trigger function, used for log links only.
    #[serde(default = "default_function_name")]
    pub function_name: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Number of tables loaded concurrently (default: 1).
    #[serde(default = "default_load_concurrency")]
    pub load_concurrency: usize,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_cluster_name() -> String {
    "dataproc-cluster".to_string()
}

fn default_completion_topic() -> String {
    "processing_job_ended".to_string()
}

fn default_function_name() -> String {
    "extract_and_transform".to_string()
}

fn default_load_concurrency() -> usize {
    1
}

impl PipelineConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from variables resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let result = interpolate_with(ENV_TEMPLATE, |name| {
            lookup(name).map(|value| escape_quoted(&value))
        });
        Self::from_interpolated(result)
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Self::from_interpolated(interpolate(contents))
    }

    fn from_interpolated(result: squall_core::config::InterpolationResult) -> Result<Self, ConfigError> {
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: PipelineConfig = serde_yaml::from_str(&result.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("project_id", &self.project_id),
            ("region", &self.region),
            ("cluster_name", &self.cluster_name),
            ("job_bucket", &self.job_bucket),
            ("job_file", &self.job_file),
            ("data_bucket", &self.data_bucket),
            ("data_file", &self.data_file),
            ("dataset", &self.dataset),
            ("completion_topic", &self.completion_topic),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField {
                    field: field.to_string(),
                });
            }
        }

        if self.load_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "load_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        self.timeouts.validate()
    }

    /// Bucket holding the job's result sets.
    pub fn output_bucket(&self) -> &str {
        self.output_bucket
            .as_deref()
            .filter(|bucket| !bucket.is_empty())
            .unwrap_or(&self.data_bucket)
    }

    /// Object storage URL of the job's result sets.
    pub fn output_url(&self) -> String {
        format!("gs://{}", self.output_bucket())
    }

    /// URI of the batch job's entry point.
    pub fn job_file_uri(&self) -> String {
        format!("gs://{}/{}", self.job_bucket, self.job_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const REQUIRED_VARS: &[(&str, &str)] = &[
        ("PROJECT", "tarrieu"),
        ("REGION", "europe-west1"),
        ("JOB_BUCKET_NAME", "jobs"),
        ("JOB_FILE_NAME", "job.py"),
        ("DATA_BUCKET_NAME", "data"),
        ("DATA_FILE_NAME", "crimes.csv"),
        ("DATASET", "crimes"),
    ];

    fn lookup(extra: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<&str, &str> = REQUIRED_VARS.iter().chain(extra).copied().collect();
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_from_env_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.project_id, "tarrieu");
        assert_eq!(config.cluster_name, "dataproc-cluster");
        assert_eq!(config.completion_topic, "processing_job_ended");
        assert_eq!(config.function_name, "extract_and_transform");
        assert_eq!(config.output_bucket(), "data");
        assert_eq!(config.job_file_uri(), "gs://jobs/job.py");
        assert_eq!(config.load_concurrency, 1);
    }

    #[test]
    fn test_from_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("CLUSTER_NAME", "etl"),
            ("OUTPUT_BUCKET_NAME", "results"),
            ("COMPLETION_TOPIC", "done"),
        ]))
        .unwrap();
        assert_eq!(config.cluster_name, "etl");
        assert_eq!(config.output_bucket(), "results");
        assert_eq!(config.output_url(), "gs://results");
        assert_eq!(config.completion_topic, "done");
    }

    #[test]
    fn test_from_env_values_are_taken_literally() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("DATA_FILE_NAME", r#"raw "2024"\crimes.csv"#),
            ("COMPLETION_TOPIC", "done\"\ndataset: other"),
        ]))
        .unwrap();
        assert_eq!(config.data_file, r#"raw "2024"\crimes.csv"#);
        assert_eq!(config.completion_topic, "done\"\ndataset: other");
        assert_eq!(config.dataset, "crimes");
    }

    #[test]
    fn test_from_env_reports_every_missing_variable() {
        let err = PipelineConfig::from_lookup(|_| None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("PROJECT"));
        assert!(message.contains("DATASET"));
        assert!(message.contains("DATA_FILE_NAME"));
    }

    #[test]
    fn test_empty_required_field_rejected() {
        let yaml = r#"
project_id: p
region: ""
job_bucket: b
job_file: f
data_bucket: d
data_file: x
dataset: ds
"#;
        let err = PipelineConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyField { ref field } if field == "region"));
    }

    #[test]
    fn test_parse_with_timeouts() {
        let yaml = r#"
project_id: p
region: r
job_bucket: b
job_file: f
data_bucket: d
data_file: x
dataset: ds
load_concurrency: 4
timeouts:
  cluster_create_secs: 60
"#;
        let config = PipelineConfig::parse(yaml).unwrap();
        assert_eq!(config.timeouts.cluster_create(), Duration::from_secs(60));
        assert_eq!(config.timeouts.table_load(), Duration::from_secs(900));
        assert_eq!(config.load_concurrency, 4);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = r#"
project_id: p
region: r
job_bucket: b
job_file: f
data_bucket: d
data_file: x
dataset: ds
timeouts:
  table_load_secs: 0
"#;
        let err = PipelineConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout { .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
project_id: p
region: r
job_bucket: b
job_file: f
data_bucket: d
data_file: x
dataset: ds
bucket: typo
"#;
        assert!(matches!(
            PipelineConfig::parse(yaml),
            Err(ConfigError::YamlParse { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("squall.yaml");
        std::fs::write(
            &path,
            "project_id: p\nregion: r\njob_bucket: b\njob_file: f\ndata_bucket: d\ndata_file: x\ndataset: ds\n",
        )
        .unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.dataset, "ds");

        let missing = PipelineConfig::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }
}
