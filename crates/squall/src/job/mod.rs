//! Batch job submission.
//!
//! The submitter places one job on the named cluster and returns as soon as
//! the provider acknowledges it. Completion is observed through the status
//! envelope the job publishes, never by polling the job.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use snafu::ResultExt;
use tracing::{error, info};

use crate::cluster::ClusterDescriptor;
use crate::config::PipelineConfig;
use crate::emit;
use crate::error::{PipelineError, ServiceError, SubmissionSnafu};
use crate::metrics::events::JobSubmitted;
use squall_core::with_deadline;

pub use memory::InMemoryJobService;

/// Job specification handed to the job service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    /// Cluster the job is placed on.
    pub cluster_name: String,
    /// URI of the job's entry point.
    pub main_file_uri: String,
    /// Positional arguments: source bucket, source object, destination
    /// project id and completion topic, in that order.
    pub args: Vec<String>,
}

impl JobSpec {
    pub fn for_pipeline(config: &PipelineConfig) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            main_file_uri: config.job_file_uri(),
            args: vec![
                config.data_bucket.clone(),
                config.data_file.clone(),
                config.project_id.clone(),
                config.completion_topic.clone(),
            ],
        }
    }
}

/// Identifier of a submitted job. Used for log links only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub job_id: String,
    pub cluster_name: String,
}

/// Black-box job service.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Submit a job and return the provider's job id.
    async fn submit(
        &self,
        cluster: &ClusterDescriptor,
        spec: &JobSpec,
    ) -> Result<String, ServiceError>;
}

/// Submits the pipeline's batch job.
pub struct JobSubmitter {
    service: Arc<dyn JobService>,
    timeout: Duration,
}

impl JobSubmitter {
    pub fn new(service: Arc<dyn JobService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub async fn submit(
        &self,
        cluster: &ClusterDescriptor,
        spec: &JobSpec,
    ) -> Result<JobHandle, PipelineError> {
        info!(
            cluster = %cluster.name,
            main_file = %spec.main_file_uri,
            args = ?spec.args,
            "Submitting job"
        );
        let result = with_deadline("job submit", self.timeout, self.service.submit(cluster, spec))
            .await
            .map_err(PipelineError::from)
            .and_then(|submitted| {
                submitted.context(SubmissionSnafu {
                    cluster: cluster.name.clone(),
                })
            });

        emit!(JobSubmitted {
            success: result.is_ok(),
        });

        match result {
            Ok(job_id) => {
                info!(cluster = %cluster.name, job_id = %job_id, "Job submitted");
                Ok(JobHandle {
                    job_id,
                    cluster_name: cluster.name.clone(),
                })
            }
            Err(e) => {
                error!(cluster = %cluster.name, error = %e, "Job submission failed");
                Err(e)
            }
        }
    }
}
