//! Console links for humans following a pipeline run.

use crate::config::PipelineConfig;
use crate::job::JobHandle;

const CONSOLE: &str = "https://console.cloud.google.com";

/// Monitoring page of a submitted job.
pub fn job_logs_url(config: &PipelineConfig, job: &JobHandle) -> String {
    format!(
        "{CONSOLE}/dataproc/jobs/{}/monitoring?region={}&project={}",
        job.job_id, config.region, config.project_id
    )
}

/// Job list of the pipeline's cluster.
pub fn cluster_jobs_url(config: &PipelineConfig) -> String {
    format!(
        "{CONSOLE}/dataproc/clusters/{}/jobs?region={}&project={}",
        config.cluster_name, config.region, config.project_id
    )
}

/// Logs of the trigger function.
pub fn function_logs_url(config: &PipelineConfig) -> String {
    format!(
        "{CONSOLE}/functions/details/{}/{}?project={}&tab=logs",
        config.region, config.function_name, config.project_id
    )
}
