//! BigQuery load jobs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::GcpClient;
use crate::error::ServiceError;
use crate::operation::PendingOperation;
use crate::warehouse::{LoadRequest, WarehouseService};

const API: &str = "https://bigquery.googleapis.com/bigquery/v2";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertJob<'a> {
    job_reference: InsertReference<'a>,
    configuration: JobConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertReference<'a> {
    project_id: &'a str,
    job_id: String,
}

#[derive(Debug, Serialize)]
struct JobConfiguration<'a> {
    load: LoadConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration<'a> {
    source_uris: Vec<&'a str>,
    destination_table: TableReference<'a>,
    write_disposition: &'static str,
    source_format: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    /// int64 values are encoded as strings.
    #[serde(default)]
    output_rows: Option<String>,
}

impl Job {
    fn output_rows(&self) -> u64 {
        self.statistics
            .as_ref()
            .and_then(|s| s.load.as_ref())
            .and_then(|l| l.output_rows.as_deref())
            .and_then(|rows| rows.parse().ok())
            .unwrap_or_default()
    }
}

/// `jobs.get` URL for a job, with every component percent-encoded.
fn job_url(project: &str, reference: &JobReference) -> Result<String, ServiceError> {
    let mut url = reqwest::Url::parse(API).map_err(|e| ServiceError::provider(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| ServiceError::provider(format!("{API} cannot carry a path")))?
        .extend(["projects", project, "jobs", reference.job_id.as_str()]);
    if let Some(location) = &reference.location {
        url.query_pairs_mut().append_pair("location", location);
    }
    Ok(url.to_string())
}

async fn wait_for(
    client: GcpClient,
    project: String,
    mut job: Job,
    resource: String,
) -> Result<u64, ServiceError> {
    loop {
        if job.status.state == "DONE" {
            return match job.status.error_result {
                Some(error) => Err(ServiceError::Provider {
                    message: format!("{} ({})", error.message, error.reason),
                }),
                None => Ok(job.output_rows()),
            };
        }
        tokio::time::sleep(client.poll_interval()).await;
        debug!(job_id = %job.job_reference.job_id, state = %job.status.state, "Polling load job");
        let url = job_url(&project, &job.job_reference)?;
        job = client.get(&url, &resource).await?;
    }
}

/// BigQuery load-job warehouse.
#[derive(Debug, Clone)]
pub struct BigQueryWarehouse {
    client: GcpClient,
}

impl BigQueryWarehouse {
    pub fn new(client: GcpClient) -> Self {
        Self { client }
    }
}

fn insert_body(request: &LoadRequest, job_id: String) -> InsertJob<'_> {
    let destination = &request.destination;
    InsertJob {
        job_reference: InsertReference {
            project_id: &destination.project,
            job_id,
        },
        configuration: JobConfiguration {
            load: LoadConfiguration {
                source_uris: vec![request.source_uri.as_str()],
                destination_table: TableReference {
                    project_id: &destination.project,
                    dataset_id: &destination.dataset,
                    table_id: &destination.table,
                },
                write_disposition: request.write_mode.as_str(),
                source_format: request.format.as_str(),
            },
        },
    }
}

#[async_trait]
impl WarehouseService for BigQueryWarehouse {
    async fn load(&self, request: &LoadRequest) -> Result<PendingOperation<u64>, ServiceError> {
        let project = request.destination.project.clone();
        let resource = request.destination.to_string();
        let job_id = format!("squall_load_{}", ulid::Ulid::new());
        let url = format!("{API}/projects/{project}/jobs");

        let job: Job = self
            .client
            .post(&url, &insert_body(request, job_id), &resource)
            .await?;
        let name = job.job_reference.job_id.clone();
        Ok(PendingOperation::new(
            name,
            wait_for(self.client.clone(), project, job, resource),
        ))
    }
}
