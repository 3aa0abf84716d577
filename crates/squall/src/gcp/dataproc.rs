//! Dataproc clusters and jobs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::GcpClient;
use crate::cluster::{ClusterDescriptor, ClusterInfo, ClusterService, ClusterSpec, NodeGroupSpec};
use crate::error::ServiceError;
use crate::job::{JobService, JobSpec};
use crate::operation::PendingOperation;

fn regional_base(cluster: &ClusterDescriptor) -> String {
    format!(
        "https://{region}-dataproc.googleapis.com/v1/projects/{project}/regions/{region}",
        region = cluster.region,
        project = cluster.project_id
    )
}

fn operations_base(cluster: &ClusterDescriptor) -> String {
    format!("https://{}-dataproc.googleapis.com/v1", cluster.region)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterRequest<'a> {
    project_id: &'a str,
    cluster_name: &'a str,
    config: ClusterConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfig<'a> {
    software_config: SoftwareConfig<'a>,
    master_config: InstanceGroupConfig<'a>,
    worker_config: InstanceGroupConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SoftwareConfig<'a> {
    image_version: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceGroupConfig<'a> {
    num_instances: u32,
    machine_type_uri: &'a str,
    disk_config: DiskConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiskConfig {
    boot_disk_size_gb: u32,
}

impl<'a> From<&'a NodeGroupSpec> for InstanceGroupConfig<'a> {
    fn from(group: &'a NodeGroupSpec) -> Self {
        Self {
            num_instances: group.instances,
            machine_type_uri: &group.machine_type,
            disk_config: DiskConfig {
                boot_disk_size_gb: group.boot_disk_size_gb,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterResource {
    cluster_name: String,
    #[serde(default)]
    status: Option<ClusterStatus>,
}

#[derive(Debug, Deserialize)]
struct ClusterStatus {
    #[serde(default)]
    state: String,
}

/// A long-running operation resource.
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Poll `operation` until it is done.
async fn wait_for(
    client: GcpClient,
    base: String,
    mut operation: Operation,
    resource: String,
) -> Result<(), ServiceError> {
    loop {
        if operation.done {
            return match operation.error {
                // gRPC NOT_FOUND and ALREADY_EXISTS codes.
                Some(error) if error.code == 5 => Err(ServiceError::NotFound { resource }),
                Some(error) if error.code == 6 => Err(ServiceError::AlreadyExists { resource }),
                Some(error) => Err(ServiceError::Provider {
                    message: format!("{} (code {})", error.message, error.code),
                }),
                None => Ok(()),
            };
        }
        tokio::time::sleep(client.poll_interval()).await;
        debug!(operation = %operation.name, "Polling operation");
        let url = format!("{base}/{}", operation.name);
        operation = client.get(&url, &resource).await?;
    }
}

/// Dataproc cluster controller.
#[derive(Debug, Clone)]
pub struct DataprocClusters {
    client: GcpClient,
}

impl DataprocClusters {
    pub fn new(client: GcpClient) -> Self {
        Self { client }
    }

    fn pending(&self, cluster: &ClusterDescriptor, operation: Operation) -> PendingOperation<()> {
        let name = operation.name.clone();
        PendingOperation::new(
            name,
            wait_for(
                self.client.clone(),
                operations_base(cluster),
                operation,
                cluster.resource(),
            ),
        )
    }
}

#[async_trait]
impl ClusterService for DataprocClusters {
    async fn get(&self, cluster: &ClusterDescriptor) -> Result<ClusterInfo, ServiceError> {
        let url = format!("{}/clusters/{}", regional_base(cluster), cluster.name);
        let resource: ClusterResource = self.client.get(&url, &cluster.resource()).await?;
        Ok(ClusterInfo {
            name: resource.cluster_name,
            status: resource.status.map(|s| s.state).unwrap_or_default(),
        })
    }

    async fn create(
        &self,
        cluster: &ClusterDescriptor,
        spec: &ClusterSpec,
    ) -> Result<PendingOperation<()>, ServiceError> {
        let url = format!("{}/clusters", regional_base(cluster));
        let body = ClusterRequest {
            project_id: &cluster.project_id,
            cluster_name: &cluster.name,
            config: ClusterConfig {
                software_config: SoftwareConfig {
                    image_version: &spec.image_version,
                },
                master_config: (&spec.coordinator).into(),
                worker_config: (&spec.workers).into(),
            },
        };
        let operation: Operation = self.client.post(&url, &body, &cluster.resource()).await?;
        Ok(self.pending(cluster, operation))
    }

    async fn delete(
        &self,
        cluster: &ClusterDescriptor,
    ) -> Result<PendingOperation<()>, ServiceError> {
        let url = format!("{}/clusters/{}", regional_base(cluster), cluster.name);
        let operation: Operation = self.client.delete(&url, &cluster.resource()).await?;
        Ok(self.pending(cluster, operation))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobRequest<'a> {
    job: JobResource<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobResource<'a> {
    placement: Placement<'a>,
    pyspark_job: PySparkJob<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Placement<'a> {
    cluster_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PySparkJob<'a> {
    main_python_file_uri: &'a str,
    args: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SubmittedJob {
    reference: JobReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

/// Dataproc job controller.
#[derive(Debug, Clone)]
pub struct DataprocJobs {
    client: GcpClient,
}

impl DataprocJobs {
    pub fn new(client: GcpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobService for DataprocJobs {
    async fn submit(
        &self,
        cluster: &ClusterDescriptor,
        spec: &JobSpec,
    ) -> Result<String, ServiceError> {
        let url = format!("{}/jobs:submit", regional_base(cluster));
        let body = SubmitJobRequest {
            job: JobResource {
                placement: Placement {
                    cluster_name: &spec.cluster_name,
                },
                pyspark_job: PySparkJob {
                    main_python_file_uri: &spec.main_file_uri,
                    args: &spec.args,
                },
            },
        };
        let job: SubmittedJob = self.client.post(&url, &body, &cluster.resource()).await?;
        Ok(job.reference.job_id)
    }
}
