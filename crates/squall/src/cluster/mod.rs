//! Ephemeral compute cluster lifecycle.
//!
//! The [`ClusterManager`] creates, checks and deletes the single named
//! cluster the pipeline runs on. Creation is always preceded by an
//! existence check, and both create and delete block until the provider
//! operation reaches a terminal state or its deadline passes.

pub mod memory;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::emit;
use crate::error::{PipelineError, ProvisioningSnafu, ServiceError};
use crate::metrics::events::{ClusterOperation, ClusterOperationCompleted, ClusterOperationDuration};
use crate::operation::PendingOperation;
use squall_core::with_deadline;

pub use memory::InMemoryClusterService;

/// Disk image every cluster is created from.
pub const IMAGE_VERSION: &str = "2.1.33-debian11";
/// Machine class for coordinator and worker nodes.
pub const MACHINE_TYPE: &str = "n1-standard-4";
/// Boot disk size of every node.
pub const BOOT_DISK_SIZE_GB: u32 = 40;
/// Number of coordinator nodes.
pub const COORDINATOR_COUNT: u32 = 1;
/// Number of worker nodes.
pub const WORKER_COUNT: u32 = 2;

/// Identity of the ephemeral cluster: a name scoped to one project and region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClusterDescriptor {
    pub name: String,
    pub project_id: String,
    pub region: String,
}

impl ClusterDescriptor {
    pub fn new(
        name: impl Into<String>,
        project_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            project_id: project_id.into(),
            region: region.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.cluster_name, &config.project_id, &config.region)
    }

    /// Fully qualified resource name, used in logs and errors.
    pub fn resource(&self) -> String {
        format!(
            "projects/{}/regions/{}/clusters/{}",
            self.project_id, self.region, self.name
        )
    }
}

/// Logical state of the cluster. Intermediate provider states are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Absent,
    Present,
}

/// Provider view of an existing cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    /// Provider status string (e.g. "RUNNING").
    pub status: String,
}

/// Resources of one group of identical nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeGroupSpec {
    pub instances: u32,
    pub machine_type: String,
    pub boot_disk_size_gb: u32,
}

/// Resource template a cluster is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSpec {
    pub image_version: String,
    pub coordinator: NodeGroupSpec,
    pub workers: NodeGroupSpec,
}

impl ClusterSpec {
    /// The pipeline-wide template: one coordinator and two workers.
    pub fn standard() -> Self {
        let group = |instances| NodeGroupSpec {
            instances,
            machine_type: MACHINE_TYPE.to_string(),
            boot_disk_size_gb: BOOT_DISK_SIZE_GB,
        };
        Self {
            image_version: IMAGE_VERSION.to_string(),
            coordinator: group(COORDINATOR_COUNT),
            workers: group(WORKER_COUNT),
        }
    }
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self::standard()
    }
}

/// Black-box compute cluster service.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Look up a cluster. Returns [`ServiceError::NotFound`] if absent.
    async fn get(&self, cluster: &ClusterDescriptor) -> Result<ClusterInfo, ServiceError>;

    /// Start creating a cluster.
    async fn create(
        &self,
        cluster: &ClusterDescriptor,
        spec: &ClusterSpec,
    ) -> Result<PendingOperation<()>, ServiceError>;

    /// Start deleting a cluster.
    async fn delete(&self, cluster: &ClusterDescriptor)
    -> Result<PendingOperation<()>, ServiceError>;
}

/// What a successful lifecycle call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterAction {
    Created,
    AlreadyPresent,
    Deleted,
    AlreadyAbsent,
}

/// Creates, checks and deletes the ephemeral cluster.
pub struct ClusterManager {
    service: Arc<dyn ClusterService>,
    create_timeout: Duration,
    delete_timeout: Duration,
}

impl ClusterManager {
    pub fn new(
        service: Arc<dyn ClusterService>,
        create_timeout: Duration,
        delete_timeout: Duration,
    ) -> Self {
        Self {
            service,
            create_timeout,
            delete_timeout,
        }
    }

    /// Current logical state of the cluster.
    ///
    /// Errors other than "not found" are reported as [`ClusterState::Absent`]
    /// with a warning, so the caller re-attempts creation instead of
    /// blocking on an unknown state.
    pub async fn state(&self, cluster: &ClusterDescriptor) -> ClusterState {
        let state = match self.service.get(cluster).await {
            Ok(info) => {
                debug!(cluster = %cluster.name, status = %info.status, "Cluster found");
                ClusterState::Present
            }
            Err(e) if e.is_not_found() => {
                debug!(cluster = %cluster.name, "Cluster not found");
                ClusterState::Absent
            }
            Err(e) => {
                warn!(
                    cluster = %cluster.name,
                    error = %e,
                    "Cluster existence check failed, treating as absent"
                );
                ClusterState::Absent
            }
        };
        let outcome = match state {
            ClusterState::Present => "present",
            ClusterState::Absent => "absent",
        };
        emit!(ClusterOperationCompleted {
            operation: ClusterOperation::Check,
            outcome,
        });
        state
    }

    /// Whether the cluster exists.
    pub async fn exists(&self, cluster: &ClusterDescriptor) -> bool {
        self.state(cluster).await == ClusterState::Present
    }

    /// Make sure the cluster exists, creating it from `spec` if needed.
    ///
    /// Returns false on any creation failure; the caller must not submit a
    /// job in that case.
    pub async fn ensure_present(&self, cluster: &ClusterDescriptor, spec: &ClusterSpec) -> bool {
        match self.try_ensure_present(cluster, spec).await {
            Ok(_) => true,
            Err(e) => {
                error!(cluster = %cluster.name, error = %e, "Failed to ensure cluster is present");
                false
            }
        }
    }

    /// Make sure the cluster exists, reporting what was done.
    ///
    /// A provider "already exists" answer to the create call counts as
    /// success: a concurrent trigger won the race and the cluster is there.
    pub async fn try_ensure_present(
        &self,
        cluster: &ClusterDescriptor,
        spec: &ClusterSpec,
    ) -> Result<ClusterAction, PipelineError> {
        if self.exists(cluster).await {
            info!(cluster = %cluster.name, "Cluster already exists, skipping creation");
            return Ok(ClusterAction::AlreadyPresent);
        }

        info!(
            cluster = %cluster.name,
            workers = spec.workers.instances,
            machine_type = %spec.workers.machine_type,
            "Creating cluster"
        );
        let start = Instant::now();
        let result = with_deadline("cluster create", self.create_timeout, async {
            let operation = self.service.create(cluster, spec).await?;
            debug!(cluster = %cluster.name, operation = operation.name(), "Waiting for cluster creation");
            operation.wait().await
        })
        .await;
        self.record(ClusterOperation::Create, start, &result);

        match result? {
            Ok(()) => {
                info!(cluster = %cluster.name, elapsed_secs = start.elapsed().as_secs(), "Cluster created");
                Ok(ClusterAction::Created)
            }
            Err(e) if e.is_already_exists() => {
                info!(cluster = %cluster.name, "Cluster was created concurrently, reusing it");
                Ok(ClusterAction::AlreadyPresent)
            }
            Err(e) => Err(e).context(ProvisioningSnafu {
                cluster: cluster.name.clone(),
                operation: "create",
            }),
        }
    }

    /// Delete the cluster.
    ///
    /// Returns false on failure without retrying. A failed deletion leaves a
    /// dangling cluster and is logged at error level.
    pub async fn delete(&self, cluster: &ClusterDescriptor) -> bool {
        match self.try_delete(cluster).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    cluster = %cluster.name,
                    resource = %cluster.resource(),
                    error = %e,
                    "Cluster deletion failed, cluster left running"
                );
                false
            }
        }
    }

    /// Delete the cluster, reporting what was done.
    ///
    /// Deleting an absent cluster is a success.
    pub async fn try_delete(
        &self,
        cluster: &ClusterDescriptor,
    ) -> Result<ClusterAction, PipelineError> {
        info!(cluster = %cluster.name, "Deleting cluster");
        let start = Instant::now();
        let result = with_deadline("cluster delete", self.delete_timeout, async {
            let operation = self.service.delete(cluster).await?;
            debug!(cluster = %cluster.name, operation = operation.name(), "Waiting for cluster deletion");
            operation.wait().await
        })
        .await;
        self.record(ClusterOperation::Delete, start, &result);

        match result? {
            Ok(()) => {
                info!(cluster = %cluster.name, "Cluster deleted");
                Ok(ClusterAction::Deleted)
            }
            Err(e) if e.is_not_found() => {
                info!(cluster = %cluster.name, "Cluster already absent");
                Ok(ClusterAction::AlreadyAbsent)
            }
            Err(e) => Err(e).context(ProvisioningSnafu {
                cluster: cluster.name.clone(),
                operation: "delete",
            }),
        }
    }

    fn record<E>(
        &self,
        operation: ClusterOperation,
        start: Instant,
        result: &Result<Result<(), ServiceError>, E>,
    ) {
        let outcome = match result {
            Ok(Ok(())) => "success",
            Ok(Err(e)) if e.is_already_exists() || e.is_not_found() => "noop",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        emit!(ClusterOperationCompleted { operation, outcome });
        emit!(ClusterOperationDuration {
            operation,
            duration: start.elapsed(),
        });
    }
}
