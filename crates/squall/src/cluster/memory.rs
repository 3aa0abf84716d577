//! In-memory cluster service.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ClusterDescriptor, ClusterInfo, ClusterService, ClusterSpec};
use crate::error::ServiceError;
use crate::metrics::events::ClusterOperation;
use crate::operation::{Fault, PendingOperation};

#[derive(Default)]
struct State {
    clusters: HashMap<ClusterDescriptor, ClusterSpec>,
    faults: HashMap<ClusterOperation, Fault>,
    creates: usize,
    deletes: usize,
}

/// Cluster service backed by a map, with call counting and fault injection.
///
/// Creating an existing cluster fails with "already exists" and deleting
/// an absent one with "not found", like a real provider.
#[derive(Default)]
pub struct InMemoryClusterService {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryClusterService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make create and delete operations take `latency` to complete.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Register an existing cluster.
    pub fn seed(&self, cluster: &ClusterDescriptor) {
        self.lock()
            .clusters
            .insert(cluster.clone(), ClusterSpec::standard());
    }

    /// Make every subsequent `operation` fail with `fault`.
    pub fn inject(&self, operation: ClusterOperation, fault: Fault) {
        self.lock().faults.insert(operation, fault);
    }

    /// Remove an injected fault.
    pub fn clear(&self, operation: ClusterOperation) {
        self.lock().faults.remove(&operation);
    }

    /// Number of create calls received.
    pub fn create_calls(&self) -> usize {
        self.lock().creates
    }

    /// Number of delete calls received.
    pub fn delete_calls(&self) -> usize {
        self.lock().deletes
    }

    /// Number of clusters currently present.
    pub fn cluster_count(&self) -> usize {
        self.lock().clusters.len()
    }

    /// Spec a present cluster was created with.
    pub fn spec_of(&self, cluster: &ClusterDescriptor) -> Option<ClusterSpec> {
        self.lock().clusters.get(cluster).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ClusterService for InMemoryClusterService {
    async fn get(&self, cluster: &ClusterDescriptor) -> Result<ClusterInfo, ServiceError> {
        let fault = self.lock().faults.get(&ClusterOperation::Check).cloned();
        if let Some(fault) = fault {
            return Err(fault.raise(&cluster.resource()).await);
        }

        if self.lock().clusters.contains_key(cluster) {
            Ok(ClusterInfo {
                name: cluster.name.clone(),
                status: "RUNNING".to_string(),
            })
        } else {
            Err(ServiceError::NotFound {
                resource: cluster.resource(),
            })
        }
    }

    async fn create(
        &self,
        cluster: &ClusterDescriptor,
        spec: &ClusterSpec,
    ) -> Result<PendingOperation<()>, ServiceError> {
        let resource = cluster.resource();
        let fault = {
            let mut state = self.lock();
            state.creates += 1;
            state.faults.get(&ClusterOperation::Create).cloned()
        };
        let name = format!("{resource}/operations/create-{}", ulid::Ulid::new());
        if let Some(fault) = fault {
            let error = fault.raise(&resource).await;
            return Ok(PendingOperation::ready(name, Err(error)));
        }

        self.delay().await;
        let mut state = self.lock();
        if state.clusters.contains_key(cluster) {
            return Err(ServiceError::AlreadyExists { resource });
        }
        state.clusters.insert(cluster.clone(), spec.clone());
        Ok(PendingOperation::ready(name, Ok(())))
    }

    async fn delete(
        &self,
        cluster: &ClusterDescriptor,
    ) -> Result<PendingOperation<()>, ServiceError> {
        let resource = cluster.resource();
        let fault = {
            let mut state = self.lock();
            state.deletes += 1;
            state.faults.get(&ClusterOperation::Delete).cloned()
        };
        let name = format!("{resource}/operations/delete-{}", ulid::Ulid::new());
        if let Some(fault) = fault {
            let error = fault.raise(&resource).await;
            return Ok(PendingOperation::ready(name, Err(error)));
        }

        self.delay().await;
        match self.lock().clusters.remove(cluster) {
            Some(_) => Ok(PendingOperation::ready(name, Ok(()))),
            None => Err(ServiceError::NotFound { resource }),
        }
    }
}
