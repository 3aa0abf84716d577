//! In-memory job service.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{JobService, JobSpec};
use crate::cluster::ClusterDescriptor;
use crate::error::ServiceError;
use crate::operation::Fault;

/// A job recorded by [`InMemoryJobService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    pub cluster: ClusterDescriptor,
    pub spec: JobSpec,
}

/// Job service that records submissions and assigns ULID job ids.
#[derive(Default)]
pub struct InMemoryJobService {
    submissions: Mutex<Vec<Submission>>,
    fault: Mutex<Option<Fault>>,
}

impl InMemoryJobService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent submission fail with `fault`.
    pub fn inject(&self, fault: Fault) {
        *self.fault.lock().unwrap_or_else(|p| p.into_inner()) = Some(fault);
    }

    /// Submissions received so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl JobService for InMemoryJobService {
    async fn submit(
        &self,
        cluster: &ClusterDescriptor,
        spec: &JobSpec,
    ) -> Result<String, ServiceError> {
        let fault = self.fault.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(fault) = fault {
            return Err(fault.raise(&cluster.resource()).await);
        }

        let job_id = ulid::Ulid::new().to_string().to_lowercase();
        self.submissions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Submission {
                job_id: job_id.clone(),
                cluster: cluster.clone(),
                spec: spec.clone(),
            });
        Ok(job_id)
    }
}
