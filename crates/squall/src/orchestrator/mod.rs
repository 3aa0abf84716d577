//! The two pipeline stages.
//!
//! `start` provisions the cluster and submits the job; `on_message` handles
//! the job's status envelope. Both are independent, stateless invocations:
//! everything they coordinate on lives in the external services or in the
//! message itself, so either may run any number of times.

pub mod state;

use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

use crate::cluster::{ClusterAction, ClusterDescriptor, ClusterManager, ClusterService, ClusterSpec};
use crate::config::PipelineConfig;
use crate::emit;
use crate::envelope::{Status, StatusEnvelope};
use crate::error::{ErrorSummary, PipelineError};
use crate::job::{JobHandle, JobService, JobSpec, JobSubmitter};
use crate::links;
use crate::locator::ArtifactLocator;
use crate::metrics::events::{EnvelopeReceived, EnvelopeRejected, StageCompleted};
use crate::warehouse::{LoadResult, WarehouseLoader, WarehouseService};
use squall_core::StorageProvider;

pub use state::{PipelineState, StateMachine};

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Services {
    pub clusters: Arc<dyn ClusterService>,
    pub jobs: Arc<dyn JobService>,
    pub warehouse: Arc<dyn WarehouseService>,
    /// Storage rooted at the bucket the job writes its result sets to.
    pub storage: StorageProvider,
}

/// Human-facing links for a Stage A run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Links {
    pub function_logs: String,
    /// Job monitoring page, or the cluster's job list if no job was submitted.
    pub job_logs: String,
}

/// Result of [`Orchestrator::start`].
#[derive(Debug, Serialize)]
pub struct StartOutcome {
    pub state: PipelineState,
    pub history: Vec<PipelineState>,
    pub cluster: Option<ClusterAction>,
    pub job: Option<JobHandle>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<PipelineError>,
    pub links: Links,
}

impl StartOutcome {
    /// Cluster present and job submitted.
    pub fn is_success(&self) -> bool {
        self.state == PipelineState::AwaitingCompletion
    }
}

/// Result of [`Orchestrator::on_message`].
#[derive(Debug, Serialize)]
pub struct MessageOutcome {
    pub state: PipelineState,
    pub history: Vec<PipelineState>,
    /// Status carried by the envelope, if it decoded.
    pub status: Option<Status>,
    pub loads: Vec<LoadResult>,
    pub cluster: Option<ClusterAction>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<PipelineError>,
}

impl MessageOutcome {
    /// The run reached `DONE`: tables attempted and cluster deleted.
    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Done
    }

    /// Every table loaded.
    pub fn all_loaded(&self) -> bool {
        !self.loads.is_empty() && self.loads.iter().all(LoadResult::is_success)
    }

    /// Tables whose load failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.loads
            .iter()
            .filter(|load| !load.is_success())
            .map(|load| load.table.as_str())
            .collect()
    }

    /// Whether the payload was dropped as malformed.
    pub fn is_dropped(&self) -> bool {
        matches!(self.error, Some(PipelineError::Decode { .. }))
    }

    /// Whether delivering the same message again could change the result.
    ///
    /// True when the stage error or any per-table load error is transient.
    /// Loads overwrite and deleting an absent cluster succeeds, so a retry
    /// is safe.
    pub fn should_redeliver(&self) -> bool {
        let transient = |e: &PipelineError| e.is_retryable();
        self.error.as_ref().is_some_and(transient)
            || self
                .loads
                .iter()
                .any(|load| load.outcome.as_ref().err().is_some_and(transient))
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<PipelineError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    error.as_ref().map(ErrorSummary::from).serialize(serializer)
}

/// Drives both pipeline stages.
pub struct Orchestrator {
    config: PipelineConfig,
    cluster: ClusterDescriptor,
    spec: ClusterSpec,
    clusters: ClusterManager,
    jobs: JobSubmitter,
    loader: WarehouseLoader,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, services: Services) -> Self {
        let timeouts = &config.timeouts;
        let clusters = ClusterManager::new(
            services.clusters,
            timeouts.cluster_create(),
            timeouts.cluster_delete(),
        );
        let jobs = JobSubmitter::new(services.jobs, timeouts.job_submit());
        let loader = WarehouseLoader::new(
            services.warehouse,
            ArtifactLocator::new(services.storage),
            &config.project_id,
            &config.dataset,
            timeouts.table_load(),
        )
        .with_concurrency(config.load_concurrency);

        Self {
            cluster: ClusterDescriptor::from_config(&config),
            spec: ClusterSpec::standard(),
            clusters,
            jobs,
            loader,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cluster(&self) -> &ClusterDescriptor {
        &self.cluster
    }

    /// Stage A: make sure the cluster exists, then submit the job.
    ///
    /// Returns as soon as the job is acknowledged. The job's status envelope
    /// drives the rest of the pipeline.
    pub async fn start(&self) -> StartOutcome {
        let mut machine = StateMachine::new(PipelineState::Idle);
        let mut outcome = StartOutcome {
            state: PipelineState::Idle,
            history: Vec::new(),
            cluster: None,
            job: None,
            error: None,
            links: Links {
                function_logs: links::function_logs_url(&self.config),
                job_logs: links::cluster_jobs_url(&self.config),
            },
        };

        info!(cluster = %self.cluster.name, project = %self.cluster.project_id, "Starting pipeline");
        machine.transition(PipelineState::ClusterEnsuring);
        match self.clusters.try_ensure_present(&self.cluster, &self.spec).await {
            Ok(action) => outcome.cluster = Some(action),
            Err(e) => {
                error!(cluster = %self.cluster.name, error = %e, "Cluster provisioning failed, no job submitted");
                outcome.error = Some(e);
                machine.fail();
                return finish_start(outcome, machine);
            }
        }

        machine.transition(PipelineState::JobSubmitting);
        match self
            .jobs
            .submit(&self.cluster, &JobSpec::for_pipeline(&self.config))
            .await
        {
            Ok(handle) => {
                outcome.links.job_logs = links::job_logs_url(&self.config, &handle);
                outcome.job = Some(handle);
                machine.transition(PipelineState::AwaitingCompletion);
            }
            Err(e) => {
                outcome.error = Some(e);
                machine.fail();
            }
        }

        finish_start(outcome, machine)
    }

    /// Stage B: handle one delivery of the job's status envelope.
    ///
    /// Malformed payloads are dropped. A FAILED envelope stops the run
    /// without loading or deleting the cluster. A SUCCESS envelope loads
    /// every table, then deletes the cluster whatever the per-table
    /// outcomes were.
    pub async fn on_message(&self, payload: &[u8]) -> MessageOutcome {
        let mut machine = StateMachine::new(PipelineState::AwaitingCompletion);
        let mut outcome = MessageOutcome {
            state: PipelineState::AwaitingCompletion,
            history: Vec::new(),
            status: None,
            loads: Vec::new(),
            cluster: None,
            error: None,
        };

        let envelope = match StatusEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Dropping malformed status envelope");
                emit!(EnvelopeRejected);
                outcome.error = Some(PipelineError::from(e));
                machine.fail();
                return finish_message(outcome, machine);
            }
        };

        machine.transition(PipelineState::MessageReceived);
        outcome.status = Some(envelope.status);
        emit!(EnvelopeReceived {
            status: envelope.status.as_str(),
        });
        info!(
            status = envelope.status.as_str(),
            tables = envelope.tables.len(),
            "Status envelope received"
        );

        if envelope.status == Status::Failed {
            error!(
                cluster = %self.cluster.name,
                resource = %self.cluster.resource(),
                "Job reported failure, skipping load; cluster left running for inspection"
            );
            machine.fail();
            return finish_message(outcome, machine);
        }

        machine.transition(PipelineState::Loading);
        match self.loader.load_all(&envelope.tables).await {
            Ok(loads) => outcome.loads = loads,
            Err(e) => {
                error!(error = %e, "Load stage rejected the batch");
                outcome.error = Some(e);
                machine.fail();
                return finish_message(outcome, machine);
            }
        }

        machine.transition(PipelineState::CleaningUp);
        match self.clusters.try_delete(&self.cluster).await {
            Ok(action) => {
                outcome.cluster = Some(action);
                machine.transition(PipelineState::Done);
            }
            Err(e) => {
                error!(
                    cluster = %self.cluster.name,
                    resource = %self.cluster.resource(),
                    error = %e,
                    "Cluster deletion failed, cluster left running"
                );
                outcome.error = Some(e);
                machine.fail();
            }
        }

        finish_message(outcome, machine)
    }
}

fn finish_start(mut outcome: StartOutcome, machine: StateMachine) -> StartOutcome {
    outcome.state = machine.current();
    outcome.history = machine.history().to_vec();
    emit!(StageCompleted {
        stage: "start",
        state: outcome.state.as_str(),
    });
    info!(state = %outcome.state, "Stage A finished");
    outcome
}

fn finish_message(mut outcome: MessageOutcome, machine: StateMachine) -> MessageOutcome {
    outcome.state = machine.current();
    outcome.history = machine.history().to_vec();
    emit!(StageCompleted {
        stage: "on_message",
        state: outcome.state.as_str(),
    });
    info!(state = %outcome.state, "Stage B finished");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryClusterService;
    use crate::envelope::{Column, TableDescriptor};
    use crate::job::InMemoryJobService;
    use crate::metrics::events::ClusterOperation;
    use crate::operation::Fault;
    use crate::warehouse::InMemoryWarehouse;

    struct Harness {
        clusters: Arc<InMemoryClusterService>,
        jobs: Arc<InMemoryJobService>,
        warehouse: Arc<InMemoryWarehouse>,
        storage: StorageProvider,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        let config = PipelineConfig::parse(
            "project_id: tarrieu\nregion: europe-west1\njob_bucket: jobs\njob_file: job.py\n\
             data_bucket: data\ndata_file: crimes.csv\ndataset: crimes\n",
        )
        .unwrap();
        let clusters = Arc::new(InMemoryClusterService::new());
        let jobs = Arc::new(InMemoryJobService::new());
        let warehouse = Arc::new(InMemoryWarehouse::new());
        let storage = StorageProvider::in_memory("data");
        let orchestrator = Orchestrator::new(
            config,
            Services {
                clusters: clusters.clone(),
                jobs: jobs.clone(),
                warehouse: warehouse.clone(),
                storage: storage.clone(),
            },
        );
        Harness {
            clusters,
            jobs,
            warehouse,
            storage,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_start_reaches_awaiting_completion() {
        let h = harness();
        let outcome = h.orchestrator.start().await;

        assert!(outcome.is_success());
        assert_eq!(
            outcome.history,
            vec![
                PipelineState::Idle,
                PipelineState::ClusterEnsuring,
                PipelineState::JobSubmitting,
                PipelineState::AwaitingCompletion,
            ]
        );
        assert_eq!(outcome.cluster, Some(ClusterAction::Created));
        let job = outcome.job.as_ref().unwrap();
        assert!(outcome.links.job_logs.contains(&job.job_id));
    }

    #[tokio::test]
    async fn test_start_fails_fast_on_provisioning_error() {
        let h = harness();
        h.clusters
            .inject(ClusterOperation::Create, Fault::Provider("quota".into()));

        let outcome = h.orchestrator.start().await;

        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(outcome.error, Some(PipelineError::Provisioning { .. })));
        assert!(h.jobs.submissions().is_empty());
        assert!(outcome.links.job_logs.contains("/clusters/dataproc-cluster/jobs"));
    }

    #[tokio::test]
    async fn test_start_submission_failure() {
        let h = harness();
        h.jobs.inject(Fault::Provider("bad request".into()));

        let outcome = h.orchestrator.start().await;

        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(outcome.error, Some(PipelineError::Submission { .. })));
        assert_eq!(h.clusters.cluster_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_dropped_without_side_effects() {
        let h = harness();
        h.clusters.seed(h.orchestrator.cluster());

        let outcome = h.orchestrator.on_message(b"{'status': 'SUCCESS'}").await;

        assert!(outcome.is_dropped());
        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(h.warehouse.requests().is_empty());
        assert_eq!(h.clusters.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_envelope_leaves_cluster() {
        let h = harness();
        h.clusters.seed(h.orchestrator.cluster());

        let outcome = h
            .orchestrator
            .on_message(br#"{"status":"FAILED","tables":[]}"#)
            .await;

        assert_eq!(outcome.status, Some(Status::Failed));
        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(outcome.error.is_none());
        assert!(h.warehouse.requests().is_empty());
        assert_eq!(h.clusters.delete_calls(), 0);
        assert_eq!(h.clusters.cluster_count(), 1);
    }

    #[tokio::test]
    async fn test_success_envelope_loads_then_deletes() {
        let h = harness();
        h.clusters.seed(h.orchestrator.cluster());
        h.storage.put("t1/part-00000.parquet", "x").await.unwrap();
        h.storage.put("t1/_SUCCESS", "").await.unwrap();

        let outcome = h
            .orchestrator
            .on_message(
                br#"{"status":"SUCCESS","tables":[{"table_name":"t1","columns":{"names":["a"],"types":["INT"]}}]}"#,
            )
            .await;

        assert!(outcome.is_success());
        assert!(outcome.all_loaded());
        assert_eq!(outcome.cluster, Some(ClusterAction::Deleted));
        assert_eq!(h.clusters.cluster_count(), 0);
        assert_eq!(
            outcome.history.last(),
            Some(&PipelineState::Done)
        );

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["state"], "DONE");
        assert_eq!(json["loads"][0]["destination"], "tarrieu.crimes.t1");
        assert_eq!(json["loads"][0]["rows"], 1000);
    }

    #[tokio::test]
    async fn test_delete_failure_after_load_is_failed() {
        let h = harness();
        h.clusters.seed(h.orchestrator.cluster());
        h.clusters
            .inject(ClusterOperation::Delete, Fault::Provider("permission denied".into()));
        h.storage.put("t1/part-00000.parquet", "x").await.unwrap();
        h.storage.put("t1/_SUCCESS", "").await.unwrap();

        let outcome = h
            .orchestrator
            .on_message(
                br#"{"status":"SUCCESS","tables":[{"table_name":"t1","columns":{"names":["a"],"types":["INT"]}}]}"#,
            )
            .await;

        assert!(outcome.all_loaded());
        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(outcome.error, Some(PipelineError::Provisioning { .. })));
        assert!(!outcome.should_redeliver());
    }

    #[tokio::test]
    async fn test_transient_load_failure_asks_for_redelivery() {
        let h = harness();
        h.clusters.seed(h.orchestrator.cluster());
        h.warehouse.fail_table("t1", Fault::Transport("503".into()));
        h.warehouse.fail_table("t2", Fault::Provider("Not found: Dataset".into()));
        for name in ["t1", "t2"] {
            h.storage.put(format!("{name}/part-00000.parquet"), "x").await.unwrap();
            h.storage.put(format!("{name}/_SUCCESS"), "").await.unwrap();
        }

        let payload = StatusEnvelope::success(vec![
            TableDescriptor::new("t1", vec![Column::new("a", "INT")]),
            TableDescriptor::new("t2", vec![Column::new("a", "INT")]),
        ])
        .encode()
        .unwrap();
        let outcome = h.orchestrator.on_message(&payload).await;

        assert!(outcome.is_success());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.failed_tables(), vec!["t1", "t2"]);
        assert!(outcome.should_redeliver());
    }

    #[tokio::test]
    async fn test_permanent_load_failure_is_not_redelivered() {
        let h = harness();
        h.clusters.seed(h.orchestrator.cluster());

        let outcome = h
            .orchestrator
            .on_message(
                br#"{"status":"SUCCESS","tables":[{"table_name":"t1","columns":{"names":["a"],"types":["INT"]}}]}"#,
            )
            .await;

        assert!(matches!(
            outcome.loads[0].outcome,
            Err(PipelineError::ArtifactNotFound { .. })
        ));
        assert!(!outcome.should_redeliver());
    }
}
