//! squall: orchestrator for an ephemeral-cluster batch pipeline.
//!
//! This crate handles:
//! - Stage A: ensuring a compute cluster exists and submitting a batch job to it
//! - Stage B: decoding the job's status envelope, loading its result sets into
//!   the warehouse with overwrite semantics, and deleting the cluster
//! - In-memory and Google Cloud implementations of every external service

pub mod bus;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod envelope;
pub mod error;
#[cfg(feature = "gcp")]
pub mod gcp;
pub mod job;
pub mod links;
pub mod locator;
pub mod metrics;
pub mod operation;
pub mod orchestrator;
pub mod server;
pub mod warehouse;

// Re-export commonly used items
pub use cli::CliArgs;
pub use cluster::{ClusterDescriptor, ClusterManager, ClusterService, ClusterSpec, ClusterState};
pub use config::PipelineConfig;
pub use envelope::{Column, Status, StatusEnvelope, TableDescriptor};
pub use error::{DecodeError, PipelineError, ServiceError};
pub use job::{JobHandle, JobService, JobSpec, JobSubmitter};
pub use locator::ArtifactLocator;
pub use operation::PendingOperation;
pub use orchestrator::{MessageOutcome, Orchestrator, PipelineState, Services, StartOutcome};
pub use warehouse::{LoadResult, WarehouseLoader, WarehouseService};

// Re-export from squall-core
pub use squall_core::{StorageProvider, init_metrics, init_tracing, shutdown_signal};
