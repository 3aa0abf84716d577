//! squall-core: Shared components for the squall pipeline orchestrator.
//!
//! This crate contains the infrastructure the orchestrator is built on:
//!
//! - `storage/` - Object storage abstraction (GCS, local, in-memory)
//! - `metrics/` - Prometheus metrics infrastructure
//! - `config/` - Environment variable interpolation and shared config types
//! - `deadline` - Explicit timeouts for blocking waits
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Common error types

pub mod config;
pub mod deadline;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use config::{MetricsConfig, ServerConfig, interpolate, interpolate_with};
pub use deadline::{Elapsed, with_deadline};
pub use error::{ConfigError, MetricsError, StorageError};
pub use metrics::{MetricsController, init_global as init_metrics, init_test as init_metrics_test};
pub use signal::shutdown_signal;
pub use storage::{StorageProvider, StorageProviderRef};
pub use tracing::init_tracing;
