//! Internal events for squall metrics emission.
//!
//! Each event struct represents a measurable occurrence in one of the two
//! pipeline stages. Events implement the `InternalEvent` trait which emits
//! the corresponding Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

pub use squall_core::metrics::events::InternalEvent;

// ============================================================================
// Cluster events
// ============================================================================

/// Cluster lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOperation {
    Check,
    Create,
    Delete,
}

impl ClusterOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterOperation::Check => "check",
            ClusterOperation::Create => "create",
            ClusterOperation::Delete => "delete",
        }
    }
}

/// Event emitted when a cluster operation reaches a terminal state.
pub struct ClusterOperationCompleted {
    pub operation: ClusterOperation,
    /// "success", "noop", "error" or "timeout".
    pub outcome: &'static str,
}

impl InternalEvent for ClusterOperationCompleted {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            outcome = self.outcome,
            "Cluster operation completed"
        );
        counter!(
            "squall_cluster_operations_total",
            "operation" => self.operation.as_str(),
            "outcome" => self.outcome
        )
        .increment(1);
    }
}

/// Event emitted to record how long a cluster operation took.
pub struct ClusterOperationDuration {
    pub operation: ClusterOperation,
    pub duration: Duration,
}

impl InternalEvent for ClusterOperationDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Cluster operation duration"
        );
        histogram!(
            "squall_cluster_operation_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Job events
// ============================================================================

/// Event emitted when a job submission completes.
pub struct JobSubmitted {
    pub success: bool,
}

impl InternalEvent for JobSubmitted {
    fn emit(self) {
        let status = if self.success { "success" } else { "error" };
        trace!(status, "Job submitted");
        counter!("squall_job_submissions_total", "status" => status).increment(1);
    }
}

// ============================================================================
// Envelope events
// ============================================================================

/// Event emitted when a status envelope is decoded.
pub struct EnvelopeReceived {
    pub status: &'static str,
}

impl InternalEvent for EnvelopeReceived {
    fn emit(self) {
        trace!(status = self.status, "Envelope received");
        counter!("squall_envelopes_received_total", "status" => self.status).increment(1);
    }
}

/// Event emitted when a payload fails to decode and is dropped.
pub struct EnvelopeRejected;

impl InternalEvent for EnvelopeRejected {
    fn emit(self) {
        trace!("Envelope rejected");
        counter!("squall_envelopes_rejected_total").increment(1);
    }
}

// ============================================================================
// Load events
// ============================================================================

/// Event emitted when a table load succeeds.
pub struct TableLoaded {
    pub table: String,
    pub rows: u64,
    pub duration: Duration,
}

impl InternalEvent for TableLoaded {
    fn emit(self) {
        trace!(
            table = %self.table,
            rows = self.rows,
            duration_ms = self.duration.as_millis(),
            "Table loaded"
        );
        counter!("squall_rows_loaded_total", "table" => self.table.clone()).increment(self.rows);
        histogram!("squall_table_load_duration_seconds", "table" => self.table)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a table load fails.
pub struct TableLoadFailed {
    pub table: String,
    /// Error kind label.
    pub kind: &'static str,
}

impl InternalEvent for TableLoadFailed {
    fn emit(self) {
        trace!(table = %self.table, kind = self.kind, "Table load failed");
        counter!(
            "squall_table_load_failures_total",
            "table" => self.table,
            "kind" => self.kind
        )
        .increment(1);
    }
}

// ============================================================================
// Stage events
// ============================================================================

/// Event emitted when a stage handler returns.
pub struct StageCompleted {
    /// "start" or "on_message".
    pub stage: &'static str,
    /// Terminal state name.
    pub state: &'static str,
}

impl InternalEvent for StageCompleted {
    fn emit(self) {
        trace!(stage = self.stage, state = self.state, "Stage completed");
        counter!(
            "squall_stage_completions_total",
            "stage" => self.stage,
            "state" => self.state
        )
        .increment(1);
    }
}
