//! Explicit deadlines for blocking waits.
//!
//! Every long-running provider operation (cluster create/delete, job
//! submission, warehouse load) is awaited through [`with_deadline`] so a
//! stuck operation surfaces as a distinct timeout instead of hanging the
//! handler.

use std::future::Future;
use std::time::Duration;

use snafu::Snafu;
use tracing::warn;

/// A blocking wait exceeded its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("{operation} did not complete within {}s", after.as_secs_f64()))]
pub struct Elapsed {
    /// Name of the operation that timed out (e.g. "cluster create").
    pub operation: String,
    /// The deadline that was exceeded.
    pub after: Duration,
}

/// Await `fut` for at most `after`.
///
/// Returns the future's output, or [`Elapsed`] if the deadline passed first.
/// The inner future is dropped on timeout.
pub async fn with_deadline<F>(
    operation: impl Into<String>,
    after: Duration,
    fut: F,
) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    match tokio::time::timeout(after, fut).await {
        Ok(output) => Ok(output),
        Err(_) => {
            let operation = operation.into();
            warn!(operation = %operation, deadline_secs = after.as_secs_f64(), "Deadline exceeded");
            Err(Elapsed { operation, after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_before_deadline() {
        let result = with_deadline("quick", Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_carries_operation_and_deadline() {
        let result = with_deadline(
            "cluster create",
            Duration::from_secs(5),
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.operation, "cluster create");
        assert_eq!(err.after, Duration::from_secs(5));
        assert!(err.to_string().contains("cluster create"));
    }
}
