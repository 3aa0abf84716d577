//! Handles for long-running provider operations.

use std::fmt;

use futures::future::BoxFuture;

use crate::error::ServiceError;

/// A long-running operation started by a provider call.
///
/// Cluster create/delete and warehouse loads return immediately with one of
/// these; the caller decides how long to wait for it.
pub struct PendingOperation<T> {
    name: String,
    future: BoxFuture<'static, Result<T, ServiceError>>,
}

impl<T: Send + 'static> PendingOperation<T> {
    pub fn new(
        name: impl Into<String>,
        future: impl Future<Output = Result<T, ServiceError>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            future: Box::pin(future),
        }
    }

    /// An operation that has already reached its terminal state.
    pub fn ready(name: impl Into<String>, result: Result<T, ServiceError>) -> Self {
        Self::new(name, async move { result })
    }

    /// Provider-side name of the operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the operation reaches a terminal state.
    pub async fn wait(self) -> Result<T, ServiceError> {
        self.future.await
    }
}

impl<T> fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A failure injected into an in-memory service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    AlreadyExists,
    Provider(String),
    Transport(String),
    /// The operation never reaches a terminal state.
    Hang,
}

impl Fault {
    /// Turn the fault into the error it stands for.
    ///
    /// A [`Fault::Hang`] never resolves.
    pub(crate) async fn raise(self, resource: &str) -> ServiceError {
        match self {
            Fault::NotFound => ServiceError::NotFound {
                resource: resource.to_string(),
            },
            Fault::AlreadyExists => ServiceError::AlreadyExists {
                resource: resource.to_string(),
            },
            Fault::Provider(message) => ServiceError::Provider { message },
            Fault::Transport(message) => ServiceError::Transport { message },
            Fault::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_operation_resolves() {
        let op = PendingOperation::ready("op-1", Ok(42u64));
        assert_eq!(op.name(), "op-1");
        assert_eq!(op.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_deferred_operation_runs_on_wait() {
        let op: PendingOperation<()> = PendingOperation::new("op-2", async {
            Err(ServiceError::provider("quota exceeded"))
        });
        assert!(matches!(
            op.wait().await,
            Err(ServiceError::Provider { .. })
        ));
    }
}
