//! Google Cloud adapters for the service traits.
//!
//! Every adapter talks to the public REST API through a shared [`GcpClient`]
//! that handles bearer tokens, error mapping and long-running operation
//! polling.
//!
//! This module is only compiled when the `gcp` feature is enabled.

mod bigquery;
mod dataproc;
mod pubsub;

pub use bigquery::BigQueryWarehouse;
pub use dataproc::{DataprocClusters, DataprocJobs};
pub use pubsub::PubSubBus;

use std::sync::Arc;
use std::time::Duration;

use gcp_auth::TokenProvider;
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::orchestrator::Services;
use squall_core::StorageProvider;

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Google API error response.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Authenticated REST client shared by the adapters.
#[derive(Clone)]
pub struct GcpClient {
    token_provider: Arc<dyn TokenProvider>,
    http: reqwest::Client,
    poll_interval: Duration,
}

impl std::fmt::Debug for GcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpClient")
            .field("token_provider", &"<TokenProvider>")
            .field("http", &self.http)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl GcpClient {
    /// Discover credentials from the environment and build a client.
    pub async fn new(poll_interval: Duration) -> Result<Self, ServiceError> {
        let token_provider = gcp_auth::provider().await.map_err(|e| ServiceError::Auth {
            message: format!("Failed to initialize GCP auth: {e}"),
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ServiceError::Transport {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            token_provider,
            http,
            poll_interval,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let token = self
            .token_provider
            .token(SCOPES)
            .await
            .map_err(|e| ServiceError::Auth {
                message: format!("Failed to get GCP access token: {e}"),
            })?;
        Ok(token.as_str().to_string())
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
    ) -> Result<T, ServiceError> {
        self.send(self.http.get(url), resource).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        resource: &str,
    ) -> Result<T, ServiceError> {
        self.send(self.http.post(url).json(body), resource).await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
    ) -> Result<T, ServiceError> {
        self.send(self.http.delete(url), resource).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<T, ServiceError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ServiceError::Transport {
                message: format!("Request for {resource} failed: {e}"),
            })?;

        let status = response.status();
        trace!(resource, status = status.as_u16(), "GCP API response");
        if status.is_success() {
            return response.json().await.map_err(|e| ServiceError::Transport {
                message: format!("Failed to parse response for {resource}: {e}"),
            });
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(error_for_status(status, &body, resource))
    }
}

/// Map a non-success API response to a [`ServiceError`].
fn error_for_status(status: StatusCode, body: &str, resource: &str) -> ServiceError {
    match status {
        StatusCode::NOT_FOUND => ServiceError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::CONFLICT => ServiceError::AlreadyExists {
            resource: resource.to_string(),
        },
        StatusCode::UNAUTHORIZED => ServiceError::Auth {
            message: api_message(status, body),
        },
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            ServiceError::Transport {
                message: api_message(status, body),
            }
        }
        _ => ServiceError::Provider {
            message: api_message(status, body),
        },
    }
}

fn api_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(response) => format!("{} ({})", response.error.message, response.error.status),
        Err(_) => format!("{status} - {body}"),
    }
}

/// Every Google Cloud adapter, sharing one client.
pub struct GcpServices {
    pub clusters: Arc<DataprocClusters>,
    pub jobs: Arc<DataprocJobs>,
    pub warehouse: Arc<BigQueryWarehouse>,
    pub bus: Arc<PubSubBus>,
}

impl GcpServices {
    pub async fn connect(config: &PipelineConfig) -> Result<Self, ServiceError> {
        let client = GcpClient::new(config.timeouts.poll_interval()).await?;
        debug!(project = %config.project_id, region = %config.region, "Connected to Google Cloud");
        Ok(Self {
            clusters: Arc::new(DataprocClusters::new(client.clone())),
            jobs: Arc::new(DataprocJobs::new(client.clone())),
            warehouse: Arc::new(BigQueryWarehouse::new(client.clone())),
            bus: Arc::new(PubSubBus::new(client, &config.project_id)),
        })
    }

    /// Services for the orchestrator, with `storage` rooted at the output bucket.
    pub fn services(&self, storage: StorageProvider) -> Services {
        Services {
            clusters: self.clusters.clone(),
            jobs: self.jobs.clone(),
            warehouse: self.warehouse.clone(),
            storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(error_for_status(StatusCode::NOT_FOUND, "", "c").is_not_found());
        assert!(error_for_status(StatusCode::CONFLICT, "", "c").is_already_exists());
        assert!(matches!(
            error_for_status(StatusCode::SERVICE_UNAVAILABLE, "", "c"),
            ServiceError::Transport { .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, "", "c"),
            ServiceError::Auth { .. }
        ));
    }

    #[test]
    fn test_api_message_parsing() {
        let body = r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#;
        let err = error_for_status(StatusCode::FORBIDDEN, body, "c");
        assert_eq!(
            err.to_string(),
            "Provider error: Permission denied (PERMISSION_DENIED)"
        );

        let err = error_for_status(StatusCode::BAD_REQUEST, "plain text", "c");
        assert!(err.to_string().contains("plain text"));
    }
}
