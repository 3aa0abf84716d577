//! Pub/Sub publishing.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::GcpClient;
use crate::bus::MessageBus;
use crate::error::ServiceError;

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Pub/Sub topic publisher.
#[derive(Debug, Clone)]
pub struct PubSubBus {
    client: GcpClient,
    project_id: String,
}

impl PubSubBus {
    pub fn new(client: GcpClient, project_id: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
        }
    }

    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{topic}", self.project_id)
    }
}

#[async_trait]
impl MessageBus for PubSubBus {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, ServiceError> {
        let path = self.topic_path(topic);
        let url = format!("https://pubsub.googleapis.com/v1/{path}:publish");
        let body = PublishRequest {
            messages: vec![OutgoingMessage {
                data: STANDARD.encode(data),
            }],
        };
        let response: PublishResponse = self.client.post(&url, &body, &path).await?;
        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::provider(format!("No message id returned by {path}")))
    }
}
