//! In-memory message bus.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::MessageBus;
use crate::error::ServiceError;

/// Message bus that keeps published messages per topic.
#[derive(Default)]
pub struct InMemoryMessageBus {
    topics: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published on `topic` as `(message_id, data)`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<(String, Vec<u8>)> {
        self.topics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, ServiceError> {
        let message_id = ulid::Ulid::new().to_string();
        self.topics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push((message_id.clone(), data));
        Ok(message_id)
    }
}
