//! Message bus the batch job reports completion on.

pub mod memory;
pub mod push;

use async_trait::async_trait;
use snafu::ResultExt;
use tracing::info;

use crate::envelope::StatusEnvelope;
use crate::error::{InvalidEnvelopeSnafu, PublishError, PublishSnafu, ServiceError};

pub use memory::InMemoryMessageBus;
pub use push::PushMessage;

/// Black-box publish/subscribe service.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `data` on `topic`, returning the provider's message id.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, ServiceError>;
}

/// Encode and publish a status envelope on `topic`.
///
/// This is the batch job's side of the completion contract.
pub async fn publish_status(
    bus: &dyn MessageBus,
    topic: &str,
    envelope: &StatusEnvelope,
) -> Result<String, PublishError> {
    let data = envelope.encode().context(InvalidEnvelopeSnafu)?;
    let message_id = bus
        .publish(topic, data)
        .await
        .context(PublishSnafu { topic })?;
    info!(
        topic,
        message_id = %message_id,
        status = envelope.status.as_str(),
        tables = envelope.tables.len(),
        "Published status envelope"
    );
    Ok(message_id)
}
