//! Push delivery of bus messages over HTTP.
//!
//! The bus delivers each message as a JSON request body whose `data` field
//! holds the base64-encoded payload.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{DecodeError, InvalidBase64Snafu, InvalidPushSnafu};

/// A push request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub message: PushedMessage,
    #[serde(default)]
    pub subscription: String,
}

/// The message carried by a push request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedMessage {
    /// Base64-encoded payload.
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl PushMessage {
    /// Parse a push request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(body).context(InvalidPushSnafu)
    }

    /// Build a push request around a raw payload.
    pub fn wrap(payload: &[u8], message_id: impl Into<String>) -> Self {
        Self {
            message: PushedMessage {
                data: STANDARD.encode(payload),
                message_id: message_id.into(),
                publish_time: Some(Utc::now()),
                attributes: HashMap::new(),
            },
            subscription: String::new(),
        }
    }

    /// Decoded payload bytes.
    pub fn payload(&self) -> Result<Vec<u8>, DecodeError> {
        STANDARD
            .decode(self.message.data.trim())
            .context(InvalidBase64Snafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_push_body() {
        let body = br#"{
            "message": {
                "data": "eyJzdGF0dXMiOiJGQUlMRUQiLCJ0YWJsZXMiOltdfQ==",
                "messageId": "2070443601311540",
                "publishTime": "2026-10-19T08:00:00.000Z",
                "attributes": {"origin": "job"}
            },
            "subscription": "projects/tarrieu/subscriptions/load"
        }"#;

        let push = PushMessage::from_slice(body).unwrap();
        assert_eq!(push.message.message_id, "2070443601311540");
        assert_eq!(push.message.attributes["origin"], "job");
        assert!(push.message.publish_time.is_some());
        assert_eq!(
            push.payload().unwrap(),
            br#"{"status":"FAILED","tables":[]}"#.to_vec()
        );
    }

    #[test]
    fn test_wrap_round_trip() {
        let push = PushMessage::wrap(b"payload", "1");
        let body = serde_json::to_vec(&push).unwrap();
        let decoded = PushMessage::from_slice(&body).unwrap();
        assert_eq!(decoded.payload().unwrap(), b"payload");
    }

    #[test]
    fn test_invalid_push_bodies() {
        assert!(matches!(
            PushMessage::from_slice(b"not json"),
            Err(DecodeError::InvalidPush { .. })
        ));

        let push = PushMessage::from_slice(br#"{"message":{"data":"!!!"}}"#).unwrap();
        assert!(matches!(
            push.payload(),
            Err(DecodeError::InvalidBase64 { .. })
        ));
    }
}
