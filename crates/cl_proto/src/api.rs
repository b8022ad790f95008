//! REST request/response bodies shared with the backend.
//! These map directly to JSON bodies on the wire.

use serde::{Deserialize, Serialize};

use crate::message::{EncryptedPayload, Payload};

// ── Directory service ─────────────────────────────────────────────────────────

/// `GET /conversations/{id}/keys`
///
/// `other.public_key == None` is a valid response: the peer has no E2EE
/// identity yet and sends/receives fall back to plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationKeysResponse {
    #[serde(rename = "self")]
    pub self_keys: PublishedKey,
    pub other: PublishedKey,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedKey {
    /// Base64 X25519 public key, absent when the user never published one.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Idempotent `PUT /keys`, keyed by the authenticated identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishKeyRequest {
    pub public_key: String,
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// `POST /conversations/{id}/messages` — exactly one of `text` / `e2ee` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2ee: Option<EncryptedPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl SendMessageRequest {
    pub fn from_payload(payload: Payload, reply_to: Option<String>) -> Self {
        let (text, e2ee) = match payload {
            Payload::Text { text } => (Some(text), None),
            Payload::Encrypted { e2ee } => (None, Some(e2ee)),
        };
        Self {
            text,
            e2ee,
            reply_to,
        }
    }
}

/// `POST /messages/{id}/report`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub reason: String,
}

// ── Common ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_peer_key_is_a_valid_directory_response() {
        let raw = r#"{"self": {"publicKey": "abc"}, "other": {}}"#;
        let resp: ConversationKeysResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(resp.self_keys.public_key.as_deref(), Some("abc"));
        assert!(resp.other.public_key.is_none());
    }

    #[test]
    fn send_request_serialises_exactly_one_variant() {
        let req = SendMessageRequest::from_payload(
            Payload::Text {
                text: "hi".to_string(),
            },
            Some("m9".to_string()),
        );
        let json = serde_json::to_value(&req).expect("serialise");
        assert_eq!(json["text"], "hi");
        assert!(json.get("e2ee").is_none());
        assert_eq!(json["replyTo"], "m9");
    }
}
