//! Message records and payload variants.
//!
//! A conversation may legitimately mix both payload variants: messages sent
//! before the peer published a key (or while the directory was unreachable)
//! are plaintext; everything after key resolution is encrypted. The variant
//! is fixed at send time and never re-negotiated.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cl_crypto::cipher::SealedMessage;
use cl_crypto::CryptoError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SenderRole {
    Patient,
    Provider,
}

/// One message as stored, fetched, and pushed over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id — globally unique and stable across both
    /// transports; the dedupe discipline depends on this.
    pub id: String,
    pub conversation_id: String,
    pub sender_role: SenderRole,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Referenced message embedded by the history endpoint (one level deep).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Box<Message>>,
    /// Tombstone flag — deleted messages stay in the log so reply previews
    /// keep resolving.
    #[serde(default)]
    pub deleted: bool,
}

/// Serialised as either a bare `text` string field or an `e2ee` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    Text { text: String },
    Encrypted { e2ee: EncryptedPayload },
}

impl Payload {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Payload::Encrypted { .. })
    }
}

/// Authenticated-encrypted payload, version-tagged via `alg` for forward
/// compatibility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    /// 24-byte nonce, base64url.
    pub nonce: String,
    /// Ciphertext + tag, base64url.
    pub ciphertext: String,
    pub alg: String,
}

impl EncryptedPayload {
    pub fn from_sealed(sealed: &SealedMessage) -> Self {
        Self {
            nonce: URL_SAFE_NO_PAD.encode(&sealed.nonce),
            ciphertext: URL_SAFE_NO_PAD.encode(&sealed.ciphertext),
            alg: cl_crypto::cipher::ALGORITHM_ID.to_string(),
        }
    }

    pub fn nonce_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(URL_SAFE_NO_PAD.decode(&self.nonce)?)
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(URL_SAFE_NO_PAD.decode(&self.ciphertext)?)
    }
}
