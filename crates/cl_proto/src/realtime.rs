//! Realtime channel frames.
//!
//! One websocket connection multiplexes every open conversation; frames are
//! JSON objects tagged by `event` with the body under `data`:
//!
//! ```json
//! {"event": "join",           "data": {"conversationId": "appt-1"}}
//! {"event": "message",        "data": { ...message record... }}
//! {"event": "messageDeleted", "data": {"conversationId": "appt-1", "id": "m3"}}
//! ```
//!
//! Client→server frames (`ClientFrame`): `join` is sent once per conversation
//! to subscribe; an outbound `message` carries a send-request body plus the
//! conversation id (the server assigns id and timestamp and echoes the full
//! record back). Server→client frames (`ChannelEvent`) carry full message
//! records — a locally-sent message echoes back with its server-assigned id.

use serde::{Deserialize, Serialize};

use crate::api::SendMessageRequest;
use crate::message::Message;

// ── Server → client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ChannelEvent {
    Message(Message),
    #[serde(rename_all = "camelCase")]
    MessageDeleted { conversation_id: String, id: String },
}

impl ChannelEvent {
    /// Conversation this frame belongs to, for subscriber routing.
    pub fn conversation_id(&self) -> &str {
        match self {
            ChannelEvent::Message(msg) => &msg.conversation_id,
            ChannelEvent::MessageDeleted {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Join { conversation_id: String },
    Message(OutboundMessage),
}

/// Fire-and-forget outbound send: same shape as the REST send body, plus the
/// conversation id for routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub conversation_id: String,
    #[serde(flatten)]
    pub body: SendMessageRequest,
}
