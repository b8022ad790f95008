//! cl_proto — Wire types for CareLink Secure Chat
//!
//! Everything here maps one-to-one to JSON bodies exchanged with the chat
//! backend (camelCase on the wire, matching the REST/realtime contract).
//! Binary material (nonces, ciphertext, keys) is base64url without padding.
//!
//! # Modules
//! - `message`  — message records and the text/e2ee payload variants
//! - `api`      — REST request/response bodies (directory, history, send, report)
//! - `realtime` — `{"event", "data"}` frames on the realtime channel

pub mod api;
pub mod message;
pub mod realtime;

pub use api::{
    ConversationKeysResponse, ErrorResponse, PublishKeyRequest, PublishedKey, ReportRequest,
    SendMessageRequest,
};
pub use message::{EncryptedPayload, Message, Payload, SenderRole};
pub use realtime::{ChannelEvent, ClientFrame, OutboundMessage};
