//! cl_sync — Conversation synchronisation engine for CareLink Secure Chat
//!
//! Reconciles two transports into one consistent local view per conversation:
//! a push-based realtime channel (one websocket multiplexing every open
//! conversation) and the pull-based REST history endpoint, which is always
//! authoritative. The two race freely; consistency comes from id-based
//! deduplicating merges in `cl_store`, not from locking.
//!
//! Nothing here is fatal to the host application: key resolution failures
//! downgrade to plaintext sends, realtime failures downgrade to
//! request/response, and history failures leave the cached snapshot standing.
//!
//! # Modules
//! - `engine`     — state machine, conversation open/send, event pump
//! - `channel`    — process-wide websocket singleton + per-conversation subscriptions
//! - `rest`       — bearer-authenticated REST client
//! - `moderation` — soft-delete and report operations
//! - `view`       — display-ready records for the UI layer
//! - `config`     — engine configuration
//! - `error`      — unified error type

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod moderation;
pub mod rest;
pub mod view;

pub use config::SyncConfig;
pub use engine::{Conversation, ConversationContext, SyncEngine, SyncState};
pub use error::SyncError;
pub use view::{render, DisplayBody, DisplayMessage, REMOVED_SENTINEL};
