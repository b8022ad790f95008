//! cl_store — Local durable cache for CareLink Secure Chat
//!
//! # Cache, not ledger
//! The server's history endpoint is always the authority. What lives here is
//! the last known good view: one snapshot row per conversation (the ordered
//! message list, JSON-serialised) and one identity row per local user. Every
//! snapshot is fully overwritten after a successful history fetch; reads that
//! fail degrade to the empty list so a corrupt cache can never block
//! rendering.
//!
//! Secret keys are stored base64-encoded in the identities table; nothing in
//! this crate ever persists decrypted message text.

pub mod conversation;
pub mod db;
pub mod error;
pub mod identity;

pub use conversation::{merge_message, ConversationStore};
pub use db::Store;
pub use error::StoreError;
pub use identity::{Identity, IdentityStore};
