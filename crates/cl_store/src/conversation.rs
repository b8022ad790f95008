//! Conversation cache: ordered message lists keyed by conversation id.
//!
//! The merge discipline is what keeps the dual transports consistent:
//! merge-by-id, append-if-absent, ordered by server-assigned creation time
//! (id as tie-break). Applying the same event twice, or a history snapshot
//! and a realtime event in either order, converges to the same list —
//! commutative and idempotent per id. Deletes tombstone in place; records
//! are never physically removed, so reply references keep resolving.
//!
//! Persistence is a side-effect-only cache write after every mutation:
//! failures are logged, never returned, and a failed read on startup
//! degrades to the empty list.

use std::collections::HashMap;

use tokio::sync::Mutex;

use cl_proto::Message;

use crate::db::Store;

/// Merge one incoming record into an ordered list.
///
/// Returns true when the list changed. A record whose id is already present
/// is dropped (the socket echoes locally-sent messages back), unless it
/// carries `deleted = true`, in which case it replaces the existing entry.
pub fn merge_message(list: &mut Vec<Message>, incoming: Message) -> bool {
    if let Some(existing) = list.iter_mut().find(|m| m.id == incoming.id) {
        if incoming.deleted && !existing.deleted {
            *existing = incoming;
            return true;
        }
        return false;
    }

    let pos = list
        .iter()
        .position(|m| (&m.created_at, &m.id) > (&incoming.created_at, &incoming.id))
        .unwrap_or(list.len());
    list.insert(pos, incoming);
    true
}

/// Tombstone the record with `message_id` in place. Returns true if a
/// not-yet-deleted record was found.
pub fn tombstone(list: &mut [Message], message_id: &str) -> bool {
    match list.iter_mut().find(|m| m.id == message_id) {
        Some(msg) if !msg.deleted => {
            msg.deleted = true;
            true
        }
        _ => false,
    }
}

/// Per-conversation message lists plus the SQLite snapshot behind them.
///
/// Writes flow only through the sync engine; readers get cloned lists.
pub struct ConversationStore {
    store: Option<Store>,
    conversations: Mutex<HashMap<String, Vec<Message>>>,
}

impl ConversationStore {
    pub fn new(store: Option<Store>) -> Self {
        Self {
            store,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Load a conversation into memory: cached snapshot if present, empty
    /// list otherwise. Read or parse failures never block rendering.
    pub async fn load(&self, conversation_id: &str) -> Vec<Message> {
        {
            let conversations = self.conversations.lock().await;
            if let Some(list) = conversations.get(conversation_id) {
                return list.clone();
            }
        }

        let list = self.read_snapshot(conversation_id).await;
        self.conversations
            .lock()
            .await
            .insert(conversation_id.to_string(), list.clone());
        list
    }

    /// Current in-memory view (empty if the conversation was never loaded).
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge one inbound record; persists on change. Returns true when the
    /// list changed (false means the id was a duplicate).
    ///
    /// The snapshot write happens under the conversation lock, so interleaved
    /// mutations persist in mutation order and the database never trails a
    /// newer in-memory state.
    pub async fn merge(&self, conversation_id: &str, incoming: Message) -> bool {
        let mut conversations = self.conversations.lock().await;
        let list = conversations
            .entry(conversation_id.to_string())
            .or_default();
        let changed = merge_message(list, incoming);
        if changed {
            self.persist(conversation_id, list).await;
        }
        changed
    }

    /// Tombstone `message_id`; persists on change.
    pub async fn apply_delete(&self, conversation_id: &str, message_id: &str) -> bool {
        let mut conversations = self.conversations.lock().await;
        let list = conversations
            .entry(conversation_id.to_string())
            .or_default();
        let changed = tombstone(list, message_id);
        if changed {
            self.persist(conversation_id, list).await;
        }
        changed
    }

    /// Full overwrite with an authoritative history snapshot.
    pub async fn replace_snapshot(&self, conversation_id: &str, list: Vec<Message>) {
        let mut conversations = self.conversations.lock().await;
        conversations.insert(conversation_id.to_string(), list.clone());
        self.persist(conversation_id, &list).await;
    }

    async fn read_snapshot(&self, conversation_id: &str) -> Vec<Message> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let payload = match store.load_snapshot(conversation_id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(
                    target: "cl_store",
                    event = "snapshot_read_failed",
                    conversation_id = %conversation_id,
                    error = %e
                );
                return Vec::new();
            }
        };
        match serde_json::from_str(&payload) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(
                    target: "cl_store",
                    event = "snapshot_parse_failed",
                    conversation_id = %conversation_id,
                    error = %e
                );
                Vec::new()
            }
        }
    }

    async fn persist(&self, conversation_id: &str, list: &[Message]) {
        let Some(store) = &self.store else { return };
        let payload = match serde_json::to_string(list) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    target: "cl_store",
                    event = "snapshot_serialise_failed",
                    conversation_id = %conversation_id,
                    error = %e
                );
                return;
            }
        };
        if let Err(e) = store.save_snapshot(conversation_id, &payload).await {
            tracing::warn!(
                target: "cl_store",
                event = "snapshot_write_failed",
                conversation_id = %conversation_id,
                error = %e
            );
        }
    }
}
