//! Conversation lifecycle and dual-transport synchronisation.
//!
//! # Lifecycle
//! `open()` walks a conversation through its states:
//!
//! ```text
//! Uninitialized → KeyNegotiating → Ready → RealtimeConnected
//!                                       ↘ RealtimeDegraded
//! ```
//!
//! `Ready` is reachable even when every network call fails: the cached
//! snapshot renders, sends fall back to REST, and no transport error is ever
//! fatal. The realtime socket only upgrades freshness.
//!
//! # Dual transports
//! History comes over REST as authoritative snapshots; live events arrive
//! over the websocket. Both funnel through the conversation store's
//! merge-by-id discipline, so a record seen on both transports (a socket echo
//! of a locally-sent message, or a race between history and realtime) lands
//! exactly once.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use cl_crypto::cipher;
use cl_crypto::identity::{IdentityKeyPair, PublicKeyBytes};
use cl_proto::{
    ClientFrame, EncryptedPayload, Message, OutboundMessage, Payload, SendMessageRequest,
};
use cl_store::{merge_message, ConversationStore, IdentityStore, Store};

use crate::channel::{ChannelManager, RealtimeChannel, Subscription};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::rest::ApiClient;

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    KeyNegotiating,
    Ready,
    RealtimeConnected,
    RealtimeDegraded,
}

// ── Decryption context ───────────────────────────────────────────────────────

/// Everything needed to seal and open payloads for one conversation, fixed at
/// open time. A missing peer key means the peer never published an identity;
/// the conversation then runs in plaintext and `seal` does not encrypt.
#[derive(Clone)]
pub struct ConversationContext {
    pub identity: IdentityKeyPair,
    pub peer_key: Option<PublicKeyBytes>,
}

impl ConversationContext {
    pub fn encrypts(&self) -> bool {
        self.peer_key.is_some()
    }

    /// Choose the payload variant for an outbound message: encrypted when a
    /// peer key is on hand, plaintext otherwise.
    pub fn seal(&self, text: &str) -> Result<Payload, SyncError> {
        match &self.peer_key {
            Some(peer) => {
                let sealed = cipher::encrypt(&self.identity, peer, text)?;
                Ok(Payload::Encrypted {
                    e2ee: EncryptedPayload::from_sealed(&sealed),
                })
            }
            None => Ok(Payload::Text {
                text: text.to_string(),
            }),
        }
    }

    /// Decrypt an inbound envelope, degrading to `""` on any failure; an
    /// unreadable message must never take the list down with it.
    pub fn open(&self, envelope: &EncryptedPayload) -> String {
        let Some(peer) = &self.peer_key else {
            tracing::warn!(target: "cl_sync", event = "decrypt_without_peer_key");
            return String::new();
        };
        let (nonce, ciphertext) = match (envelope.nonce_bytes(), envelope.ciphertext_bytes()) {
            (Ok(n), Ok(c)) => (n, c),
            _ => {
                tracing::warn!(target: "cl_sync", event = "envelope_decode_failed");
                return String::new();
            }
        };
        cipher::decrypt_or_empty(&self.identity, peer, &nonce, &ciphertext)
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Long-lived service object owning the stores, the REST client and the
/// shared realtime channel. One per logged-in user session.
pub struct SyncEngine {
    api: Arc<ApiClient>,
    identities: IdentityStore,
    conversations: Arc<ConversationStore>,
    channel: ChannelManager,
}

impl SyncEngine {
    /// Build the engine. A database that fails to open is downgraded to
    /// memory-only operation, never a startup failure.
    pub async fn new(config: SyncConfig, db_path: Option<&Path>) -> Self {
        let store = match db_path {
            Some(path) => match Store::open(path).await {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::warn!(
                        target: "cl_sync",
                        event = "store_open_failed",
                        path = %path.display(),
                        error = %e
                    );
                    None
                }
            },
            None => None,
        };
        Self {
            api: Arc::new(ApiClient::new(&config)),
            identities: IdentityStore::new(store.clone()),
            conversations: Arc::new(ConversationStore::new(store)),
            channel: ChannelManager::new(&config),
        }
    }

    /// Open one conversation: ensure and publish our identity, resolve the
    /// peer key, surface the cached snapshot, refresh from history, then
    /// attach to the realtime channel. Every step that touches the network is
    /// allowed to fail without sinking the open.
    pub async fn open(&self, user_id: &str, conversation_id: &str) -> Conversation {
        let state = Arc::new(Mutex::new(SyncState::Uninitialized));
        set_state(&state, conversation_id, SyncState::KeyNegotiating);

        let identity = self.identities.ensure_keypair(user_id).await;
        if let Err(e) = self.api.publish_key(&identity.keypair.public_b64()).await {
            tracing::warn!(
                target: "cl_sync",
                event = "key_publish_failed",
                conversation_id = %conversation_id,
                error = %e
            );
        }

        let peer_key = self.resolve_peer_key(conversation_id).await;
        let ctx = ConversationContext {
            identity: identity.keypair,
            peer_key,
        };
        set_state(&state, conversation_id, SyncState::Ready);

        // Stale-while-revalidate: the cached snapshot is visible immediately,
        // the authoritative history replaces it when the fetch lands.
        self.conversations.load(conversation_id).await;
        match self.api.history(conversation_id).await {
            Ok(history) => {
                self.conversations
                    .replace_snapshot(conversation_id, ordered(history))
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    target: "cl_sync",
                    event = "history_fetch_failed",
                    conversation_id = %conversation_id,
                    error = %e
                );
            }
        }

        let (channel, pump) = self.attach_realtime(conversation_id, &state).await;

        Conversation {
            id: conversation_id.to_string(),
            ctx,
            api: Arc::clone(&self.api),
            store: Arc::clone(&self.conversations),
            channel,
            state,
            pump,
        }
    }

    /// Logout: tear down the shared socket and remove this user's persisted
    /// identity material.
    pub async fn logout(&self, user_id: &str) {
        self.channel.teardown().await;
        if let Err(e) = self.identities.delete_user_data(user_id).await {
            tracing::warn!(
                target: "cl_sync",
                event = "identity_delete_failed",
                user_id = %user_id,
                error = %e
            );
        }
        tracing::info!(target: "cl_sync", event = "logged_out", user_id = %user_id);
    }

    async fn resolve_peer_key(&self, conversation_id: &str) -> Option<PublicKeyBytes> {
        let keys = match self.api.conversation_keys(conversation_id).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(
                    target: "cl_sync",
                    event = "key_fetch_failed",
                    conversation_id = %conversation_id,
                    error = %e
                );
                return None;
            }
        };
        let Some(b64) = keys.other.public_key else {
            tracing::info!(
                target: "cl_sync",
                event = "peer_key_absent",
                conversation_id = %conversation_id
            );
            return None;
        };
        match PublicKeyBytes::from_b64(&b64) {
            Ok(key) => {
                tracing::info!(
                    target: "cl_sync",
                    event = "peer_key_resolved",
                    conversation_id = %conversation_id,
                    fingerprint = %key.fingerprint()
                );
                Some(key)
            }
            Err(e) => {
                tracing::warn!(
                    target: "cl_sync",
                    event = "peer_key_invalid",
                    conversation_id = %conversation_id,
                    error = %e
                );
                None
            }
        }
    }

    async fn attach_realtime(
        &self,
        conversation_id: &str,
        state: &Arc<Mutex<SyncState>>,
    ) -> (Option<Arc<RealtimeChannel>>, Option<JoinHandle<()>>) {
        let joined = match self.channel.acquire().await {
            Ok(channel) => channel.join(conversation_id).map(|sub| (channel, sub)),
            Err(e) => Err(e),
        };
        match joined {
            Ok((channel, subscription)) => {
                set_state(state, conversation_id, SyncState::RealtimeConnected);
                let pump = spawn_pump(
                    subscription,
                    Arc::clone(&self.conversations),
                    Arc::clone(state),
                );
                (Some(channel), Some(pump))
            }
            Err(e) => {
                tracing::warn!(
                    target: "cl_sync",
                    event = "realtime_attach_failed",
                    conversation_id = %conversation_id,
                    error = %e
                );
                set_state(state, conversation_id, SyncState::RealtimeDegraded);
                (None, None)
            }
        }
    }
}

/// Merge pump: feeds inbound channel events into the conversation store
/// until the subscription ends, then marks the conversation degraded.
fn spawn_pump(
    mut subscription: Subscription,
    store: Arc<ConversationStore>,
    state: Arc<Mutex<SyncState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match event {
                cl_proto::ChannelEvent::Message(msg) => {
                    let conversation_id = msg.conversation_id.clone();
                    store.merge(&conversation_id, msg).await;
                }
                cl_proto::ChannelEvent::MessageDeleted {
                    conversation_id,
                    id,
                } => {
                    store.apply_delete(&conversation_id, &id).await;
                }
            }
        }
        set_state(&state, subscription.conversation_id(), SyncState::RealtimeDegraded);
    })
}

fn set_state(state: &Arc<Mutex<SyncState>>, conversation_id: &str, next: SyncState) {
    let mut current = state.lock().unwrap_or_else(|e| e.into_inner());
    if *current != next {
        tracing::info!(
            target: "cl_sync",
            event = "state_changed",
            conversation_id = %conversation_id,
            from = ?*current,
            to = ?next
        );
        *current = next;
    }
}

/// Normalise a history response into creation order with duplicates dropped.
fn ordered(history: Vec<Message>) -> Vec<Message> {
    let mut list = Vec::with_capacity(history.len());
    for msg in history {
        merge_message(&mut list, msg);
    }
    list
}

// ── Conversation handle ──────────────────────────────────────────────────────

/// One open conversation. Dropping it detaches the realtime subscription;
/// the shared socket and the caches stay up for other conversations.
pub struct Conversation {
    pub(crate) id: String,
    pub(crate) ctx: ConversationContext,
    pub(crate) api: Arc<ApiClient>,
    pub(crate) store: Arc<ConversationStore>,
    channel: Option<Arc<RealtimeChannel>>,
    state: Arc<Mutex<SyncState>>,
    pump: Option<JoinHandle<()>>,
}

impl Conversation {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ConversationContext {
        &self.ctx
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current ordered message list.
    pub async fn messages(&self) -> Vec<Message> {
        self.store.messages(&self.id).await
    }

    /// Send a message. Payload variant is chosen at send time by peer-key
    /// availability. When the socket is live the send is a fire-and-forget
    /// emit whose server echo merges the record in; otherwise the REST reply
    /// carries the record and it merges directly.
    pub async fn send(&self, text: &str, reply_to: Option<String>) -> Result<(), SyncError> {
        let payload = self.ctx.seal(text)?;
        let body = SendMessageRequest::from_payload(payload, reply_to);

        if self.state() == SyncState::RealtimeConnected {
            if let Some(channel) = &self.channel {
                if channel.is_connected() {
                    let frame = ClientFrame::Message(OutboundMessage {
                        conversation_id: self.id.clone(),
                        body: body.clone(),
                    });
                    if channel.send_frame(frame).is_ok() {
                        return Ok(());
                    }
                }
            }
            set_state(&self.state, &self.id, SyncState::RealtimeDegraded);
        }

        let record = self.api.send_message(&self.id, &body).await?;
        self.store.merge(&self.id, record).await;
        Ok(())
    }

    /// Re-fetch authoritative history and overwrite the cached snapshot. On
    /// failure the current view stands.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let history = self.api.history(&self.id).await?;
        self.store.replace_snapshot(&self.id, ordered(history)).await;
        Ok(())
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        if let Some(pump) = &self.pump {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cl_proto::SenderRole;

    fn ctx_pair() -> (ConversationContext, ConversationContext) {
        let patient = IdentityKeyPair::generate();
        let provider = IdentityKeyPair::generate();
        let patient_ctx = ConversationContext {
            peer_key: Some(provider.public.clone()),
            identity: patient.clone(),
        };
        let provider_ctx = ConversationContext {
            peer_key: Some(patient.public.clone()),
            identity: provider,
        };
        (patient_ctx, provider_ctx)
    }

    #[test]
    fn seal_encrypts_when_peer_key_present() {
        let (patient, provider) = ctx_pair();
        let payload = patient.seal("results look good").expect("seal");
        let Payload::Encrypted { e2ee } = payload else {
            panic!("expected encrypted payload");
        };
        assert_eq!(provider.open(&e2ee), "results look good");
    }

    #[test]
    fn seal_falls_back_to_plaintext_without_peer_key() {
        let ctx = ConversationContext {
            identity: IdentityKeyPair::generate(),
            peer_key: None,
        };
        assert!(!ctx.encrypts());
        let payload = ctx.seal("hello").expect("seal");
        assert_eq!(
            payload,
            Payload::Text {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn open_degrades_to_empty_on_garbage() {
        let (patient, provider) = ctx_pair();
        let Payload::Encrypted { mut e2ee } = patient.seal("x").expect("seal") else {
            panic!("expected encrypted payload");
        };
        e2ee.ciphertext = "!!!not-base64!!!".to_string();
        assert_eq!(provider.open(&e2ee), "");

        let stranger = ConversationContext {
            identity: IdentityKeyPair::generate(),
            peer_key: Some(IdentityKeyPair::generate().public.clone()),
        };
        let Payload::Encrypted { e2ee } = patient.seal("private").expect("seal") else {
            panic!("expected encrypted payload");
        };
        assert_eq!(stranger.open(&e2ee), "");
    }

    #[test]
    fn ordered_normalises_history() {
        let msg = |id: &str, minute: u32| Message {
            id: id.to_string(),
            conversation_id: "appt-1".to_string(),
            sender_role: SenderRole::Patient,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap(),
            payload: Payload::Text {
                text: id.to_string(),
            },
            reply_to_id: None,
            reply_to: None,
            deleted: false,
        };
        let list = ordered(vec![msg("m2", 2), msg("m1", 1), msg("m2", 2)]);
        let ids: Vec<_> = list.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }
}
