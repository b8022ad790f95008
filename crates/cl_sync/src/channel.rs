//! Process-wide realtime channel.
//!
//! One websocket connection multiplexes every open conversation: each
//! conversation subscribes with a `join` frame and gets a `Subscription`
//! handle whose Drop unregisters the event route WITHOUT closing the shared
//! socket — other conversations may still be live. The connection itself is
//! lazily established on first need and explicitly torn down on logout;
//! re-acquisition after teardown re-authenticates with the bearer token.
//!
//! Sends over the socket are fire-and-forget: the server-assigned record
//! echoes back as a `message` frame and is deduplicated by id downstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use cl_proto::{ChannelEvent, ClientFrame};

use crate::{config::SyncConfig, error::SyncError};

type Subscribers = Arc<Mutex<HashMap<String, HashMap<u64, mpsc::UnboundedSender<ChannelEvent>>>>>;

fn lock_subscribers(
    subscribers: &Subscribers,
) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<u64, mpsc::UnboundedSender<ChannelEvent>>>> {
    subscribers.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct RealtimeChannel {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    subscribers: Subscribers,
    connected: Arc<AtomicBool>,
    next_sub_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RealtimeChannel {
    /// Open the websocket with the bearer credential and spawn the reader and
    /// writer tasks.
    pub async fn connect(realtime_url: &str, token: &str) -> Result<Arc<Self>, SyncError> {
        let mut request = realtime_url.into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| SyncError::Config(format!("bearer token not header-safe: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _) = connect_async(request).await?;
        let (mut sink, mut stream) = ws.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let subscribers: Subscribers = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(target: "cl_sync", event = "frame_serialise_failed", error = %e);
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let reader = {
            let subscribers = Arc::clone(&subscribers);
            let connected = Arc::clone(&connected);
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    let msg = match frame {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::warn!(target: "cl_sync", event = "channel_read_failed", error = %e);
                            break;
                        }
                    };
                    let WsMessage::Text(text) = msg else { continue };
                    let event: ChannelEvent = match serde_json::from_str(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            // Unknown event kinds are forward-compatible noise.
                            tracing::debug!(target: "cl_sync", event = "channel_frame_ignored", error = %e);
                            continue;
                        }
                    };
                    let subs = lock_subscribers(&subscribers);
                    if let Some(routes) = subs.get(event.conversation_id()) {
                        for tx in routes.values() {
                            let _ = tx.send(event.clone());
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                // Dropping the senders wakes every subscription's recv() with
                // None, so each conversation observes the disconnect instead
                // of blocking on a dead socket.
                lock_subscribers(&subscribers).clear();
                tracing::info!(target: "cl_sync", event = "channel_disconnected");
            })
        };

        tracing::info!(target: "cl_sync", event = "channel_connected", url = %realtime_url);

        Ok(Arc::new(Self {
            outbound,
            subscribers,
            connected,
            next_sub_id: AtomicU64::new(0),
            reader,
            writer,
        }))
    }

    /// Subscribe to a conversation's events. Sends the `join` control frame
    /// and returns a handle that unsubscribes on Drop.
    pub fn join(self: &Arc<Self>, conversation_id: &str) -> Result<Subscription, SyncError> {
        self.send_frame(ClientFrame::Join {
            conversation_id: conversation_id.to_string(),
        })?;

        let (tx, receiver) = mpsc::unbounded_channel();
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        lock_subscribers(&self.subscribers)
            .entry(conversation_id.to_string())
            .or_default()
            .insert(id, tx);

        Ok(Subscription {
            conversation_id: conversation_id.to_string(),
            id,
            subscribers: Arc::clone(&self.subscribers),
            receiver,
        })
    }

    /// Fire-and-forget emit; fails only when the channel is closed.
    pub fn send_frame(&self, frame: ClientFrame) -> Result<(), SyncError> {
        self.outbound
            .send(frame)
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Logout teardown: closes the socket for every conversation.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
        lock_subscribers(&self.subscribers).clear();
    }
}

/// Per-conversation event route. Dropping it detaches this conversation's
/// handler; the shared socket stays open.
pub struct Subscription {
    conversation_id: String,
    id: u64,
    subscribers: Subscribers,
    receiver: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.receiver.recv().await
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subs = lock_subscribers(&self.subscribers);
        if let Some(routes) = subs.get_mut(&self.conversation_id) {
            routes.remove(&self.id);
            if routes.is_empty() {
                subs.remove(&self.conversation_id);
            }
        }
    }
}

/// Lazy singleton holder for the one process-wide channel.
pub struct ChannelManager {
    realtime_url: String,
    token: String,
    inner: tokio::sync::Mutex<Option<Arc<RealtimeChannel>>>,
}

impl ChannelManager {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            realtime_url: config.realtime_url.clone(),
            token: config.access_token.clone(),
            inner: tokio::sync::Mutex::new(None),
        }
    }

    /// Current channel if it is still connected; otherwise connect afresh
    /// (re-authenticating with the bearer token).
    pub async fn acquire(&self) -> Result<Arc<RealtimeChannel>, SyncError> {
        let mut inner = self.inner.lock().await;
        if let Some(channel) = inner.as_ref() {
            if channel.is_connected() {
                return Ok(Arc::clone(channel));
            }
        }
        let channel = RealtimeChannel::connect(&self.realtime_url, &self.token).await?;
        *inner = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Logout: tear the shared socket down. The next acquire reconnects.
    pub async fn teardown(&self) {
        if let Some(channel) = self.inner.lock().await.take() {
            channel.close();
        }
    }
}
