//! In-process backend for integration tests: a websocket relay speaking the
//! realtime frame protocol and an axum stub for the REST API, both backed by
//! the same in-memory message list so history and realtime agree the way the
//! production backend does.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use cl_proto::{
    ChannelEvent, ClientFrame, Message, Payload, PublishKeyRequest, ReportRequest,
    SendMessageRequest, SenderRole,
};

// ── Shared state ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TestBackend {
    messages: Arc<Mutex<Vec<Message>>>,
    peer_key: Arc<Mutex<Option<String>>>,
    published_keys: Arc<Mutex<Vec<String>>>,
    reports: Arc<Mutex<Vec<(String, String)>>>,
    next_id: Arc<AtomicU64>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            peer_key: Arc::new(Mutex::new(None)),
            published_keys: Arc::new(Mutex::new(Vec::new())),
            reports: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn set_peer_key(&self, public_key_b64: &str) {
        *self.peer_key.lock().unwrap() = Some(public_key_b64.to_string());
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn published_keys(&self) -> Vec<String> {
        self.published_keys.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }

    /// Server-side record assembly: assign id and timestamp, resolve the
    /// quoted record, store, return the full message.
    pub fn record(
        &self,
        conversation_id: &str,
        body: SendMessageRequest,
        sender_role: SenderRole,
    ) -> Message {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = match (body.text, body.e2ee) {
            (_, Some(e2ee)) => Payload::Encrypted { e2ee },
            (Some(text), None) => Payload::Text { text },
            (None, None) => Payload::Text {
                text: String::new(),
            },
        };
        let mut messages = self.messages.lock().unwrap();
        let reply_to = body
            .reply_to
            .as_deref()
            .and_then(|id| messages.iter().find(|m| m.id == id))
            .cloned()
            .map(Box::new);
        let record = Message {
            id: format!("srv-{n}"),
            conversation_id: conversation_id.to_string(),
            sender_role,
            created_at: Utc::now(),
            payload,
            reply_to_id: body.reply_to,
            reply_to,
            deleted: false,
        };
        messages.push(record.clone());
        record
    }

    fn tombstone(&self, message_id: &str) -> bool {
        let mut messages = self.messages.lock().unwrap();
        match messages.iter_mut().find(|m| m.id == message_id) {
            Some(msg) => {
                msg.deleted = true;
                true
            }
            None => false,
        }
    }
}

// ── REST stub ────────────────────────────────────────────────────────────────

/// Serve the REST stub on an ephemeral port; returns the base URL.
pub async fn start_api(backend: TestBackend) -> String {
    let app = Router::new()
        .route("/keys", put(publish_key))
        .route("/conversations/:id/keys", get(conversation_keys))
        .route("/conversations/:id/messages", get(history).post(send_message))
        .route("/messages/:id", delete(delete_message))
        .route("/messages/:id/report", post(report))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

async fn publish_key(
    State(backend): State<TestBackend>,
    Json(req): Json<PublishKeyRequest>,
) -> StatusCode {
    backend.published_keys.lock().unwrap().push(req.public_key);
    StatusCode::NO_CONTENT
}

async fn conversation_keys(
    Path(_id): Path<String>,
    State(backend): State<TestBackend>,
) -> Json<serde_json::Value> {
    let own = backend.published_keys.lock().unwrap().last().cloned();
    let peer = backend.peer_key.lock().unwrap().clone();
    Json(serde_json::json!({
        "self": {"publicKey": own},
        "other": {"publicKey": peer},
    }))
}

async fn history(
    Path(id): Path<String>,
    State(backend): State<TestBackend>,
) -> Json<Vec<Message>> {
    let messages = backend
        .messages
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.conversation_id == id)
        .cloned()
        .collect();
    Json(messages)
}

async fn send_message(
    Path(id): Path<String>,
    State(backend): State<TestBackend>,
    Json(body): Json<SendMessageRequest>,
) -> Json<Message> {
    Json(backend.record(&id, body, SenderRole::Patient))
}

async fn delete_message(Path(id): Path<String>, State(backend): State<TestBackend>) -> StatusCode {
    if backend.tombstone(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn report(
    Path(id): Path<String>,
    State(backend): State<TestBackend>,
    Json(req): Json<ReportRequest>,
) -> StatusCode {
    backend.reports.lock().unwrap().push((id, req.reason));
    StatusCode::NO_CONTENT
}

// ── Realtime relay ───────────────────────────────────────────────────────────

type ClientTx = tokio::sync::mpsc::UnboundedSender<WsMessage>;
type Clients = Arc<Mutex<HashMap<SocketAddr, (ClientTx, HashSet<String>)>>>;

/// Websocket relay: tracks which client joined which conversation, assembles
/// full records for inbound sends and echoes them to every joined client,
/// sender included.
pub struct LocalRelay {
    addr: SocketAddr,
    clients: Clients,
}

impl LocalRelay {
    pub async fn start(backend: TestBackend) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let clients: Clients = Arc::new(Mutex::new(HashMap::new()));

        let accept_clients = clients.clone();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let backend = backend.clone();
                let clients = accept_clients.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, backend, clients).await;
                });
            }
        });

        Self { addr, clients }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Inject a server-originated event, e.g. a message from the other party
    /// or a moderation delete.
    pub fn push(&self, event: &ChannelEvent) {
        broadcast(&self.clients, event);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Server-side close of every live connection, as when the backend
    /// restarts mid-session.
    pub fn disconnect_all(&self) {
        let mut clients = self.clients.lock().unwrap();
        for (tx, _) in clients.values() {
            let _ = tx.send(WsMessage::Close(None));
        }
        clients.clear();
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    backend: TestBackend,
    clients: Clients,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut sender, mut receiver) = ws.split();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    clients
        .lock()
        .unwrap()
        .insert(peer, (tx, HashSet::new()));

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let WsMessage::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
            continue;
        };
        match frame {
            ClientFrame::Join { conversation_id } => {
                if let Some((_, rooms)) = clients.lock().unwrap().get_mut(&peer) {
                    rooms.insert(conversation_id);
                }
            }
            ClientFrame::Message(outbound) => {
                let record =
                    backend.record(&outbound.conversation_id, outbound.body, SenderRole::Patient);
                broadcast(&clients, &ChannelEvent::Message(record));
            }
        }
    }

    clients.lock().unwrap().remove(&peer);
}

fn broadcast(clients: &Clients, event: &ChannelEvent) {
    let text = serde_json::to_string(event).unwrap();
    for (tx, rooms) in clients.lock().unwrap().values() {
        if rooms.contains(event.conversation_id()) {
            let _ = tx.send(WsMessage::Text(text.clone()));
        }
    }
}

// ── Polling helper ───────────────────────────────────────────────────────────

/// Poll `check` until it passes or two seconds elapse.
pub async fn eventually<F>(mut check: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}
