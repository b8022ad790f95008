//! Presentation adapter: wire records to display rows.
//!
//! Rendering is a pure function of the message list and the conversation
//! context. Decryption happens here, at the edge: an unreadable ciphertext
//! becomes an empty body, a tombstoned message becomes the fixed sentinel,
//! and neither is ever dropped from the list (dropping would break the
//! numbering of reply references).

use chrono::{DateTime, Datelike, Utc};

use cl_proto::{Message, Payload, SenderRole};

use crate::engine::{Conversation, ConversationContext};

/// Fixed replacement text for tombstoned messages and their reply previews.
pub const REMOVED_SENTINEL: &str = "message removed";

const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".webp"];

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayBody {
    Text(String),
    /// The body was a bare link to an image; the UI renders it inline.
    Image(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayMessage {
    pub id: String,
    pub outgoing: bool,
    pub sender_role: SenderRole,
    pub time: String,
    pub body: DisplayBody,
    /// True when the payload arrived end-to-end encrypted; lets a UI badge
    /// legacy plaintext messages.
    pub encrypted: bool,
    pub deleted: bool,
    pub reply_preview: Option<String>,
}

/// Render the full list for a viewer with the given role.
pub fn render(
    messages: &[Message],
    ctx: &ConversationContext,
    viewer: SenderRole,
) -> Vec<DisplayMessage> {
    let now = Utc::now();
    messages
        .iter()
        .map(|msg| render_one(msg, messages, ctx, viewer, now))
        .collect()
}

fn render_one(
    msg: &Message,
    all: &[Message],
    ctx: &ConversationContext,
    viewer: SenderRole,
    now: DateTime<Utc>,
) -> DisplayMessage {
    let body = if msg.deleted {
        DisplayBody::Text(REMOVED_SENTINEL.to_string())
    } else {
        classify(plain_text(&msg.payload, ctx))
    };
    DisplayMessage {
        id: msg.id.clone(),
        outgoing: msg.sender_role == viewer,
        sender_role: msg.sender_role,
        time: format_timestamp(msg.created_at, now),
        body,
        encrypted: msg.payload.is_encrypted(),
        deleted: msg.deleted,
        reply_preview: reply_preview(msg, all, ctx),
    }
}

fn plain_text(payload: &Payload, ctx: &ConversationContext) -> String {
    match payload {
        Payload::Text { text } => text.clone(),
        Payload::Encrypted { e2ee } => ctx.open(e2ee),
    }
}

fn classify(text: String) -> DisplayBody {
    if is_image_url(&text) {
        DisplayBody::Image(text)
    } else {
        DisplayBody::Text(text)
    }
}

fn is_image_url(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.contains(char::is_whitespace) {
        return false;
    }
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return false;
    }
    // Extension check ignores any query string.
    let path = trimmed.split('?').next().unwrap_or(trimmed).to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// `HH:MM` for today, date-qualified otherwise.
fn format_timestamp(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if created_at.date_naive() == now.date_naive() {
        created_at.format("%H:%M").to_string()
    } else if created_at.year() == now.year() {
        created_at.format("%d %b %H:%M").to_string()
    } else {
        created_at.format("%d %b %Y %H:%M").to_string()
    }
}

/// Resolve the one-line quote above a reply. Prefers the embedded record the
/// server ships with the message, falls back to the local list, and degrades
/// to the sentinel when the referent is deleted or unknown.
fn reply_preview(msg: &Message, all: &[Message], ctx: &ConversationContext) -> Option<String> {
    let referent_id = msg.reply_to_id.as_deref()?;
    let referent = msg
        .reply_to
        .as_deref()
        .or_else(|| all.iter().find(|m| m.id == referent_id));
    let preview = match referent {
        Some(r) if r.deleted => REMOVED_SENTINEL.to_string(),
        Some(r) => plain_text(&r.payload, ctx),
        None => REMOVED_SENTINEL.to_string(),
    };
    Some(preview)
}

impl Conversation {
    /// Display rows for the current message list.
    pub async fn display(&self, viewer: SenderRole) -> Vec<DisplayMessage> {
        let messages = self.messages().await;
        render(&messages, &self.ctx, viewer)
    }
}
