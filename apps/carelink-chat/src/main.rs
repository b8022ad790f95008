//! Command line client for CareLink Secure Chat.
//!
//! Thin shell over the sync engine: opens a conversation, prints rendered
//! rows, and exposes send/delete/report. Endpoints come from
//! `CARELINK_API_URL` / `CARELINK_RT_URL` with production defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cl_proto::SenderRole;
use cl_sync::{DisplayBody, DisplayMessage, SyncConfig, SyncEngine, SyncState};

#[derive(Parser)]
#[command(name = "carelink-chat")]
#[command(version)]
#[command(about = "End-to-end encrypted patient-provider chat")]
struct Cli {
    /// User id of the logged-in account
    #[arg(long, env = "CARELINK_USER")]
    user: String,

    /// Bearer token for the session
    #[arg(long, env = "CARELINK_TOKEN")]
    token: String,

    /// Local cache database (omit for memory-only operation)
    #[arg(long, env = "CARELINK_DB")]
    db: Option<PathBuf>,

    /// Which side of the conversation this account is
    #[arg(long, value_enum, default_value_t = Role::Patient)]
    role: Role,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Patient,
    Provider,
}

impl From<Role> for SenderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Patient => SenderRole::Patient,
            Role::Provider => SenderRole::Provider,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the conversation history
    History {
        /// Conversation id
        conversation: String,
    },

    /// Print history, then keep following new messages
    Tail {
        conversation: String,
    },

    /// Send a message
    Send {
        conversation: String,
        /// Message text
        text: String,
        /// Message id to quote
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Remove one of your messages for both parties
    Delete {
        conversation: String,
        message_id: String,
    },

    /// Flag a message for the care team
    Report {
        conversation: String,
        message_id: String,
        /// Why the message is being flagged
        #[arg(long, default_value = "inappropriate")]
        reason: String,
    },

    /// Tear down the session and remove local key material
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env(cli.token.clone());
    let engine = SyncEngine::new(config, cli.db.as_deref()).await;
    let viewer: SenderRole = cli.role.into();

    match cli.command {
        Command::History { conversation } => {
            let conv = engine.open(&cli.user, &conversation).await;
            for row in conv.display(viewer).await {
                print_row(&row);
            }
        }
        Command::Tail { conversation } => {
            let conv = engine.open(&cli.user, &conversation).await;
            if conv.state() == SyncState::RealtimeDegraded {
                eprintln!("realtime unavailable, polling history");
            }
            let mut seen = 0;
            loop {
                let rows = conv.display(viewer).await;
                for row in unseen_rows(&rows, seen) {
                    print_row(row);
                }
                seen = rows.len();
                tokio::time::sleep(Duration::from_secs(1)).await;
                if conv.state() == SyncState::RealtimeDegraded {
                    // No socket; history is the only source of new messages.
                    let _ = conv.refresh().await;
                }
            }
        }
        Command::Send {
            conversation,
            text,
            reply_to,
        } => {
            let conv = engine.open(&cli.user, &conversation).await;
            conv.send(&text, reply_to)
                .await
                .context("message not sent")?;
            // Socket sends confirm via echo; give it a moment before exiting.
            tokio::time::sleep(Duration::from_millis(300)).await;
            println!("sent ({} messages in conversation)", conv.messages().await.len());
        }
        Command::Delete {
            conversation,
            message_id,
        } => {
            let conv = engine.open(&cli.user, &conversation).await;
            conv.soft_delete(&message_id)
                .await
                .context("message removed locally but the server delete failed; retry")?;
            println!("deleted {message_id}");
        }
        Command::Report {
            conversation,
            message_id,
            reason,
        } => {
            let conv = engine.open(&cli.user, &conversation).await;
            conv.report(&message_id, &reason)
                .await
                .context("report not delivered")?;
            println!("reported {message_id}");
        }
        Command::Logout => {
            engine.logout(&cli.user).await;
            println!("logged out");
        }
    }

    Ok(())
}

/// Rows not yet printed. An authoritative refresh may legitimately shrink
/// the list below the stale snapshot that rendered first; nothing new then.
fn unseen_rows(rows: &[DisplayMessage], seen: usize) -> &[DisplayMessage] {
    rows.get(seen..).unwrap_or_default()
}

fn print_row(row: &DisplayMessage) {
    let who = if row.outgoing { "you" } else { "them" };
    let lock = if row.encrypted { "" } else { " [unencrypted]" };
    let body = match &row.body {
        DisplayBody::Text(text) => text.clone(),
        DisplayBody::Image(url) => format!("[image] {url}"),
    };
    let reply = row
        .reply_preview
        .as_deref()
        .map(|p| format!("  (re: {p})"))
        .unwrap_or_default();
    println!("{} {}{}: {}{}", row.time, who, lock, body, reply);
}
