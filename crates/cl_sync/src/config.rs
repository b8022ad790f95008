//! Engine configuration.

/// Endpoints and the bearer credential used by both transports.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST base URL (directory, history, send, moderation).
    pub api_base_url: String,
    /// Realtime websocket URL.
    pub realtime_url: String,
    /// Bearer token for the authenticated user session.
    pub access_token: String,
}

impl SyncConfig {
    /// Read endpoints from the environment, falling back to production
    /// defaults. The token has no default; chat is unusable without a
    /// session.
    pub fn from_env(access_token: String) -> Self {
        Self {
            api_base_url: std::env::var("CARELINK_API_URL")
                .unwrap_or_else(|_| "https://api.carelink.health".to_string()),
            realtime_url: std::env::var("CARELINK_RT_URL")
                .unwrap_or_else(|_| "wss://rt.carelink.health".to_string()),
            access_token,
        }
    }
}
