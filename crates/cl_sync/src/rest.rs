//! Bearer-authenticated REST client.
//!
//! The request/response fallback transport, and the only source of
//! authoritative history. Every failure here is recoverable by design: the
//! engine downgrades state or leaves cached data standing rather than
//! surfacing a fatal error.

use cl_proto::api::{
    ConversationKeysResponse, PublishKeyRequest, ReportRequest, SendMessageRequest,
};
use cl_proto::Message;

use crate::{config::SyncConfig, error::SyncError};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.api_base_url.clone(),
            token: config.access_token.clone(),
        }
    }

    /// Directory lookup: published public keys for both parties of a
    /// conversation. `other.public_key == None` means the peer has no E2EE
    /// identity yet.
    pub async fn conversation_keys(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationKeysResponse, SyncError> {
        let resp = self
            .http
            .get(format!(
                "{}/conversations/{}/keys",
                self.base_url, conversation_id
            ))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Idempotent upload of the local public key, keyed by the authenticated
    /// identity.
    pub async fn publish_key(&self, public_key_b64: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .put(format!("{}/keys", self.base_url))
            .bearer_auth(&self.token)
            .json(&PublishKeyRequest {
                public_key: public_key_b64.to_string(),
            })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Authoritative ordered history for a conversation.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>, SyncError> {
        let resp = self
            .http
            .get(format!(
                "{}/conversations/{}/messages",
                self.base_url, conversation_id
            ))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Request/response send; returns the persisted record with the
    /// server-assigned id and timestamp.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        body: &SendMessageRequest,
    ) -> Result<Message, SyncError> {
        let resp = self
            .http
            .post(format!(
                "{}/conversations/{}/messages",
                self.base_url, conversation_id
            ))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .delete(format!("{}/messages/{}", self.base_url, message_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn report_message(&self, message_id: &str, reason: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .post(format!("{}/messages/{}/report", self.base_url, message_id))
            .bearer_auth(&self.token)
            .json(&ReportRequest {
                reason: reason.to_string(),
            })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(
            target: "cl_sync",
            event = "api_call_failed",
            status = %status,
            body_len = body.len()
        );
        Err(SyncError::Api { status, body })
    }
}
