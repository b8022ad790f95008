//! Soft deletion and abuse reporting.
//!
//! Deletes are optimistic: the local tombstone lands before the server
//! confirms, so the UI updates instantly. A failed remote delete is NOT
//! rolled back; the record stays tombstoned locally and the error propagates
//! so the caller can offer a retry. The server's `messageDeleted` event or
//! the deleted flag on the next history fetch reconciles other devices.

use crate::engine::Conversation;
use crate::error::SyncError;

impl Conversation {
    /// Tombstone a message locally, then ask the server to do the same.
    pub async fn soft_delete(&self, message_id: &str) -> Result<(), SyncError> {
        self.store.apply_delete(&self.id, message_id).await;
        if let Err(e) = self.api.delete_message(message_id).await {
            tracing::warn!(
                target: "cl_sync",
                event = "remote_delete_failed",
                conversation_id = %self.id,
                message_id = %message_id,
                error = %e
            );
            return Err(e);
        }
        tracing::info!(
            target: "cl_sync",
            event = "message_deleted",
            conversation_id = %self.id,
            message_id = %message_id
        );
        Ok(())
    }

    /// Flag a message for the care team. Side channel only; the local list is
    /// untouched.
    pub async fn report(&self, message_id: &str, reason: &str) -> Result<(), SyncError> {
        self.api.report_message(message_id, reason).await?;
        tracing::info!(
            target: "cl_sync",
            event = "message_reported",
            conversation_id = %self.id,
            message_id = %message_id
        );
        Ok(())
    }
}
