//! Local identity store.
//!
//! One X25519 keypair per local user, generated lazily on first access and
//! immutable until the delete-account flow wipes it. `ensure_keypair` is
//! idempotent: a per-user in-flight guard prevents two concurrent calls from
//! generating two different keypairs.
//!
//! If the database is unavailable the keypair still materialises in memory
//! for this process — chat must keep working for the current session — and a
//! non-fatal warning is logged.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tokio::sync::Mutex;

use cl_crypto::identity::IdentityKeyPair;

use crate::{db::Store, error::StoreError};

/// A resolved local identity. Only `keypair.public` may ever be transmitted.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub keypair: IdentityKeyPair,
}

pub struct IdentityStore {
    /// None when the database could not be opened; memory-only mode.
    store: Option<Store>,
    cache: Mutex<HashMap<String, IdentityKeyPair>>,
    /// Per-user generation guard.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityStore {
    pub fn new(store: Option<Store>) -> Self {
        if store.is_none() {
            tracing::warn!(
                target: "cl_store",
                event = "identity_store_memory_only",
                "identity persistence unavailable; keypairs will not survive restart"
            );
        }
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the persisted identity for `user_id`, or generate, persist, and
    /// return a new one. Never fails: persistence errors degrade to a
    /// memory-only identity with a warning.
    pub async fn ensure_keypair(&self, user_id: &str) -> Identity {
        let guard = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(user_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _held = guard.lock().await;

        if let Some(keypair) = self.cache.lock().await.get(user_id) {
            return Identity {
                user_id: user_id.to_string(),
                keypair: keypair.clone(),
            };
        }

        if let Some(keypair) = self.load_persisted(user_id).await {
            self.cache
                .lock()
                .await
                .insert(user_id.to_string(), keypair.clone());
            return Identity {
                user_id: user_id.to_string(),
                keypair,
            };
        }

        let keypair = IdentityKeyPair::generate();
        tracing::info!(
            target: "cl_store",
            event = "identity_generated",
            user_id = %user_id,
            fingerprint = %keypair.public.fingerprint()
        );

        if let Some(store) = &self.store {
            let secret_b64 = URL_SAFE_NO_PAD.encode(keypair.secret_bytes());
            if let Err(e) = store
                .save_identity(user_id, &keypair.public_b64(), &secret_b64)
                .await
            {
                tracing::warn!(
                    target: "cl_store",
                    event = "identity_persist_failed",
                    user_id = %user_id,
                    error = %e,
                    "keypair kept in memory for this session only"
                );
            }
        }

        self.cache
            .lock()
            .await
            .insert(user_id.to_string(), keypair.clone());
        Identity {
            user_id: user_id.to_string(),
            keypair,
        }
    }

    /// Delete-account flow: wipes the persisted keypair and the in-memory
    /// copy. A later `ensure_keypair` generates a fresh identity.
    pub async fn delete_user_data(&self, user_id: &str) -> Result<(), StoreError> {
        self.cache.lock().await.remove(user_id);
        if let Some(store) = &self.store {
            store.delete_identity(user_id).await?;
        }
        tracing::info!(target: "cl_store", event = "identity_deleted", user_id = %user_id);
        Ok(())
    }

    async fn load_persisted(&self, user_id: &str) -> Option<IdentityKeyPair> {
        let store = self.store.as_ref()?;
        let (_, secret_b64) = match store.load_identity(user_id).await {
            Ok(row) => row?,
            Err(e) => {
                tracing::warn!(
                    target: "cl_store",
                    event = "identity_load_failed",
                    user_id = %user_id,
                    error = %e
                );
                return None;
            }
        };
        let secret = URL_SAFE_NO_PAD.decode(&secret_b64).ok()?;
        match IdentityKeyPair::from_bytes(&secret) {
            Ok(kp) => Some(kp),
            Err(e) => {
                // Corrupt row: treat as missing so a fresh keypair replaces it.
                tracing::warn!(
                    target: "cl_store",
                    event = "identity_row_corrupt",
                    user_id = %user_id,
                    error = %e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn tmp_db() -> PathBuf {
        PathBuf::from(format!("/tmp/cl-identity-test-{}.db", Uuid::new_v4()))
    }

    fn cleanup(db_path: &PathBuf) {
        let _ = std::fs::remove_file(db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[tokio::test]
    async fn ensure_keypair_is_idempotent() {
        let db_path = tmp_db();
        let store = Store::open(&db_path).await.expect("open store");
        let ids = IdentityStore::new(Some(store));

        let first = ids.ensure_keypair("patient-1").await;
        let second = ids.ensure_keypair("patient-1").await;
        assert_eq!(first.keypair.public, second.keypair.public);

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn identity_survives_store_reopen() {
        let db_path = tmp_db();
        let public = {
            let store = Store::open(&db_path).await.expect("open store");
            let ids = IdentityStore::new(Some(store));
            ids.ensure_keypair("patient-1").await.keypair.public.clone()
        };

        let store = Store::open(&db_path).await.expect("reopen store");
        let ids = IdentityStore::new(Some(store));
        let reloaded = ids.ensure_keypair("patient-1").await;
        assert_eq!(reloaded.keypair.public, public);

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn concurrent_calls_agree_on_one_keypair() {
        let db_path = tmp_db();
        let store = Store::open(&db_path).await.expect("open store");
        let ids = Arc::new(IdentityStore::new(Some(store)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = Arc::clone(&ids);
            handles.push(tokio::spawn(async move {
                ids.ensure_keypair("provider-7").await.keypair.public.clone()
            }));
        }

        let mut publics = Vec::new();
        for h in handles {
            publics.push(h.await.expect("join"));
        }
        assert!(publics.windows(2).all(|w| w[0] == w[1]));

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn memory_only_mode_still_functions() {
        let ids = IdentityStore::new(None);
        let a = ids.ensure_keypair("patient-2").await;
        let b = ids.ensure_keypair("patient-2").await;
        assert_eq!(a.keypair.public, b.keypair.public);
    }

    #[tokio::test]
    async fn delete_user_data_regenerates_fresh_identity() {
        let db_path = tmp_db();
        let store = Store::open(&db_path).await.expect("open store");
        let ids = IdentityStore::new(Some(store));

        let before = ids.ensure_keypair("patient-9").await;
        ids.delete_user_data("patient-9").await.expect("delete");
        let after = ids.ensure_keypair("patient-9").await;
        assert_ne!(before.keypair.public, after.keypair.public);

        cleanup(&db_path);
    }
}
