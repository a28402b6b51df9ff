//! Ephemeral storage for issued state records.
//!
//! The store is the single-use enforcement point for state tokens: `take`
//! must look a record up and delete it as one atomic step, so two
//! concurrent validations of the same token can never both succeed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StateError;

/// What the server remembers about an issued state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Hex-encoded random nonce; also the storage key suffix.
    pub nonce: String,
    /// Opaque state supplied by the caller, returned after the callback.
    pub client_state: String,
    /// The provider the token was issued for.
    pub provider_id: String,
    /// Redirect URI used in the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// Issuance time in milliseconds since the epoch.
    pub timestamp: i64,
}

/// A keyed store of state records with per-entry expiry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores a record under `key`; it becomes invisible after `ttl`.
    async fn put(&self, key: &str, record: StateRecord, ttl: Duration) -> Result<(), StateError>;

    /// Atomically removes and returns the record under `key`.
    ///
    /// Returns `None` if the key never existed, was already taken, or expired.
    async fn take(&self, key: &str) -> Result<Option<StateRecord>, StateError>;
}

/// Expiry used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

#[derive(Debug)]
struct StoredState {
    record: StateRecord,
    expires_at: Instant,
}

/// In-process [`StateStore`] backed by a mutex-guarded map.
///
/// Expired entries are invisible to `take` immediately and are physically
/// removed by `take` or [`MemoryStateStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, StoredState>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Returns true if no live records are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes expired records and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "purged expired state records");
        }
        purged
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, key: &str, record: StateRecord, ttl: Duration) -> Result<(), StateError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.entries.lock().await.insert(
            key.to_string(),
            StoredState { record, expires_at },
        );
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<StateRecord>, StateError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.remove(key) else {
            return Ok(None);
        };
        if entry.expires_at <= Instant::now() {
            return Ok(None);
        }
        Ok(Some(entry.record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(nonce: &str) -> StateRecord {
        StateRecord {
            nonce: nonce.to_string(),
            client_state: "client".to_string(),
            provider_id: "google".to_string(),
            redirect_uri: None,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let store = MemoryStateStore::new();
        store
            .put("oidc_state:a", record("a"), Duration::from_secs(600))
            .await
            .expect("put");

        let first = store.take("oidc_state:a").await.expect("take");
        let second = store.take("oidc_state:a").await.expect("take");

        assert_eq!(first, Some(record("a")));
        assert_eq!(second, None);
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_after_ttl() {
        let store = MemoryStateStore::new();
        store
            .put("oidc_state:a", record("a"), Duration::from_secs(600))
            .await
            .expect("put");

        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(store.len().await, 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.is_empty().await);
        assert_eq!(store.take("oidc_state:a").await.expect("take"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_records() {
        let store = MemoryStateStore::new();
        store
            .put("old", record("old"), Duration::from_secs(10))
            .await
            .expect("put");
        store
            .put("new", record("new"), Duration::from_secs(600))
            .await
            .expect("put");

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn put_leaves_expired_records_for_the_sweeper() {
        let store = MemoryStateStore::new();
        store
            .put("old", record("old"), Duration::from_secs(10))
            .await
            .expect("put");
        tokio::time::advance(Duration::from_secs(11)).await;
        store
            .put("new", record("new"), Duration::from_secs(600))
            .await
            .expect("put");

        assert_eq!(store.entries.lock().await.len(), 2);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.entries.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unbounded_ttl_does_not_overflow() {
        let store = MemoryStateStore::new();
        store
            .put("forever", record("forever"), Duration::MAX)
            .await
            .expect("put");

        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(
            store.take("forever").await.expect("take"),
            Some(record("forever"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_takes_yield_one_winner() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .put("oidc_state:race", record("race"), Duration::from_secs(600))
            .await
            .expect("put");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.take("oidc_state:race").await.expect("take")
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join").is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
