//! In-memory store of pending authorizations, keyed by `state`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::types::PendingAuthorization;

/// Cleanup interval: 1 minute.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Pending authorization store. Each entry is consumed at most once.
#[derive(Clone)]
pub struct PendingAuthorizationStore {
    pending: Arc<RwLock<HashMap<String, PendingAuthorization>>>,
    ttl: Duration,
}

impl PendingAuthorizationStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { pending: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    /// Generate an unguessable state value from two v4 UUIDs (244 random bits).
    #[must_use]
    pub fn generate_state() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Store a pending authorization under its state.
    pub async fn insert(&self, pending: PendingAuthorization) {
        self.pending.write().await.insert(pending.state.clone(), pending);
    }

    /// Consume the entry for `state` (one-time use).
    ///
    /// The entry is removed under the write lock whether or not it is still
    /// live, so a replayed or racing callback deterministically gets `None`.
    pub async fn consume(&self, state: &str) -> Option<PendingAuthorization> {
        let pending = self.pending.write().await.remove(state)?;
        if pending.is_expired(self.ttl) {
            tracing::debug!(issuer = %pending.issuer, "Pending authorization expired");
            return None;
        }
        Some(pending)
    }

    /// Check whether `state` names a live entry.
    pub async fn contains(&self, state: &str) -> bool {
        self.pending.read().await.get(state).is_some_and(|p| !p.is_expired(self.ttl))
    }

    /// Number of entries, expired ones included until the next sweep.
    pub async fn count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Start background cleanup task for abandoned authorizations.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, p| !p.is_expired(self.ttl));
        let removed = before - pending.len();
        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up expired pending authorizations");
        }
        removed
    }
}

impl std::fmt::Debug for PendingAuthorizationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorizationStore").field("ttl", &self.ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn pending(state: &str) -> PendingAuthorization {
        PendingAuthorization {
            state: state.to_string(),
            issuer: "https://ehr.example/fhir".to_string(),
            launch_token: "xyz".to_string(),
            token_url: url::Url::parse("https://ehr.example/token").unwrap(),
            code_verifier: None,
            created_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = PendingAuthorizationStore::new(Duration::from_secs(600));
        store.insert(pending("s1")).await;
        assert!(store.contains("s1").await);

        let first = store.consume("s1").await;
        assert_eq!(first.unwrap().launch_token, "xyz");

        // Second consume fails (already used)
        assert!(store.consume("s1").await.is_none());
        assert!(store.consume("never-issued").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_rejected_and_removed() {
        let store = PendingAuthorizationStore::new(Duration::ZERO);
        store.insert(pending("s1")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!store.contains("s1").await);
        assert!(store.consume("s1").await.is_none());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = PendingAuthorizationStore::new(Duration::ZERO);
        store.insert(pending("a")).await;
        store.insert(pending("b")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.cleanup_expired().await, 2);
        assert_eq!(store.count().await, 0);
    }

    #[test]
    fn test_state_is_unique() {
        let a = PendingAuthorizationStore::generate_state();
        let b = PendingAuthorizationStore::generate_state();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
