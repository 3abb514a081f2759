//! Session store for established SMART sessions.
//!
//! A session holds the access credential obtained by one successful token
//! exchange. Sessions are inserted whole as `Arc<Session>` and never mutated
//! afterwards, except for the one-way "mark expired" flag.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Cleanup interval: 5 minutes.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Everything a token exchange produces, before an id is assigned.
#[derive(Clone)]
pub struct SessionGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub fhir_user: Option<String>,
    pub scope: Option<String>,
    /// Issuer captured at launch. Never taken from a client request.
    pub fhir_base_url: String,
}

/// An established session.
pub struct Session {
    pub id: String,
    access_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub fhir_user: Option<String>,
    pub scope: Option<String>,
    pub fhir_base_url: String,
    pub created_at: DateTime<Utc>,
    revoked_at: OnceLock<DateTime<Utc>>,
}

impl Session {
    fn new(id: String, grant: SessionGrant) -> Self {
        Self {
            id,
            access_token: grant.access_token,
            token_type: grant.token_type,
            expires_at: grant.expires_at,
            patient_id: grant.patient_id,
            encounter_id: grant.encounter_id,
            fhir_user: grant.fhir_user,
            scope: grant.scope,
            fhir_base_url: grant.fhir_base_url,
            created_at: Utc::now(),
            revoked_at: OnceLock::new(),
        }
    }

    /// The bearer credential.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Check if the session is no longer usable.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired_since(Utc::now()).is_some()
    }

    /// When the session became unusable, if it has.
    #[must_use]
    pub fn expired_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let by_clock = self.expires_at.filter(|at| *at <= now);
        match (self.revoked_at.get().copied(), by_clock) {
            (Some(revoked), Some(clock)) => Some(revoked.min(clock)),
            (revoked, clock) => revoked.or(clock),
        }
    }

    /// Mark the session expired. Idempotent; the first mark wins.
    pub fn mark_expired(&self) {
        let _ = self.revoked_at.set(Utc::now());
    }

    /// Whether the upstream rejected this session's credential.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.get().is_some()
    }

    /// Seconds until the token expires, clamped at zero.
    #[must_use]
    pub fn time_remaining_secs(&self) -> Option<i64> {
        self.expires_at.map(|at| (at - Utc::now()).num_seconds().max(0))
    }

    /// A credential-free view of this session.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let expired = self.is_expired();
        SessionSummary {
            session_id: Some(self.id.clone()),
            authenticated: !expired,
            expired,
            revoked: self.is_revoked(),
            token_type: self.token_type.clone(),
            expires_at: self.expires_at,
            time_remaining_secs: self.time_remaining_secs(),
            patient_id: self.patient_id.clone(),
            encounter_id: self.encounter_id.clone(),
            fhir_user: self.fhir_user.clone(),
            scope: self.scope.clone(),
            fhir_server: self.fhir_base_url.clone(),
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("patient_id", &self.patient_id)
            .field("fhir_base_url", &self.fhir_base_url)
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}

/// Session status as reported to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub authenticated: bool,
    pub expired: bool,
    pub revoked: bool,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub time_remaining_secs: Option<i64>,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub fhir_user: Option<String>,
    pub scope: Option<String>,
    pub fhir_server: String,
    pub created_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Drop the session id, for listings visible to anyone but the session holder.
    #[must_use]
    pub fn without_id(mut self) -> Self {
        self.session_id = None;
        self
    }
}

/// Storage for established sessions.
///
/// `get` returning `None` means the session does not exist; an existing
/// session that is past its expiry is returned and reported by `is_expired`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session and return its generated id.
    async fn create(&self, grant: SessionGrant) -> String;

    /// Look up a session.
    async fn get(&self, session_id: &str) -> Option<Arc<Session>>;

    /// Remove a session. Returns true if it existed.
    async fn remove(&self, session_id: &str) -> bool;

    /// Mark a session expired. Returns true if it existed.
    async fn mark_expired(&self, session_id: &str) -> bool;

    /// All stored sessions.
    async fn list(&self) -> Vec<Arc<Session>>;

    /// Number of stored sessions.
    async fn count(&self) -> usize;

    /// Check if a session is past its expiry or was marked expired.
    fn is_expired(&self, session: &Session) -> bool {
        session.is_expired()
    }
}

/// Process-local session store.
#[derive(Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    retention: Duration,
}

impl InMemorySessionStore {
    /// Create a store that keeps expired sessions for `retention` before sweeping them.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), retention }
    }

    /// Generate an opaque session id from two v4 UUIDs.
    fn generate_id() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Start background cleanup task for long-expired sessions.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.cleanup_expired(Utc::now()).await;
            }
        });
    }

    /// Remove sessions expired for longer than the retention window.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.expired_since(now) {
            Some(since) => now - since < retention,
            None => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up expired sessions");
        }
        removed
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(crate::config::api::EXPIRED_SESSION_RETENTION)
    }
}

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore").field("retention", &self.retention).finish()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, grant: SessionGrant) -> String {
        let id = Self::generate_id();
        let session = Arc::new(Session::new(id.clone(), grant));
        self.sessions.write().await.insert(id.clone(), session);
        id
    }

    async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    async fn mark_expired(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(session_id) else {
            return false;
        };
        session.mark_expired();
        tracing::info!(session_id = %session_id, "Session marked expired");
        true
    }

    async fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_in: Option<i64>) -> SessionGrant {
        SessionGrant {
            access_token: "tok1".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: expires_in.map(|s| Utc::now() + chrono::Duration::seconds(s)),
            patient_id: Some("p1".to_string()),
            encounter_id: None,
            fhir_user: None,
            scope: None,
            fhir_base_url: "https://sandbox.example/fhir".to_string(),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = InMemorySessionStore::default();
        let id = store.create(grant(Some(3600))).await;

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.access_token(), "tok1");
        assert!(!store.is_expired(&session));
        assert_eq!(store.count().await, 1);

        assert!(store.remove(&id).await);
        assert!(store.get(&id).await.is_none());
        assert!(!store.remove(&id).await);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = InMemorySessionStore::default();
        let a = store.create(grant(None)).await;
        let b = store.create(grant(None)).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_expired_is_distinct_from_missing() {
        let store = InMemorySessionStore::default();
        let id = store.create(grant(Some(-10))).await;

        let session = store.get(&id).await.unwrap();
        assert!(store.is_expired(&session));
        assert_eq!(session.time_remaining_secs(), Some(0));
    }

    #[tokio::test]
    async fn test_mark_expired_is_one_way() {
        let store = InMemorySessionStore::default();
        let id = store.create(grant(None)).await;

        assert!(store.mark_expired(&id).await);
        assert!(store.mark_expired(&id).await);
        assert!(!store.mark_expired("missing").await);

        let session = store.get(&id).await.unwrap();
        assert!(session.is_expired());
        assert!(session.summary().revoked);
        assert!(!session.summary().authenticated);
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let store = InMemorySessionStore::new(Duration::from_secs(3600));
        let live = store.create(grant(Some(3600))).await;
        let recent = store.create(grant(Some(-60))).await;
        let old = store.create(grant(Some(-7200))).await;

        assert_eq!(store.cleanup_expired(Utc::now()).await, 1);
        assert!(store.get(&live).await.is_some());
        assert!(store.get(&recent).await.is_some());
        assert!(store.get(&old).await.is_none());
    }

    #[test]
    fn test_debug_hides_token() {
        let session = Session::new("s1".to_string(), grant(None));
        assert!(!format!("{session:?}").contains("tok1"));
    }
}
