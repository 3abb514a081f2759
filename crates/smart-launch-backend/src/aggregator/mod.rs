//! Concurrent multi-resource fetch for one session.
//!
//! One search per requested kind, all in flight at once, each bounded by its
//! own deadline and joined before returning. A failed kind is recorded in the
//! payload metadata; the call as a whole fails only when the session is
//! unusable or every kind failed.

mod kinds;
mod payload;

use std::sync::Arc;

use futures::future::join_all;
use url::Url;

pub use kinds::{ResourceKind, UnknownResourceKind, parse_kind_list};
pub use payload::{AggregatedPayload, PayloadMetadata, SearchMetadata, SearchResult, TokenInfo};

use crate::client::FhirClient;
use crate::error::{AggregationError, AggregationResult, FetchError};
use crate::models::Bundle;
use crate::server::session::{Session, SessionStore};

/// Longest accepted custom search query.
pub const MAX_QUERY_LENGTH: usize = 2048;

/// Resource aggregator.
#[derive(Clone)]
pub struct Aggregator {
    client: FhirClient,
    sessions: Arc<dyn SessionStore>,
}

impl Aggregator {
    #[must_use]
    pub fn new(client: FhirClient, sessions: Arc<dyn SessionStore>) -> Self {
        Self { client, sessions }
    }

    /// Fetch `kinds` (all kinds when empty) for a session and merge the results.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` / `SessionExpired` before any outbound call;
    /// `AllResourcesFailed` when no kind succeeded; `SessionExpired` when
    /// nothing succeeded and the upstream rejected the credential.
    pub async fn aggregate(
        &self,
        session_id: &str,
        kinds: &[ResourceKind],
    ) -> AggregationResult<AggregatedPayload> {
        let session = self.live_session(session_id).await?;
        let kinds = dedup_kinds(kinds);

        tracing::debug!(
            session_id = %session_id,
            kinds = kinds.len(),
            "Aggregating resources"
        );

        let fetches = kinds.iter().map(|&kind| {
            let session = &session;
            async move { (kind, self.fetch_kind(session, kind).await) }
        });
        let results = join_all(fetches).await;

        let mut payload = AggregatedPayload::new(&session, kinds);
        for (kind, result) in results {
            match result {
                Ok(bundle) => payload.record_success(kind, bundle),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, kind = %kind, error = %e, "Resource fetch failed");
                    payload.metadata.needs_reauth |= e.needs_reauth();
                    payload.record_failure(kind, &e.to_string());
                }
            }
        }

        if payload.metadata.needs_reauth {
            self.sessions.mark_expired(session_id).await;
        }

        if payload.metadata.resources_fetched.is_empty() {
            if payload.metadata.needs_reauth {
                return Err(AggregationError::SessionExpired);
            }
            return Err(AggregationError::AllResourcesFailed { errors: payload.metadata.errors });
        }

        tracing::info!(
            session_id = %session_id,
            fetched = payload.metadata.resources_fetched.len(),
            failed = payload.metadata.resources_failed.len(),
            "Aggregation complete"
        );
        Ok(payload)
    }

    /// Run one search of `kind` with caller-supplied parameters.
    ///
    /// The search stays on the session's server and, when the session has
    /// patient context, on that patient.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` / `SessionExpired` before any outbound call;
    /// `InvalidQuery` for an oversized query; `SessionExpired` when the
    /// upstream rejects the credential; `SearchFailed` otherwise.
    pub async fn search(
        &self,
        session_id: &str,
        kind: ResourceKind,
        query: &str,
    ) -> AggregationResult<SearchResult> {
        let session = self.live_session(session_id).await?;
        if query.len() > MAX_QUERY_LENGTH {
            return Err(AggregationError::InvalidQuery(format!(
                "query exceeds {MAX_QUERY_LENGTH} characters"
            )));
        }

        let result = match kind.custom_search_url(&session.fhir_base_url, session.patient_id.as_deref(), query) {
            Ok(url) => {
                tracing::debug!(session_id = %session_id, kind = %kind, url = %url, "Custom search");
                let sent = url.query().unwrap_or_default().to_string();
                self.fetch(&url, &session).await.map(|bundle| SearchResult::new(&session, kind, sent, bundle))
            }
            Err(e) => Err(FetchError::Transport(format!("invalid FHIR base URL: {e}"))),
        };

        match result {
            Ok(found) => Ok(found),
            Err(FetchError::Unauthorized) => {
                self.sessions.mark_expired(session_id).await;
                Err(AggregationError::SessionExpired)
            }
            Err(error) => {
                tracing::warn!(session_id = %session_id, kind = %kind, error = %error, "Custom search failed");
                Err(AggregationError::SearchFailed { resource_type: kind.resource_type(), error })
            }
        }
    }

    async fn live_session(&self, session_id: &str) -> AggregationResult<Arc<Session>> {
        let session = self.sessions.get(session_id).await.ok_or(AggregationError::SessionNotFound)?;
        if self.sessions.is_expired(&session) {
            return Err(AggregationError::SessionExpired);
        }
        Ok(session)
    }

    async fn fetch_kind(&self, session: &Session, kind: ResourceKind) -> Result<Bundle, FetchError> {
        let url = kind
            .search_url(&session.fhir_base_url, session.patient_id.as_deref())
            .map_err(|e| FetchError::Transport(format!("invalid FHIR base URL: {e}")))?;
        self.fetch(&url, session).await
    }

    async fn fetch(&self, url: &Url, session: &Session) -> Result<Bundle, FetchError> {
        let body = self.client.search(url, session.access_token()).await?;
        Bundle::from_value(body).map_err(FetchError::Malformed)
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator").field("client", &self.client).finish_non_exhaustive()
    }
}

/// Empty means every kind; duplicates keep their first position.
fn dedup_kinds(kinds: &[ResourceKind]) -> Vec<ResourceKind> {
    if kinds.is_empty() {
        return ResourceKind::ALL.to_vec();
    }
    let mut unique = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        if !unique.contains(&kind) {
            unique.push(kind);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_kinds() {
        assert_eq!(dedup_kinds(&[]), ResourceKind::ALL.to_vec());
        assert_eq!(
            dedup_kinds(&[ResourceKind::Observation, ResourceKind::Patient, ResourceKind::Observation]),
            vec![ResourceKind::Observation, ResourceKind::Patient]
        );
    }
}
