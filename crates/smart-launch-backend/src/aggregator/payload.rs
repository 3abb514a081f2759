//! The merged multi-resource response.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::kinds::ResourceKind;
use crate::models::Bundle;
use crate::server::session::Session;

/// One bundle per fetched kind plus fetch metadata.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<Bundle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<Bundle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounters: Option<Bundle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub medications: Option<Bundle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_reports: Option<Bundle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedures: Option<Bundle>,

    pub metadata: PayloadMetadata,
}

/// What was attempted, what came back, and what went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadMetadata {
    pub session_id: String,
    pub fhir_server: String,
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub fetch_timestamp: DateTime<Utc>,
    pub resources_attempted: Vec<ResourceKind>,
    pub resources_fetched: Vec<ResourceKind>,
    pub resources_failed: Vec<ResourceKind>,
    /// `"{ResourceType}: {reason}"`, in request order.
    pub errors: Vec<String>,
    /// Entries per fetched payload key.
    pub entry_counts: BTreeMap<&'static str, usize>,
    /// Set when the upstream rejected the credential.
    pub needs_reauth: bool,
    pub token_info: TokenInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub expires_at: Option<DateTime<Utc>>,
    pub time_remaining_secs: Option<i64>,
}

impl TokenInfo {
    fn of(session: &Session) -> Self {
        Self { expires_at: session.expires_at, time_remaining_secs: session.time_remaining_secs() }
    }
}

/// Result of one caller-defined search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub resource_type: ResourceKind,
    /// Query string actually sent upstream, after patient pinning.
    pub query: String,
    pub data: Bundle,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMetadata {
    pub session_id: String,
    pub fhir_server: String,
    pub patient_id: Option<String>,
    pub fetch_timestamp: DateTime<Utc>,
    pub total_results: Option<u64>,
    pub entry_count: usize,
    pub token_info: TokenInfo,
}

impl SearchResult {
    pub(crate) fn new(session: &Session, kind: ResourceKind, query: String, data: Bundle) -> Self {
        let metadata = SearchMetadata {
            session_id: session.id.clone(),
            fhir_server: session.fhir_base_url.clone(),
            patient_id: session.patient_id.clone(),
            fetch_timestamp: Utc::now(),
            total_results: data.total,
            entry_count: data.entry_count(),
            token_info: TokenInfo::of(session),
        };
        Self { resource_type: kind, query, data, metadata }
    }
}

impl AggregatedPayload {
    /// An empty payload for `session`, about to be filled for `attempted`.
    pub(crate) fn new(session: &Session, attempted: Vec<ResourceKind>) -> Self {
        Self {
            patient: None,
            observations: None,
            encounters: None,
            medications: None,
            diagnostic_reports: None,
            procedures: None,
            metadata: PayloadMetadata {
                session_id: session.id.clone(),
                fhir_server: session.fhir_base_url.clone(),
                patient_id: session.patient_id.clone(),
                encounter_id: session.encounter_id.clone(),
                fetch_timestamp: Utc::now(),
                resources_attempted: attempted,
                resources_fetched: Vec::new(),
                resources_failed: Vec::new(),
                errors: Vec::new(),
                entry_counts: BTreeMap::new(),
                needs_reauth: false,
                token_info: TokenInfo::of(session),
            },
        }
    }

    fn slot_mut(&mut self, kind: ResourceKind) -> &mut Option<Bundle> {
        match kind {
            ResourceKind::Patient => &mut self.patient,
            ResourceKind::Observation => &mut self.observations,
            ResourceKind::Encounter => &mut self.encounters,
            ResourceKind::MedicationRequest => &mut self.medications,
            ResourceKind::DiagnosticReport => &mut self.diagnostic_reports,
            ResourceKind::Procedure => &mut self.procedures,
        }
    }

    /// The fetched bundle for `kind`, if it succeeded.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<&Bundle> {
        match kind {
            ResourceKind::Patient => self.patient.as_ref(),
            ResourceKind::Observation => self.observations.as_ref(),
            ResourceKind::Encounter => self.encounters.as_ref(),
            ResourceKind::MedicationRequest => self.medications.as_ref(),
            ResourceKind::DiagnosticReport => self.diagnostic_reports.as_ref(),
            ResourceKind::Procedure => self.procedures.as_ref(),
        }
    }

    pub(crate) fn record_success(&mut self, kind: ResourceKind, bundle: Bundle) {
        self.metadata.entry_counts.insert(kind.payload_key(), bundle.entry_count());
        self.metadata.resources_fetched.push(kind);
        *self.slot_mut(kind) = Some(bundle);
    }

    pub(crate) fn record_failure(&mut self, kind: ResourceKind, reason: &str) {
        self.metadata.resources_failed.push(kind);
        self.metadata.errors.push(format!("{}: {reason}", kind.resource_type()));
    }
}
