//! HTTP transport.
//!
//! Routes the launch handshake, session endpoints and aggregated data
//! endpoint onto one axum router with shared state.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::oauth::handlers::{handle_callback, handle_launch, handle_smart_config};
use super::oauth::{AuthorizationFlow, PendingAuthorizationStore};
use super::responses::error_response;
use super::session::{InMemorySessionStore, SessionStore};
use crate::aggregator::{Aggregator, ResourceKind, parse_kind_list};
use crate::client::FhirClient;
use crate::config::Config;
use crate::discovery::Discovery;

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub config: Arc<Config>,
    pub flow: AuthorizationFlow,
    pub discovery: Discovery,
    pub aggregator: Aggregator,
    pub sessions: Arc<dyn SessionStore>,
}

impl HttpState {
    /// Wire up every component with an in-memory session store.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let sessions = Arc::new(InMemorySessionStore::new(config.expired_session_retention));
        let pending = Arc::new(PendingAuthorizationStore::new(config.pending_ttl));
        Self::with_stores(config, sessions, pending)
    }

    /// Wire up every component around the given stores.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn with_stores(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        pending: Arc<PendingAuthorizationStore>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let client = FhirClient::new(&config)?;
        let discovery = Discovery::new(client.clone(), &config);
        let flow = AuthorizationFlow::new(
            Arc::clone(&config),
            client.clone(),
            discovery.clone(),
            pending,
            Arc::clone(&sessions),
        );
        let aggregator = Aggregator::new(client, Arc::clone(&sessions));

        Ok(Self { config, flow, discovery, aggregator, sessions })
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<HttpState>) -> Router {
    let cors = cors_layer(&state.config.frontend_url);

    let mut router = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        // SMART launch handshake
        .route("/launch", get(handle_launch))
        .route("/callback", get(handle_callback))
        .route("/smart-config", get(handle_smart_config))
        // Sessions
        .route("/session/status/{session_id}", get(handle_session_status))
        .route("/session/{session_id}", delete(handle_logout))
        // Data
        .route("/patient-data/{session_id}", get(handle_patient_data))
        .route("/fhir-resource/{session_id}/{resource_type}", get(handle_fhir_resource))
        .route("/fhir-search/{session_id}", get(handle_fhir_search));

    if state.config.expose_session_list {
        router = router.route("/sessions", get(handle_sessions_list));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Allow the presentation layer's origin only.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = url::Url::parse(frontend_url)
        .ok()
        .map(|u| u.origin().ascii_serialization())
        .and_then(|o| HeaderValue::from_str(&o).ok());

    let Some(origin) = origin else {
        tracing::warn!(frontend_url = %frontend_url, "Frontend URL has no usable origin, CORS disabled");
        return CorsLayer::new();
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

async fn health_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "smart-launch-backend",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.count().await,
        "pending_authorizations": state.flow.pending().count().await
    }))
}

/// `GET /session/status/{session_id}`
async fn handle_session_status(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.sessions.get(&session_id).await else {
        return error_response(StatusCode::NOT_FOUND, "session_not_found", "Session not found");
    };
    Json(session.summary()).into_response()
}

/// `DELETE /session/{session_id}`
async fn handle_logout(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
) -> Response {
    if state.sessions.remove(&session_id).await {
        tracing::info!(session_id = %session_id, "Session removed");
        Json(serde_json::json!({ "status": "logged_out", "session_id": session_id })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "session_not_found", "Session not found")
    }
}

/// List sessions for debugging. Ids are withheld: an id alone grants data access.
async fn handle_sessions_list(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let mut sessions: Vec<_> =
        state.sessions.list().await.iter().map(|s| s.summary().without_id()).collect();
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions
    }))
}

#[derive(Debug, Deserialize)]
struct PatientDataQuery {
    resources: Option<String>,
}

/// `GET /patient-data/{session_id}[?resources=Patient,Observation]`
async fn handle_patient_data(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
    Query(query): Query<PatientDataQuery>,
) -> Response {
    let kinds = match parse_kind_list(query.resources.as_deref().unwrap_or_default()) {
        Ok(kinds) => kinds,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_request", &e.to_string()),
    };

    match state.aggregator.aggregate(&session_id, &kinds).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /fhir-resource/{session_id}/{resource_type}`
async fn handle_fhir_resource(
    State(state): State<Arc<HttpState>>,
    Path((session_id, resource_type)): Path<(String, String)>,
) -> Response {
    let kind: ResourceKind = match resource_type.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_request", &e.to_string()),
    };

    match state.aggregator.aggregate(&session_id, &[kind]).await {
        Ok(payload) => Json(serde_json::json!({
            "resource_type": kind.resource_type(),
            "data": payload.get(kind),
            "metadata": payload.metadata
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct FhirSearchQuery {
    resource_type: Option<String>,
    #[serde(default)]
    query: String,
}

/// `GET /fhir-search/{session_id}?resource_type=Observation&query=code%3D8867-4`
async fn handle_fhir_search(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
    Query(params): Query<FhirSearchQuery>,
) -> Response {
    let kind = match params.resource_type.as_deref().map(str::parse::<ResourceKind>) {
        None => ResourceKind::Patient,
        Some(Ok(kind)) => kind,
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, "invalid_request", &e.to_string()),
    };

    match state.aggregator.search(&session_id, kind, &params.query).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}
