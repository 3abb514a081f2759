//! SMART launch endpoint handlers.
//!
//! Implements:
//! - `GET /launch`: EHR launch entry point
//! - `GET /callback`: authorization server redirect target
//! - `GET /smart-config`: discovery report for operators

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use url::Url;

use crate::server::responses::{error_response, redirect};
use crate::server::transport::HttpState;

// ─── EHR Launch ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LaunchQuery {
    pub launch: Option<String>,
    pub iss: Option<String>,
}

/// `GET /launch?launch=&iss=`
///
/// Discover the issuer's endpoints and send the browser to its authorization server.
pub async fn handle_launch(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<LaunchQuery>,
) -> Response {
    let launch = query.launch.as_deref().unwrap_or_default();
    let iss = query.iss.as_deref().unwrap_or_default();

    match state.flow.launch(launch, iss).await {
        Ok(url) => redirect(url.as_str()),
        Err(e) => {
            tracing::info!(error = %e, aborted_in = %e.aborted_in(), "Launch aborted");
            e.into_response()
        }
    }
}

// ─── Callback ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET /callback?code=&state=`
///
/// Exchange the code and send the browser to the presentation layer with its session id.
pub async fn handle_callback(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error.as_deref() {
        return state
            .flow
            .deny(query.state.as_deref(), error, query.error_description.as_deref())
            .await
            .into_response();
    }

    let code = query.code.as_deref().unwrap_or_default();
    let oauth_state = query.state.as_deref().unwrap_or_default();

    match state.flow.callback(code, oauth_state).await {
        Ok(session_id) => match frontend_redirect(&state.config.frontend_url, &session_id) {
            Ok(url) => redirect(url.as_str()),
            Err(e) => {
                tracing::error!(error = %e, "Invalid frontend URL");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "invalid frontend URL")
            }
        },
        Err(e) => {
            tracing::info!(error = %e, aborted_in = %e.aborted_in(), "Callback aborted");
            e.into_response()
        }
    }
}

/// `{frontend_url}?session={id}`, keeping any query the frontend URL already has.
fn frontend_redirect(frontend_url: &str, session_id: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(frontend_url)?;
    url.query_pairs_mut().append_pair("session", session_id);
    Ok(url)
}

// ─── Discovery Report ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SmartConfigQuery {
    pub iss: Option<String>,
}

/// `GET /smart-config?iss=`
///
/// Run discovery against an issuer and report what was resolved.
pub async fn handle_smart_config(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<SmartConfigQuery>,
) -> Response {
    let Some(iss) = query.iss.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", "missing iss");
    };

    match state.discovery.configuration(iss).await {
        Ok(discovered) => Json(serde_json::json!({
            "status": "ok",
            "issuer": iss.trim_end_matches('/'),
            "source": discovered.source,
            "authorization_endpoint": discovered.endpoints.authorize_url.as_str(),
            "token_endpoint": discovered.endpoints.token_url.as_str(),
            "pkce_s256_supported": discovered.document.supports_s256(),
            "capabilities": discovered.document.capabilities,
            "scopes_supported": discovered.document.scopes_supported,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(issuer = %iss, error = %e, "Discovery report failed");
            error_response(StatusCode::BAD_GATEWAY, "discovery_failed", &e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontend_redirect() {
        let url = frontend_redirect("http://localhost:3002", "abc").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3002/?session=abc");

        let url = frontend_redirect("http://localhost:3002/app?tab=vitals", "abc").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3002/app?tab=vitals&session=abc");
    }
}
