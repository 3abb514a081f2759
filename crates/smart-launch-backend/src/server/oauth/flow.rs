//! SMART App Launch authorization flow.
//!
//! `launch` and `callback` are two independent steps joined only by the
//! pending authorization store:
//!
//! ```text
//! Idle → AwaitingAuthorization → AwaitingCallback → TokenExchange → SessionEstablished
//!   └────────────── Aborted (from any non-terminal state) ──────────────┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use url::Url;

use super::pkce;
use super::store::PendingAuthorizationStore;
use super::types::{FlowState, PendingAuthorization};
use crate::client::FhirClient;
use crate::config::Config;
use crate::discovery::Discovery;
use crate::error::{CallbackError, LaunchError};
use crate::server::session::{SessionGrant, SessionStore};

/// Longest accepted `launch`, `iss`, `code` or `state` value.
pub const MAX_PARAM_LENGTH: usize = 2048;

/// Parameters of one authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
    pub audience: &'a str,
    pub launch_token: &'a str,
    /// S256 challenge, when PKCE is in use.
    pub code_challenge: Option<&'a str>,
}

/// Build the authorization redirect URL, keeping any query the endpoint already has.
#[must_use]
pub fn build_authorize_url(authorize_endpoint: &Url, request: &AuthorizationRequest<'_>) -> Url {
    let mut url = authorize_endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", request.client_id)
            .append_pair("redirect_uri", request.redirect_uri)
            .append_pair("scope", request.scope)
            .append_pair("state", request.state)
            .append_pair("aud", request.audience)
            .append_pair("launch", request.launch_token);
        if let Some(challenge) = request.code_challenge {
            query
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", pkce::METHOD_S256);
        }
    }
    url
}

/// Authorization flow controller.
#[derive(Clone)]
pub struct AuthorizationFlow {
    config: Arc<Config>,
    client: FhirClient,
    discovery: Discovery,
    pending: Arc<PendingAuthorizationStore>,
    sessions: Arc<dyn SessionStore>,
}

impl AuthorizationFlow {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        client: FhirClient,
        discovery: Discovery,
        pending: Arc<PendingAuthorizationStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self { config, client, discovery, pending, sessions }
    }

    /// The pending authorization store.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingAuthorizationStore> {
        &self.pending
    }

    /// Start an EHR launch and return the authorization URL to redirect to.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for missing or unusable parameters, `IssuerNotAllowed`
    /// when an allowlist is configured and excludes `issuer`, `DiscoveryFailed`
    /// when the issuer's endpoints cannot be resolved.
    pub async fn launch(&self, launch_token: &str, issuer: &str) -> Result<Url, LaunchError> {
        let launch_token = required("launch", launch_token).map_err(LaunchError::InvalidRequest)?;
        // `aud` echoes `iss` exactly as supplied; the normalized form keys
        // the allowlist, discovery and the session's base URL.
        let audience = required("iss", issuer).map_err(LaunchError::InvalidRequest)?;
        let issuer = normalize_issuer(audience)?;

        if !self.config.issuer_allowed(&issuer) {
            tracing::warn!(issuer = %issuer, "Launch from issuer outside allowlist");
            return Err(LaunchError::IssuerNotAllowed(issuer));
        }

        tracing::debug!(issuer = %issuer, flow_state = %FlowState::AwaitingAuthorization, "Launch received");

        let endpoints = self.discovery.discover(&issuer).await.inspect_err(|e| {
            tracing::warn!(issuer = %issuer, error = %e, flow_state = %FlowState::Aborted, "Discovery failed");
        })?;

        let state = PendingAuthorizationStore::generate_state();
        let code_verifier = self.config.use_pkce.then(pkce::generate_verifier);
        let code_challenge = code_verifier.as_deref().map(pkce::challenge_s256);

        let redirect = build_authorize_url(
            &endpoints.authorize_url,
            &AuthorizationRequest {
                client_id: &self.config.client_id,
                redirect_uri: &self.config.redirect_uri,
                scope: &self.config.scope,
                state: &state,
                audience,
                launch_token,
                code_challenge: code_challenge.as_deref(),
            },
        );

        self.pending
            .insert(PendingAuthorization {
                state,
                issuer: issuer.clone(),
                launch_token: launch_token.to_string(),
                token_url: endpoints.token_url,
                code_verifier,
                created_at: Instant::now(),
            })
            .await;

        tracing::info!(issuer = %issuer, flow_state = %FlowState::AwaitingCallback, "Redirecting to authorization server");
        Ok(redirect)
    }

    /// Complete the flow: consume `state`, exchange `code`, create a session.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for missing parameters, `UnknownOrExpiredState` when
    /// `state` is not live (no outbound call is made), `TokenExchangeFailed`
    /// when the token endpoint rejects the code or returns an unusable body.
    pub async fn callback(&self, code: &str, state: &str) -> Result<String, CallbackError> {
        let code = required("code", code).map_err(CallbackError::InvalidRequest)?;
        let state = required("state", state).map_err(CallbackError::InvalidRequest)?;

        let Some(pending) = self.pending.consume(state).await else {
            tracing::warn!(flow_state = %FlowState::Aborted, "Callback with unknown or expired state");
            return Err(CallbackError::UnknownOrExpiredState);
        };

        tracing::debug!(issuer = %pending.issuer, flow_state = %FlowState::TokenExchange, "Exchanging authorization code");

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(verifier) = pending.code_verifier.as_deref() {
            form.push(("code_verifier", verifier));
        }
        let basic_auth = self
            .config
            .client_secret
            .as_deref()
            .map(|secret| (self.config.client_id.as_str(), secret));

        let token = self
            .client
            .exchange_code(&pending.token_url, &form, basic_auth)
            .await
            .inspect_err(|e| {
                tracing::warn!(issuer = %pending.issuer, error = %e, flow_state = %FlowState::Aborted, "Token exchange failed");
            })?;

        let claims = token.id_token_claims().unwrap_or_default();
        let expires_at = token
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        let grant = SessionGrant {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_at,
            patient_id: token.patient.or(claims.patient),
            encounter_id: token.encounter.or(claims.encounter),
            fhir_user: claims.fhir_user,
            scope: token.scope,
            fhir_base_url: pending.issuer,
        };
        let has_patient = grant.patient_id.is_some();
        let issuer = grant.fhir_base_url.clone();

        let session_id = self.sessions.create(grant).await;

        tracing::info!(
            issuer = %issuer,
            patient_context = has_patient,
            flow_state = %FlowState::SessionEstablished,
            "Session established"
        );
        Ok(session_id)
    }

    /// Handle an authorization server error redirect: consume `state` and report the denial.
    pub async fn deny(&self, state: Option<&str>, error: &str, description: Option<&str>) -> CallbackError {
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            let _ = self.pending.consume(state).await;
        }
        tracing::warn!(error = %error, flow_state = %FlowState::Aborted, "Authorization denied");
        CallbackError::AuthorizationDenied {
            error: error.to_string(),
            description: description.map(str::to_string),
        }
    }
}

impl std::fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlow").field("config", &self.config).finish_non_exhaustive()
    }
}

fn required<'a>(name: &str, value: &'a str) -> Result<&'a str, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("missing {name}"));
    }
    if value.len() > MAX_PARAM_LENGTH {
        return Err(format!("{name} exceeds {MAX_PARAM_LENGTH} characters"));
    }
    Ok(value)
}

/// Parse the issuer and strip trailing slashes so it compares and joins consistently.
fn normalize_issuer(issuer: &str) -> Result<String, LaunchError> {
    let parsed = Url::parse(issuer)
        .map_err(|e| LaunchError::invalid_request(format!("iss is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LaunchError::invalid_request("iss must be an http(s) URL"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(LaunchError::invalid_request("iss must not carry a query or fragment"));
    }
    Ok(issuer.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(state: &'a str, challenge: Option<&'a str>) -> AuthorizationRequest<'a> {
        AuthorizationRequest {
            client_id: "my_web_app",
            redirect_uri: "http://localhost:9001/callback",
            scope: "launch openid",
            state,
            audience: "https://ehr.example/fhir",
            launch_token: "xyz",
            code_challenge: challenge,
        }
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_authorize_url_parameters() {
        let endpoint = Url::parse("https://auth.example/authorize").unwrap();
        let url = build_authorize_url(&endpoint, &request("s1", None));

        assert_eq!(query_value(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_value(&url, "aud").as_deref(), Some("https://ehr.example/fhir"));
        assert_eq!(query_value(&url, "launch").as_deref(), Some("xyz"));
        assert_eq!(query_value(&url, "redirect_uri").as_deref(), Some("http://localhost:9001/callback"));
        assert_eq!(query_value(&url, "scope").as_deref(), Some("launch openid"));
        assert!(query_value(&url, "code_challenge").is_none());
    }

    #[test]
    fn test_authorize_url_keeps_existing_query_and_adds_pkce() {
        let endpoint = Url::parse("https://auth.example/authorize?tenant=a").unwrap();
        let url = build_authorize_url(&endpoint, &request("s1", Some("abc")));

        assert_eq!(query_value(&url, "tenant").as_deref(), Some("a"));
        assert_eq!(query_value(&url, "code_challenge").as_deref(), Some("abc"));
        assert_eq!(query_value(&url, "code_challenge_method").as_deref(), Some("S256"));
    }

    #[test]
    fn test_required_params() {
        assert_eq!(required("iss", "  x "), Ok("x"));
        assert!(required("iss", "   ").is_err());
        assert!(required("iss", &"a".repeat(MAX_PARAM_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_normalize_issuer() {
        assert_eq!(normalize_issuer("https://ehr.example/fhir/").unwrap(), "https://ehr.example/fhir");
        assert!(matches!(normalize_issuer("ehr.example"), Err(LaunchError::InvalidRequest(_))));
        assert!(normalize_issuer("javascript:alert(1)").is_err());
        assert!(normalize_issuer("https://ehr.example/fhir?x=1").is_err());
    }
}
