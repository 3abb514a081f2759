//! Error types for the SMART launch backend.
//!
//! Uses `thiserror` for structured error handling. Every error is scoped to a
//! single request; none is process-fatal.

use std::time::Duration;

use crate::server::oauth::FlowState;

/// Errors from SMART configuration discovery.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Network failure, timeout, or non-success status from the issuer.
    #[error("SMART configuration for {issuer} unreachable: {reason}")]
    Unreachable {
        /// Issuer base URL
        issuer: String,
        /// What went wrong
        reason: String,
    },

    /// The document was fetched but lacks usable endpoint URLs.
    #[error("SMART configuration for {issuer} malformed: {reason}")]
    Malformed {
        /// Issuer base URL
        issuer: String,
        /// What was missing or invalid
        reason: String,
    },
}

impl DiscoveryError {
    /// Create an unreachable error.
    #[must_use]
    pub fn unreachable(issuer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable { issuer: issuer.into(), reason: reason.into() }
    }

    /// Create a malformed error.
    #[must_use]
    pub fn malformed(issuer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed { issuer: issuer.into(), reason: reason.into() }
    }

    /// Classify a transport error from the discovery request.
    #[must_use]
    pub fn from_transport(issuer: &str, err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::unreachable(issuer, format!("timed out after {timeout:?}"))
        } else if err.is_decode() {
            Self::malformed(issuer, format!("invalid JSON: {err}"))
        } else {
            Self::unreachable(issuer, err.to_string())
        }
    }
}

/// Errors from the launch step of the authorization flow.
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    /// Missing or unusable `launch` / `iss` parameters.
    #[error("Invalid launch request: {0}")]
    InvalidRequest(String),

    /// The issuer is not on the configured allowlist.
    #[error("Issuer not allowed: {0}")]
    IssuerNotAllowed(String),

    /// Endpoint discovery failed; the launch is aborted.
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(#[from] DiscoveryError),
}

impl LaunchError {
    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Flow state in which the launch was aborted.
    #[must_use]
    pub const fn aborted_in(&self) -> FlowState {
        match self {
            Self::InvalidRequest(_) | Self::IssuerNotAllowed(_) => FlowState::Idle,
            Self::DiscoveryFailed(_) => FlowState::AwaitingAuthorization,
        }
    }
}

/// Errors from the callback step of the authorization flow.
#[derive(thiserror::Error, Debug)]
pub enum CallbackError {
    /// Missing `code` or `state` parameters.
    #[error("Invalid callback request: {0}")]
    InvalidRequest(String),

    /// No live pending authorization for this state (forged, replayed, or abandoned).
    #[error("Unknown or expired authorization state")]
    UnknownOrExpiredState,

    /// The authorization server redirected back with an error.
    #[error("Authorization denied: {error}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationDenied {
        /// OAuth error code
        error: String,
        /// Optional human-readable description
        description: Option<String>,
    },

    /// Token endpoint rejected the code or returned an unusable body.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),
}

impl CallbackError {
    /// Create a token exchange error.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchangeFailed(message.into())
    }

    /// Flow state in which the callback was aborted.
    #[must_use]
    pub const fn aborted_in(&self) -> FlowState {
        match self {
            Self::TokenExchangeFailed(_) => FlowState::TokenExchange,
            _ => FlowState::AwaitingCallback,
        }
    }
}

/// Failure fetching one resource kind. Recorded in the payload, not propagated.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The per-kind deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// Upstream rejected the access token.
    #[error("HTTP 401: access token rejected")]
    Unauthorized,

    /// Upstream returned a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// Body was not a FHIR Bundle.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Connection, DNS, TLS or middleware failure.
    #[error("connection error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Create a status error, trimming long bodies.
    #[must_use]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status { status, message: truncate_error_body(message.into()) }
    }

    /// Returns true if the upstream asked for re-authentication.
    #[must_use]
    pub const fn needs_reauth(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Longest upstream error body kept in an error description.
const MAX_ERROR_BODY: usize = 200;

/// Cut an upstream error body down to `MAX_ERROR_BODY` bytes on a char boundary.
pub(crate) fn truncate_error_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
        body.push('…');
    }
    body
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for FetchError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => Self::from(e),
            reqwest_middleware::Error::Middleware(e) => Self::Transport(e.to_string()),
        }
    }
}

/// Errors from the resource aggregator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    /// No session with this id.
    #[error("Session not found")]
    SessionNotFound,

    /// The session's access token has expired or was rejected upstream.
    #[error("Session expired - relaunch the app to sign in again")]
    SessionExpired,

    /// Every requested resource kind failed.
    #[error("All resource fetches failed: {}", errors.join("; "))]
    AllResourcesFailed {
        /// One description per failed kind, in request order
        errors: Vec<String>,
    },

    /// A caller-supplied search query was rejected before any outbound call.
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),

    /// A single custom search failed upstream.
    #[error("{resource_type} search failed: {error}")]
    SearchFailed {
        /// FHIR resource type searched
        resource_type: &'static str,
        /// Why the search failed
        error: FetchError,
    },
}

/// Result type alias for discovery.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Result type alias for aggregation.
pub type AggregationResult<T> = Result<T, AggregationError>;
