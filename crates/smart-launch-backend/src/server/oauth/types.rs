//! Authorization flow types.

use std::fmt;
use std::time::{Duration, Instant};

use url::Url;

/// Position of one launch attempt in the authorization handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingAuthorization,
    AwaitingCallback,
    TokenExchange,
    SessionEstablished,
    Aborted,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingAuthorization => "awaiting_authorization",
            Self::AwaitingCallback => "awaiting_callback",
            Self::TokenExchange => "token_exchange",
            Self::SessionEstablished => "session_established",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// An authorization request sent to the browser and not yet answered.
pub struct PendingAuthorization {
    pub state: String,
    pub issuer: String,
    pub launch_token: String,
    /// Token endpoint resolved at launch, so the callback needs no second discovery.
    pub token_url: Url,
    /// PKCE verifier, present when the request carried a challenge.
    pub code_verifier: Option<String>,
    pub created_at: Instant,
}

impl PendingAuthorization {
    /// Check if the entry has outlived `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

impl fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("issuer", &self.issuer)
            .field("token_url", &self.token_url.as_str())
            .field("pkce", &self.code_verifier.is_some())
            .finish_non_exhaustive()
    }
}
