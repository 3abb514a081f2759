//! Configuration for the SMART launch backend.

use std::time::Duration;

/// Protocol and timing constants.
pub mod api {
    use std::time::Duration;

    /// Client identifier registered with the SMART sandbox.
    pub const DEFAULT_CLIENT_ID: &str = "my_web_app";

    /// Default backend port.
    pub const DEFAULT_PORT: u16 = 9001;

    /// Where the presentation layer is served.
    pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3002";

    /// Path of the SMART configuration document relative to the issuer.
    pub const SMART_CONFIGURATION_PATH: &str = ".well-known/smart-configuration";

    /// Path of the FHIR CapabilityStatement relative to the issuer.
    pub const CAPABILITY_STATEMENT_PATH: &str = "metadata";

    /// Media type requested from the FHIR server.
    pub const FHIR_JSON: &str = "application/fhir+json";

    /// User agent sent upstream.
    pub const USER_AGENT: &str = concat!("smart-launch-backend/", env!("CARGO_PKG_VERSION"));

    /// Discovery request timeout.
    pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Token exchange timeout.
    pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

    /// Per-resource-kind fetch timeout.
    pub const RESOURCE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Pending authorization lifetime (10 minutes).
    pub const PENDING_AUTHORIZATION_TTL: Duration = Duration::from_secs(600);

    /// How long discovered endpoints stay fresh (5 minutes).
    pub const DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(300);

    /// Maximum number of cached issuers.
    pub const DISCOVERY_CACHE_MAX_SIZE: u64 = 256;

    /// How long an expired session is kept so it reports "expired" instead of "not found".
    pub const EXPIRED_SESSION_RETENTION: Duration = Duration::from_secs(3600);

    /// Transient retries for resource fetches (always inside the per-kind deadline).
    pub const RESOURCE_RETRIES: u32 = 1;

    /// Maximum keepalive connections.
    pub const MAX_KEEPALIVE: usize = 10;

    /// Keepalive expiry.
    pub const KEEPALIVE_EXPIRY: Duration = Duration::from_secs(30);
}

/// Scopes requested at launch.
pub mod scopes {
    /// Fixed scope set: EHR launch with patient context plus read access to
    /// every resource kind the aggregator fetches.
    pub const REQUESTED: &[&str] = &[
        "launch",
        "launch/patient",
        "openid",
        "fhirUser",
        "patient/Patient.read",
        "patient/Observation.read",
        "patient/Encounter.read",
        "patient/MedicationRequest.read",
        "patient/DiagnosticReport.read",
        "patient/Procedure.read",
    ];

    /// Space-separated scope string for the authorization request.
    #[must_use]
    pub fn requested() -> String {
        REQUESTED.join(" ")
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// OAuth client identifier.
    pub client_id: String,

    /// OAuth client secret. `None` means a public client.
    pub client_secret: Option<String>,

    /// Registered redirect URI (the `/callback` endpoint of this backend).
    pub redirect_uri: String,

    /// Presentation layer URL the callback redirects to.
    pub frontend_url: String,

    /// Scope string sent to the authorization server.
    pub scope: String,

    /// Issuers allowed to launch this app. Empty allows any issuer.
    pub allowed_issuers: Vec<String>,

    /// Send PKCE S256 challenges with authorization requests.
    pub use_pkce: bool,

    /// Discovery request timeout.
    pub discovery_timeout: Duration,

    /// Token exchange timeout.
    pub token_timeout: Duration,

    /// Per-resource-kind fetch timeout.
    pub resource_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Transient retries for resource fetches.
    pub resource_retries: u32,

    /// Pending authorization lifetime.
    pub pending_ttl: Duration,

    /// Discovery cache freshness window. Zero disables caching.
    pub discovery_cache_ttl: Duration,

    /// Expired session retention before cleanup.
    pub expired_session_retention: Duration,

    /// Serve the `/sessions` debugging list. Off unless explicitly enabled.
    pub expose_session_list: bool,
}

impl Config {
    /// Create a configuration for the given client and backend port.
    ///
    /// The redirect URI defaults to this backend's own `/callback`.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>, port: u16) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: format!("http://localhost:{port}/callback"),
            frontend_url: api::DEFAULT_FRONTEND_URL.to_string(),
            scope: scopes::requested(),
            allowed_issuers: Vec::new(),
            use_pkce: true,
            discovery_timeout: api::DISCOVERY_TIMEOUT,
            token_timeout: api::TOKEN_TIMEOUT,
            resource_timeout: api::RESOURCE_TIMEOUT,
            connect_timeout: api::CONNECT_TIMEOUT,
            resource_retries: api::RESOURCE_RETRIES,
            pending_ttl: api::PENDING_AUTHORIZATION_TTL,
            discovery_cache_ttl: api::DISCOVERY_CACHE_TTL,
            expired_session_retention: api::EXPIRED_SESSION_RETENTION,
            expose_session_list: false,
        }
    }

    /// Create a test configuration with short timeouts and no caching or retries.
    #[must_use]
    pub fn for_testing(backend_url: &str) -> Self {
        Self {
            client_id: "test-client".to_string(),
            client_secret: None,
            redirect_uri: format!("{backend_url}/callback"),
            frontend_url: "http://frontend.test".to_string(),
            scope: scopes::requested(),
            allowed_issuers: Vec::new(),
            use_pkce: true,
            discovery_timeout: Duration::from_secs(2),
            token_timeout: Duration::from_secs(2),
            resource_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            resource_retries: 0,
            pending_ttl: api::PENDING_AUTHORIZATION_TTL,
            discovery_cache_ttl: Duration::ZERO, // No caching in tests
            expired_session_retention: api::EXPIRED_SESSION_RETENTION,
            expose_session_list: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Reads `CLIENT_ID`, `CLIENT_SECRET`, `BACKEND_PORT`, `REDIRECT_URI`,
    /// `FRONTEND_URL`, `ALLOWED_ISSUERS` (comma-separated), `SMART_USE_PKCE` and
    /// `EXPOSE_SESSION_LIST`.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let client_id =
            std::env::var("CLIENT_ID").unwrap_or_else(|_| api::DEFAULT_CLIENT_ID.to_string());
        let client_secret = std::env::var("CLIENT_SECRET").ok().filter(|s| !s.is_empty());
        let port = match std::env::var("BACKEND_PORT") {
            Ok(raw) => raw.parse()?,
            Err(_) => api::DEFAULT_PORT,
        };

        let mut config = Self::new(client_id, client_secret, port);

        if let Ok(uri) = std::env::var("REDIRECT_URI") {
            config.redirect_uri = uri;
        }
        if let Ok(url) = std::env::var("FRONTEND_URL") {
            config.frontend_url = url;
        }
        if let Ok(list) = std::env::var("ALLOWED_ISSUERS") {
            config.allowed_issuers = parse_issuer_list(&list);
        }
        if let Ok(flag) = std::env::var("SMART_USE_PKCE") {
            config.use_pkce = flag.parse()?;
        }
        if let Ok(flag) = std::env::var("EXPOSE_SESSION_LIST") {
            config.expose_session_list = flag.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the URLs in this configuration are absolute.
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.redirect_uri)
            .map_err(|e| anyhow::anyhow!("invalid redirect URI {:?}: {e}", self.redirect_uri))?;
        url::Url::parse(&self.frontend_url)
            .map_err(|e| anyhow::anyhow!("invalid frontend URL {:?}: {e}", self.frontend_url))?;
        if self.client_id.trim().is_empty() {
            anyhow::bail!("client id must not be empty");
        }
        Ok(())
    }

    /// Check if this is a confidential client.
    #[must_use]
    pub const fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// Check whether an issuer may launch this app.
    #[must_use]
    pub fn issuer_allowed(&self, issuer: &str) -> bool {
        if self.allowed_issuers.is_empty() {
            return true;
        }
        let issuer = issuer.trim_end_matches('/');
        self.allowed_issuers.iter().any(|allowed| allowed.trim_end_matches('/') == issuer)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(api::DEFAULT_CLIENT_ID, None, api::DEFAULT_PORT)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("is_confidential", &self.is_confidential())
            .field("redirect_uri", &self.redirect_uri)
            .field("frontend_url", &self.frontend_url)
            .field("allowed_issuers", &self.allowed_issuers)
            .field("use_pkce", &self.use_pkce)
            .finish()
    }
}

fn parse_issuer_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.client_id, api::DEFAULT_CLIENT_ID);
        assert_eq!(config.redirect_uri, "http://localhost:9001/callback");
        assert!(!config.is_confidential());
        assert!(config.use_pkce);
    }

    #[test]
    fn test_config_with_secret() {
        let config = Config::new("app", Some("s3cret".to_string()), 8080);
        assert!(config.is_confidential());
        assert_eq!(config.redirect_uri, "http://localhost:8080/callback");
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = Config::new("app", Some("s3cret".to_string()), 8080);
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("is_confidential"));
    }

    #[test]
    fn test_scopes_cover_every_fetched_kind() {
        let scope = scopes::requested();
        for kind in ["Patient", "Observation", "Encounter", "MedicationRequest", "DiagnosticReport"] {
            assert!(scope.contains(&format!("patient/{kind}.read")), "missing {kind}");
        }
        assert!(scope.contains("launch/patient"));
    }

    #[test]
    fn test_issuer_allowlist() {
        let mut config = Config::default();
        assert!(config.issuer_allowed("https://anything.example/fhir"));

        config.allowed_issuers = parse_issuer_list(" https://a.example/fhir/ ,, https://b.example ");
        assert_eq!(config.allowed_issuers.len(), 2);
        assert!(config.issuer_allowed("https://a.example/fhir"));
        assert!(config.issuer_allowed("https://b.example/"));
        assert!(!config.issuer_allowed("https://c.example"));
    }

    #[test]
    fn test_validate_rejects_relative_redirect() {
        let mut config = Config::default();
        config.redirect_uri = "/callback".to_string();
        assert!(config.validate().is_err());
    }
}
