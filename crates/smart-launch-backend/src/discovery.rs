//! SMART configuration discovery.
//!
//! Resolves an issuer's authorization and token endpoints from its published
//! `.well-known/smart-configuration` document, falling back to the
//! `oauth-uris` extension of the FHIR CapabilityStatement when the former is
//! absent. Discovery fails closed: there are no guessed defaults.

use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use url::Url;

use crate::client::FhirClient;
use crate::config::{Config, api};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::models::{CapabilityStatement, SmartConfiguration};

/// Authorization server endpoints resolved for one issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationEndpoints {
    /// Where the browser is sent to authorize.
    pub authorize_url: Url,
    /// Where the code is exchanged for a token.
    pub token_url: Url,
}

/// Which published document the endpoints came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    WellKnown,
    CapabilityStatement,
}

/// Endpoints plus the document they were read from.
#[derive(Debug, Clone)]
pub struct DiscoveredConfiguration {
    pub endpoints: AuthorizationEndpoints,
    pub source: DiscoverySource,
    /// The SMART configuration document. Empty when read from a CapabilityStatement.
    pub document: SmartConfiguration,
}

/// Discovery service with an optional per-issuer cache.
#[derive(Clone)]
pub struct Discovery {
    client: FhirClient,
    cache: Option<Cache<String, DiscoveredConfiguration>>,
}

impl Discovery {
    /// Create a discovery service. A zero cache TTL disables caching.
    #[must_use]
    pub fn new(client: FhirClient, config: &Config) -> Self {
        let cache = (config.discovery_cache_ttl > Duration::ZERO).then(|| {
            Cache::builder()
                .max_capacity(api::DISCOVERY_CACHE_MAX_SIZE)
                .time_to_live(config.discovery_cache_ttl)
                .build()
        });
        Self { client, cache }
    }

    /// Resolve the authorization endpoints for an issuer.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` on network failure, timeout or non-success status,
    /// and `Malformed` when the document lacks usable http(s) endpoint URLs.
    pub async fn discover(&self, issuer: &str) -> DiscoveryResult<AuthorizationEndpoints> {
        self.configuration(issuer).await.map(|c| c.endpoints)
    }

    /// Resolve the full discovered configuration, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Same as [`Discovery::discover`].
    pub async fn configuration(&self, issuer: &str) -> DiscoveryResult<DiscoveredConfiguration> {
        let issuer = issuer.trim_end_matches('/');

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(issuer).await {
                tracing::debug!(issuer = %issuer, "Discovery cache hit");
                return Ok(hit);
            }
        }

        let discovered = self.fetch(issuer).await?;

        if let Some(cache) = &self.cache {
            cache.insert(issuer.to_string(), discovered.clone()).await;
        }
        Ok(discovered)
    }

    async fn fetch(&self, issuer: &str) -> DiscoveryResult<DiscoveredConfiguration> {
        let base = issuer_base(issuer)?;
        let well_known = base
            .join(api::SMART_CONFIGURATION_PATH)
            .map_err(|e| DiscoveryError::malformed(issuer, e.to_string()))?;

        let response = self
            .client
            .get_document(&well_known)
            .await
            .map_err(|e| DiscoveryError::from_transport(issuer, &e, self.client.discovery_timeout()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(issuer = %issuer, "No smart-configuration document, trying CapabilityStatement");
            return self.fetch_capability_statement(issuer, &base).await;
        }

        let document: SmartConfiguration = self.read_json(issuer, response).await?;

        let authorize = document
            .authorization_endpoint
            .as_deref()
            .ok_or_else(|| DiscoveryError::malformed(issuer, "missing authorization_endpoint"))?;
        let token = document
            .token_endpoint
            .as_deref()
            .ok_or_else(|| DiscoveryError::malformed(issuer, "missing token_endpoint"))?;

        let endpoints = AuthorizationEndpoints {
            authorize_url: resolve_endpoint(issuer, &base, authorize)?,
            token_url: resolve_endpoint(issuer, &base, token)?,
        };

        tracing::info!(
            issuer = %issuer,
            authorize = %endpoints.authorize_url,
            token = %endpoints.token_url,
            "Discovered SMART endpoints"
        );

        Ok(DiscoveredConfiguration { endpoints, source: DiscoverySource::WellKnown, document })
    }

    async fn fetch_capability_statement(
        &self,
        issuer: &str,
        base: &Url,
    ) -> DiscoveryResult<DiscoveredConfiguration> {
        let metadata = base
            .join(api::CAPABILITY_STATEMENT_PATH)
            .map_err(|e| DiscoveryError::malformed(issuer, e.to_string()))?;

        let response = self
            .client
            .get_document(&metadata)
            .await
            .map_err(|e| DiscoveryError::from_transport(issuer, &e, self.client.discovery_timeout()))?;

        let statement: CapabilityStatement = self.read_json(issuer, response).await?;

        let (authorize, token) = statement.oauth_uris();
        let (Some(authorize), Some(token)) = (authorize, token) else {
            return Err(DiscoveryError::malformed(
                issuer,
                "no smart-configuration and CapabilityStatement lacks oauth-uris",
            ));
        };

        let endpoints = AuthorizationEndpoints {
            authorize_url: resolve_endpoint(issuer, base, &authorize)?,
            token_url: resolve_endpoint(issuer, base, &token)?,
        };

        tracing::info!(issuer = %issuer, "Discovered SMART endpoints from CapabilityStatement");

        Ok(DiscoveredConfiguration {
            endpoints,
            source: DiscoverySource::CapabilityStatement,
            document: SmartConfiguration::default(),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        issuer: &str,
        response: reqwest::Response,
    ) -> DiscoveryResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::unreachable(issuer, format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::from_transport(issuer, &e, self.client.discovery_timeout()))?;

        serde_json::from_slice(&body)
            .map_err(|e| DiscoveryError::malformed(issuer, format!("invalid JSON: {e}")))
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery").field("cached", &self.cache.is_some()).finish()
    }
}

/// The issuer as a join base: relative endpoints resolve beneath it.
fn issuer_base(issuer: &str) -> DiscoveryResult<Url> {
    let base = Url::parse(&format!("{issuer}/"))
        .map_err(|e| DiscoveryError::malformed(issuer, format!("invalid issuer URL: {e}")))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(DiscoveryError::malformed(issuer, "issuer must be http(s)"));
    }
    Ok(base)
}

fn resolve_endpoint(issuer: &str, base: &Url, raw: &str) -> DiscoveryResult<Url> {
    let url = base
        .join(raw.trim())
        .map_err(|e| DiscoveryError::malformed(issuer, format!("invalid endpoint {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DiscoveryError::malformed(issuer, format!("endpoint {raw:?} is not http(s)")));
    }
    Ok(url)
}
