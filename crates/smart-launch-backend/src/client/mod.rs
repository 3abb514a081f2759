//! Outbound HTTP client for the issuer's authorization and FHIR endpoints.
//!
//! Provides async HTTP client with:
//! - Connection pooling via reqwest
//! - Single-attempt requests for discovery and token exchange
//! - Retry middleware with exponential backoff for resource searches
//! - An independent deadline on every outbound call

use std::time::Duration;

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use url::Url;

use crate::config::{Config, api};
use crate::error::{CallbackError, FetchError, truncate_error_body};
use crate::models::TokenResponse;

/// HTTP client shared by discovery, the authorization flow and the aggregator.
#[derive(Clone)]
pub struct FhirClient {
    /// Plain client: discovery and token exchange are never retried.
    client: Client,

    /// Client with retry middleware for resource searches.
    search_client: ClientWithMiddleware,

    /// Discovery request timeout.
    discovery_timeout: Duration,

    /// Token exchange timeout.
    token_timeout: Duration,

    /// Per-resource-kind deadline, retries included.
    resource_timeout: Duration,
}

impl FhirClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(api::USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(api::MAX_KEEPALIVE)
            .pool_idle_timeout(api::KEEPALIVE_EXPIRY)
            .gzip(true)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(5))
            .build_with_max_retries(config.resource_retries);

        let search_client = ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            search_client,
            discovery_timeout: config.discovery_timeout,
            token_timeout: config.token_timeout,
            resource_timeout: config.resource_timeout,
        })
    }

    /// Discovery request timeout.
    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// GET a discovery document. The caller interprets status and body.
    ///
    /// # Errors
    ///
    /// Returns the transport error on connection failure or timeout.
    pub async fn get_document(&self, url: &Url) -> Result<reqwest::Response, reqwest::Error> {
        tracing::debug!(url = %url, "Fetching discovery document");

        self.client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json, application/fhir+json")
            .timeout(self.discovery_timeout)
            .send()
            .await
    }

    /// POST an authorization code grant to the token endpoint.
    ///
    /// `basic_auth` carries `(client_id, client_secret)` for confidential clients.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchangeFailed` on transport failure, non-success status,
    /// or a body without `access_token` and `token_type`.
    pub async fn exchange_code(
        &self,
        token_url: &Url,
        form: &[(&str, &str)],
        basic_auth: Option<(&str, &str)>,
    ) -> Result<TokenResponse, CallbackError> {
        let mut request = self
            .client
            .post(token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.token_timeout)
            .form(form);

        if let Some((client_id, secret)) = basic_auth {
            request = request.basic_auth(client_id, Some(secret));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CallbackError::token_exchange(format!("timed out after {:?}", self.token_timeout))
            } else {
                CallbackError::token_exchange(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = truncate_error_body(response.text().await.unwrap_or_default());
            return Err(CallbackError::token_exchange(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CallbackError::token_exchange(format!("failed to read body: {e}")))?;

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| CallbackError::token_exchange(format!("malformed token response: {e}")))?;

        if token.access_token.is_empty() || token.token_type.is_empty() {
            return Err(CallbackError::token_exchange("empty access_token or token_type"));
        }

        Ok(token)
    }

    /// Run a FHIR search with a bearer credential, bounded by the resource deadline.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Timeout` when the deadline elapses, `Unauthorized`
    /// on 401, `Status` on other non-success codes, `Malformed` on non-JSON bodies.
    pub async fn search(&self, url: &Url, access_token: &str) -> Result<serde_json::Value, FetchError> {
        tokio::time::timeout(self.resource_timeout, self.search_inner(url, access_token))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn search_inner(&self, url: &Url, access_token: &str) -> Result<serde_json::Value, FetchError> {
        tracing::debug!(url = %url, "Fetching FHIR resource");

        let response = self
            .search_client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, api::FHIR_JSON)
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::handle_response(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    /// Map non-success status codes to fetch errors.
    async fn handle_response(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        match status.as_u16() {
            401 => Err(FetchError::Unauthorized),
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(FetchError::status(status.as_u16(), text))
            }
        }
    }
}

impl std::fmt::Debug for FhirClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirClient")
            .field("discovery_timeout", &self.discovery_timeout)
            .field("token_timeout", &self.token_timeout)
            .field("resource_timeout", &self.resource_timeout)
            .finish()
    }
}
