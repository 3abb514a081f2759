//! SMART on FHIR Launch Backend
//!
//! Backend for a browser application that obtains delegated access to a
//! patient's records on a FHIR server through the SMART App Launch
//! handshake, then serves an aggregated multi-resource view of that data.
//!
//! # Features
//!
//! - **Discovery**: `.well-known/smart-configuration` with CapabilityStatement fallback, cached per issuer
//! - **Authorization flow**: EHR launch, single-use `state`, PKCE S256, code-for-token exchange
//! - **Sessions**: in-memory store behind a trait object, expiry surfaced not refreshed
//! - **Aggregation**: concurrent per-kind fetches with partial-failure reporting
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use smart_launch_backend::{config::Config, server::transport::{HttpState, create_router}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let router = create_router(Arc::new(HttpState::new(config)?));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:9001").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod models;
pub mod server;

pub use aggregator::{AggregatedPayload, Aggregator, ResourceKind};
pub use client::FhirClient;
pub use config::Config;
pub use discovery::{AuthorizationEndpoints, Discovery};
pub use error::{AggregationError, CallbackError, DiscoveryError, FetchError, LaunchError};
pub use server::oauth::AuthorizationFlow;
pub use server::session::{InMemorySessionStore, Session, SessionStore};
