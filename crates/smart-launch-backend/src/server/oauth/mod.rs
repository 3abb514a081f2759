//! SMART App Launch authorization flow (client side).
//!
//! ## Supported Standards
//! - SMART App Launch: EHR launch with `launch` and `aud` parameters
//! - RFC 6749: Authorization Code Grant
//! - RFC 7636: PKCE (S256)

pub mod flow;
pub mod handlers;
pub mod pkce;
pub mod store;
mod types;

pub use flow::{AuthorizationFlow, AuthorizationRequest, build_authorize_url};
pub use store::PendingAuthorizationStore;
pub use types::{FlowState, PendingAuthorization};
