//! HTTP response mapping for flow and aggregation errors.
//!
//! Every error body has the shape `{"error": <code>, "error_description": <text>}`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::{AggregationError, CallbackError, DiscoveryError, FetchError, LaunchError};

/// Build a JSON error response.
pub fn error_response(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "error_description": description
        })),
    )
        .into_response()
}

/// 302 Found with a `Location` header. Never cached.
pub fn redirect(location: &str) -> Response {
    let mut response = (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

impl IntoResponse for LaunchError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::IssuerNotAllowed(_) => (StatusCode::FORBIDDEN, "issuer_not_allowed"),
            Self::DiscoveryFailed(DiscoveryError::Unreachable { .. }) => {
                (StatusCode::BAD_GATEWAY, "discovery_unreachable")
            }
            Self::DiscoveryFailed(DiscoveryError::Malformed { .. }) => {
                (StatusCode::BAD_GATEWAY, "discovery_malformed")
            }
        };
        error_response(status, code, &self.to_string())
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::UnknownOrExpiredState => (StatusCode::BAD_REQUEST, "invalid_state"),
            Self::AuthorizationDenied { .. } => (StatusCode::BAD_REQUEST, "access_denied"),
            Self::TokenExchangeFailed(_) => (StatusCode::BAD_GATEWAY, "token_exchange_failed"),
        };
        error_response(status, code, &self.to_string())
    }
}

impl IntoResponse for AggregationError {
    fn into_response(self) -> Response {
        match &self {
            Self::SessionNotFound => {
                error_response(StatusCode::NOT_FOUND, "session_not_found", &self.to_string())
            }
            Self::SessionExpired => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "session_expired",
                    "error_description": self.to_string(),
                    "needs_reauth": true
                })),
            )
                .into_response(),
            Self::AllResourcesFailed { errors } => (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "error": "all_resources_failed",
                    "error_description": self.to_string(),
                    "errors": errors
                })),
            )
                .into_response(),
            Self::InvalidQuery(_) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_request", &self.to_string())
            }
            Self::SearchFailed { error, .. } => {
                let (status, code) = match error {
                    FetchError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
                    // Upstream rejected the query itself; pass its client-error status through.
                    FetchError::Status { status, .. } if (400..500).contains(status) => (
                        StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                        "search_rejected",
                    ),
                    _ => (StatusCode::BAD_GATEWAY, "search_failed"),
                };
                error_response(status, code, &self.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            LaunchError::invalid_request("missing iss").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            LaunchError::IssuerNotAllowed("https://x".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            LaunchError::from(DiscoveryError::malformed("https://x", "no endpoints"))
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(CallbackError::UnknownOrExpiredState.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            CallbackError::token_exchange("HTTP 400").into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(AggregationError::SessionNotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(AggregationError::SessionExpired.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_search_failure_mapping() {
        let failed = |error| AggregationError::SearchFailed { resource_type: "Observation", error };

        assert_eq!(failed(FetchError::Timeout).into_response().status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            failed(FetchError::status(400, "bad _sort")).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            failed(FetchError::status(503, "down")).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            failed(FetchError::Malformed("not a bundle".into())).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AggregationError::InvalidQuery("too long".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_redirect_sets_location() {
        let response = redirect("https://auth.example/authorize?state=s");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://auth.example/authorize?state=s"
        );
    }
}
