//! SMART App Launch protocol documents consumed from the issuer.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Extension URL carrying OAuth endpoints in a CapabilityStatement.
pub const OAUTH_URIS_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";

/// The issuer's `/.well-known/smart-configuration` document.
///
/// Only the endpoint fields are required by this backend; the rest is kept
/// for the operator-facing discovery report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartConfiguration {
    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub authorization_endpoint: Option<String>,

    #[serde(default)]
    pub token_endpoint: Option<String>,

    #[serde(default)]
    pub jwks_uri: Option<String>,

    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,

    #[serde(default)]
    pub response_types_supported: Option<Vec<String>>,

    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

impl SmartConfiguration {
    /// Whether the server advertises PKCE S256.
    #[must_use]
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_some_and(|methods| methods.iter().any(|m| m == "S256"))
    }
}

/// The slice of a FHIR CapabilityStatement that carries SMART OAuth URIs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityStatement {
    #[serde(default)]
    pub rest: Vec<CapabilityRest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityRest {
    #[serde(default)]
    pub security: Option<CapabilitySecurity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilitySecurity {
    #[serde(default)]
    pub extension: Vec<Extension>,
}

/// A FHIR extension, possibly nested.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,

    #[serde(default)]
    pub value_uri: Option<String>,

    #[serde(default)]
    pub extension: Vec<Extension>,
}

impl CapabilityStatement {
    /// Extract `(authorize, token)` from the `oauth-uris` security extension.
    #[must_use]
    pub fn oauth_uris(&self) -> (Option<String>, Option<String>) {
        let oauth = self
            .rest
            .iter()
            .filter_map(|rest| rest.security.as_ref())
            .flat_map(|security| security.extension.iter())
            .find(|ext| ext.url == OAUTH_URIS_EXTENSION);

        let Some(oauth) = oauth else {
            return (None, None);
        };

        let pick = |name: &str| {
            oauth.extension.iter().find(|e| e.url == name).and_then(|e| e.value_uri.clone())
        };
        (pick("authorize"), pick("token"))
    }
}

/// Token endpoint response (RFC 6749 §5.1 plus SMART launch context).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    pub token_type: String,

    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub id_token: Option<String>,

    #[serde(default)]
    pub patient: Option<String>,

    #[serde(default)]
    pub encounter: Option<String>,

    #[serde(default)]
    pub need_patient_banner: Option<bool>,
}

impl TokenResponse {
    /// Decode the `id_token` claims, if present and well-formed.
    #[must_use]
    pub fn id_token_claims(&self) -> Option<IdTokenClaims> {
        self.id_token.as_deref().and_then(IdTokenClaims::decode_unverified)
    }
}

/// Claims read from an `id_token`.
///
/// The signature is NOT verified: claims are only used as a fallback source
/// of launch context, never for authentication decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,

    #[serde(default)]
    pub fhir_user: Option<String>,

    #[serde(default)]
    pub patient: Option<String>,

    #[serde(default)]
    pub encounter: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a compact JWT without verifying it.
    #[must_use]
    pub fn decode_unverified(jwt: &str) -> Option<Self> {
        let payload = jwt.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode id_token payload");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn test_id_token_claims() {
        let jwt = jwt_with(&serde_json::json!({
            "sub": "u1",
            "fhirUser": "Practitioner/p1",
            "patient": "pat-9"
        }));
        let claims = IdTokenClaims::decode_unverified(&jwt).unwrap();
        assert_eq!(claims.patient.as_deref(), Some("pat-9"));
        assert_eq!(claims.fhir_user.as_deref(), Some("Practitioner/p1"));
    }

    #[test]
    fn test_id_token_garbage() {
        assert!(IdTokenClaims::decode_unverified("not-a-jwt").is_none());
        assert!(IdTokenClaims::decode_unverified("a.!!!.c").is_none());
    }

    #[test]
    fn test_oauth_uris_extension() {
        let cs: CapabilityStatement = serde_json::from_value(serde_json::json!({
            "resourceType": "CapabilityStatement",
            "rest": [{
                "mode": "server",
                "security": {
                    "extension": [{
                        "url": OAUTH_URIS_EXTENSION,
                        "extension": [
                            {"url": "token", "valueUri": "https://ehr.example/token"},
                            {"url": "authorize", "valueUri": "https://ehr.example/authorize"}
                        ]
                    }]
                }
            }]
        }))
        .unwrap();

        let (authorize, token) = cs.oauth_uris();
        assert_eq!(authorize.as_deref(), Some("https://ehr.example/authorize"));
        assert_eq!(token.as_deref(), Some("https://ehr.example/token"));
    }

    #[test]
    fn test_token_response_requires_type() {
        let missing = serde_json::from_value::<TokenResponse>(serde_json::json!({
            "access_token": "tok1"
        }));
        assert!(missing.is_err());
    }
}
