//! Property-based tests for authorization URL construction and resource queries.

use std::collections::HashSet;

use proptest::prelude::*;
use url::Url;

use smart_launch_backend::aggregator::ResourceKind;
use smart_launch_backend::server::oauth::{
    AuthorizationRequest, PendingAuthorizationStore, build_authorize_url,
};

fn arb_issuer() -> impl Strategy<Value = String> {
    ("[a-z]{1,12}", proptest::option::of("[a-z0-9]{1,8}"), proptest::option::of(1024u16..65535))
        .prop_map(|(host, segment, port)| {
            let port = port.map(|p| format!(":{p}")).unwrap_or_default();
            let segment = segment.map(|s| format!("/{s}")).unwrap_or_default();
            format!("https://{host}.example{port}{segment}/fhir")
        })
}

fn arb_redirect_uri() -> impl Strategy<Value = String> {
    ("[a-z]{1,10}", 1024u16..65535, "[a-zA-Z0-9_/-]{0,20}", proptest::option::of("[a-z]{1,5}=[a-z0-9 &]{1,8}"))
        .prop_map(|(host, port, path, query)| {
            let query = query.map(|q| format!("?{q}")).unwrap_or_default();
            format!("http://{host}:{port}/{path}{query}")
        })
}

fn query_value(url: &Url, key: &str) -> Vec<String> {
    url.query_pairs().filter(|(k, _)| k == key).map(|(_, v)| v.into_owned()).collect()
}

proptest! {
    /// `aud`, `redirect_uri` and `launch` come back verbatim, exactly once each.
    #[test]
    fn authorize_url_carries_parameters_verbatim(
        issuer in arb_issuer(),
        redirect_uri in arb_redirect_uri(),
        launch_token in "[ -~]{1,64}",
        with_pkce in any::<bool>(),
    ) {
        let endpoint = Url::parse("https://auth.example/authorize").unwrap();
        let state = PendingAuthorizationStore::generate_state();
        let url = build_authorize_url(&endpoint, &AuthorizationRequest {
            client_id: "my_web_app",
            redirect_uri: &redirect_uri,
            scope: "launch launch/patient openid",
            state: &state,
            audience: &issuer,
            launch_token: &launch_token,
            code_challenge: with_pkce.then_some("challenge"),
        });

        prop_assert_eq!(query_value(&url, "aud"), vec![issuer]);
        prop_assert_eq!(query_value(&url, "redirect_uri"), vec![redirect_uri]);
        prop_assert_eq!(query_value(&url, "launch"), vec![launch_token]);
        prop_assert_eq!(query_value(&url, "state"), vec![state]);
        prop_assert_eq!(query_value(&url, "response_type"), vec!["code".to_string()]);
        prop_assert_eq!(query_value(&url, "code_challenge").len(), usize::from(with_pkce));
        prop_assert_eq!(url.host_str(), Some("auth.example"));
    }

    /// Fresh states never collide with states already issued.
    #[test]
    fn states_are_fresh(count in 2usize..64) {
        let states: HashSet<String> =
            (0..count).map(|_| PendingAuthorizationStore::generate_state()).collect();
        prop_assert_eq!(states.len(), count);
    }

    /// Search URLs stay under the session's base URL and filter by patient.
    #[test]
    fn search_url_stays_under_base(issuer in arb_issuer(), patient in "[A-Za-z0-9.-]{1,32}") {
        for kind in ResourceKind::ALL {
            let url = kind.search_url(&issuer, Some(&patient)).unwrap();
            let expected_prefix = format!("{issuer}/{}", kind.resource_type());
            prop_assert!(url.as_str().starts_with(&expected_prefix));

            let key = if kind == ResourceKind::Patient { "_id" } else { "patient" };
            prop_assert_eq!(query_value(&url, key), vec![patient.clone()]);
        }
    }
}
