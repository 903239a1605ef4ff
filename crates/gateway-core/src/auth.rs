//! Extracts the two logically distinct credentials carried on every request:
//! the provider credential (forwarded upstream) and the gateway credential
//! (used against Explorer and, unless overridden, the guardrails service).

use crate::error::GatewayError;
use http::HeaderMap;

/// Header names that may carry a provider credential, checked in this order.
const PROVIDER_HEADER_NAMES: &[&str] = &["authorization", "x-api-key", "x-goog-api-key"];

const GATEWAY_HEADER: &str = "invariant-authorization";
const GUARDRAIL_SERVICE_HEADER: &str = "invariant-guardrail-service-authorization";
const SUFFIX_MARKER: &str = ";invariant-auth=";

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gateway: Option<String>,
    pub provider: Option<String>,
    pub guardrails: Option<String>,
}

impl Credentials {
    /// The credential to use against the guardrails service: the dedicated
    /// one if present, otherwise the gateway credential.
    pub fn guardrails_credential(&self) -> Option<&str> {
        self.guardrails.as_deref().or(self.gateway.as_deref())
    }
}

fn strip_bearer(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolves `(gateway_credential, provider_credential)` from request headers.
///
/// `dataset_name` being set makes the gateway credential mandatory, matching
/// the rule that pushing to a dataset always needs an Explorer identity.
pub fn resolve(
    headers: &HeaderMap,
    dataset_name: Option<&str>,
) -> Result<Credentials, GatewayError> {
    let provider_header = PROVIDER_HEADER_NAMES
        .iter()
        .find_map(|name| header_str(headers, name).map(|v| (*name, v)));

    let mut gateway = header_str(headers, GATEWAY_HEADER).map(|v| strip_bearer(v).to_string());
    let mut provider = provider_header.map(|(_, v)| strip_bearer(v).to_string());

    if let Some(raw) = provider.clone() {
        if let Some((prov_part, gw_part)) = raw.split_once(SUFFIX_MARKER) {
            provider = Some(prov_part.to_string());
            if gateway.is_none() {
                gateway = Some(gw_part.to_string());
            }
        }
    }

    let guardrails = header_str(headers, GUARDRAIL_SERVICE_HEADER).map(|v| strip_bearer(v).to_string());

    if dataset_name.is_some() && gateway.is_none() {
        return Err(GatewayError::client_auth(
            "Missing gateway credential: Invariant-Authorization is required when a dataset is specified",
        ));
    }

    Ok(Credentials {
        gateway,
        provider,
        guardrails,
    })
}

/// Parses the `Invariant-Push` header: `push` (or absent) means `true`,
/// `skip` means `false`; anything else is a client error per §4.7.
pub fn parse_push_header(value: Option<&str>) -> Result<bool, GatewayError> {
    match value.map(str::to_lowercase).as_deref() {
        None | Some("push") => Ok(true),
        Some("skip") => Ok(false),
        Some(other) => Err(GatewayError::InvalidPushHeader(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn dedicated_headers_are_independent() {
        let h = headers(&[
            ("authorization", "sk-provider-key"),
            ("invariant-authorization", "Bearer gw-key"),
        ]);
        let creds = resolve(&h, None).unwrap();
        assert_eq!(creds.provider.as_deref(), Some("sk-provider-key"));
        assert_eq!(creds.gateway.as_deref(), Some("gw-key"));
    }

    #[test]
    fn suffix_fallback_splits_single_header() {
        let h = headers(&[("authorization", "sk-provider-key;invariant-auth=gw-key")]);
        let creds = resolve(&h, None).unwrap();
        assert_eq!(creds.provider.as_deref(), Some("sk-provider-key"));
        assert_eq!(creds.gateway.as_deref(), Some("gw-key"));
    }

    #[test]
    fn auth_equivalence_of_the_two_header_shapes() {
        let a = headers(&[("authorization", "k;invariant-auth=g")]);
        let b = headers(&[
            ("authorization", "k"),
            ("invariant-authorization", "Bearer g"),
        ]);
        let ca = resolve(&a, None).unwrap();
        let cb = resolve(&b, None).unwrap();
        assert_eq!(ca.provider, cb.provider);
        assert_eq!(ca.gateway, cb.gateway);
    }

    #[test]
    fn dataset_requires_gateway_credential() {
        let h = headers(&[("authorization", "sk-provider-key")]);
        let err = resolve(&h, Some("my-dataset")).unwrap_err();
        assert!(matches!(err, GatewayError::ClientAuth(_)));
    }

    #[test]
    fn dataset_absent_gateway_credential_optional() {
        let h = headers(&[("authorization", "sk-provider-key")]);
        assert!(resolve(&h, None).is_ok());
    }

    #[test]
    fn guardrail_service_header_overrides_gateway_for_guardrails_only() {
        let h = headers(&[
            ("invariant-authorization", "Bearer gw-key"),
            (
                "invariant-guardrail-service-authorization",
                "Bearer guardrails-key",
            ),
        ]);
        let creds = resolve(&h, None).unwrap();
        assert_eq!(creds.guardrails_credential(), Some("guardrails-key"));
    }

    #[test]
    fn guardrail_service_header_falls_back_to_gateway() {
        let h = headers(&[("invariant-authorization", "Bearer gw-key")]);
        let creds = resolve(&h, None).unwrap();
        assert_eq!(creds.guardrails_credential(), Some("gw-key"));
    }

    #[test]
    fn push_header_defaults_to_push() {
        assert!(parse_push_header(None).unwrap());
        assert!(parse_push_header(Some("push")).unwrap());
        assert!(!parse_push_header(Some("skip")).unwrap());
    }

    #[test]
    fn push_header_rejects_unknown_values() {
        assert!(matches!(
            parse_push_header(Some("maybe")),
            Err(GatewayError::InvalidPushHeader(_))
        ));
    }
}
