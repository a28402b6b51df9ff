//! Provider configuration checks for administrators.

use async_trait::async_trait;
use nas_sso_core::Provider;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

use crate::discovery::{Discovery, DiscoveryOptions};

/// Outcome of validating a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderValidation {
    /// True if the provider can be used to sign in.
    pub is_valid: bool,
    /// What is wrong, if anything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Supporting details, such as the discovered endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ProviderValidation {
    /// A passing result.
    #[must_use]
    pub fn valid(details: Value) -> Self {
        Self {
            is_valid: true,
            error: None,
            details: Some(details),
        }
    }

    /// A failing result.
    #[must_use]
    pub fn invalid(error: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
            details,
        }
    }
}

/// Checks whether a provider definition is usable.
#[async_trait]
pub trait ProviderValidator: Send + Sync {
    /// Validates the provider.
    async fn validate(&self, provider: &Provider) -> ProviderValidation;
}

/// [`ProviderValidator`] that runs discovery against the provider's issuer.
///
/// A provider without an issuer, or whose discovery fails, must supply
/// well-formed manual authorization and token endpoints.
pub struct DiscoveryValidator {
    discovery: Arc<dyn Discovery>,
}

impl std::fmt::Debug for DiscoveryValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryValidator").finish_non_exhaustive()
    }
}

impl DiscoveryValidator {
    /// Creates a validator using the given discovery client.
    #[must_use]
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl ProviderValidator for DiscoveryValidator {
    #[instrument(skip_all, fields(provider_id = %provider.id))]
    async fn validate(&self, provider: &Provider) -> ProviderValidation {
        let Some(issuer) = provider.issuer() else {
            return validate_manual(provider, None);
        };

        match self
            .discovery
            .discover(issuer, DiscoveryOptions::for_issuer(issuer))
            .await
        {
            Ok(metadata) => {
                debug!("provider discovery succeeded");
                ProviderValidation::valid(json!({
                    "configuration": "discovered",
                    "issuer": metadata.issuer,
                    "authorizationEndpoint": metadata.authorization_endpoint,
                    "tokenEndpoint": metadata.token_endpoint,
                    "jwksUri": metadata.jwks_uri,
                    "userinfoEndpoint": metadata.userinfo_endpoint,
                }))
            }
            Err(e) => {
                let discovery_url = format!(
                    "{}/.well-known/openid-configuration",
                    issuer.trim_end_matches('/')
                );
                debug!(error = %e, "provider discovery failed");
                validate_manual(
                    provider,
                    Some(json!({
                        "discoveryUrl": discovery_url,
                        "discoveryError": e.to_string(),
                    })),
                )
            }
        }
    }
}

fn validate_manual(provider: &Provider, discovery_failure: Option<Value>) -> ProviderValidation {
    let checks = [
        ("authorization_endpoint", &provider.authorization_endpoint),
        ("token_endpoint", &provider.token_endpoint),
    ];
    for (field, endpoint) in checks {
        let problem = match endpoint.as_deref().filter(|e| !e.is_empty()) {
            None => Some(format!("{field} is required")),
            Some(endpoint) => Url::parse(endpoint)
                .err()
                .map(|e| format!("{field} is not a valid URL: {e}")),
        };
        if let Some(problem) = problem {
            let error = match &discovery_failure {
                Some(_) => "Failed to discover OIDC configuration".to_string(),
                None => problem.clone(),
            };
            let mut details = discovery_failure.unwrap_or_else(|| json!({}));
            details["manualConfigurationError"] = Value::String(problem);
            return ProviderValidation::invalid(error, Some(details));
        }
    }

    let mut details = discovery_failure.unwrap_or_else(|| json!({}));
    details["configuration"] = json!("manual");
    details["authorizationEndpoint"] = json!(provider.authorization_endpoint);
    details["tokenEndpoint"] = json!(provider.token_endpoint);
    ProviderValidation::valid(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::IssuerMetadata;
    use crate::error::OidcError;

    struct FakeDiscovery {
        fail: bool,
    }

    #[async_trait]
    impl Discovery for FakeDiscovery {
        async fn discover(
            &self,
            issuer: &str,
            _options: DiscoveryOptions,
        ) -> Result<IssuerMetadata, OidcError> {
            if self.fail {
                return Err(OidcError::Discovery("connection refused".to_string()));
            }
            Ok(IssuerMetadata {
                issuer: issuer.to_string(),
                authorization_endpoint: format!("{issuer}/auth"),
                token_endpoint: Some(format!("{issuer}/token")),
                jwks_uri: None,
                userinfo_endpoint: None,
            })
        }
    }

    fn validator(fail: bool) -> DiscoveryValidator {
        DiscoveryValidator::new(Arc::new(FakeDiscovery { fail }))
    }

    fn provider() -> Provider {
        Provider::new("corp".parse().expect("id"), "Corp", "nas")
    }

    #[tokio::test]
    async fn discovered_provider_is_valid() {
        let result = validator(false)
            .validate(&provider().with_issuer("https://idp.example"))
            .await;
        assert!(result.is_valid);
        assert_eq!(result.error, None);
        let details = result.details.expect("details");
        assert_eq!(details["tokenEndpoint"], "https://idp.example/token");
    }

    #[tokio::test]
    async fn failed_discovery_without_endpoints_is_invalid() {
        let result = validator(true)
            .validate(&provider().with_issuer("https://idp.example/"))
            .await;
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("Failed to discover OIDC configuration"));
        let details = result.details.expect("details");
        assert_eq!(
            details["discoveryUrl"],
            "https://idp.example/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn failed_discovery_with_manual_endpoints_is_valid() {
        let result = validator(true)
            .validate(
                &provider()
                    .with_issuer("https://idp.example")
                    .with_authorization_endpoint("https://idp.example/auth")
                    .with_token_endpoint("https://idp.example/token"),
            )
            .await;
        assert!(result.is_valid);
        assert_eq!(result.details.expect("details")["configuration"], "manual");
    }

    #[tokio::test]
    async fn manual_provider_needs_both_endpoints() {
        let result = validator(false)
            .validate(&provider().with_authorization_endpoint("https://idp.example/auth"))
            .await;
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("token_endpoint is required"));

        let result = validator(false)
            .validate(
                &provider()
                    .with_authorization_endpoint("not a url")
                    .with_token_endpoint("https://idp.example/token"),
            )
            .await;
        assert!(!result.is_valid);
        assert!(result
            .error
            .expect("error")
            .starts_with("authorization_endpoint is not a valid URL"));
    }

    #[test]
    fn serializes_in_camel_case() {
        let json = serde_json::to_value(ProviderValidation::invalid("nope", None)).expect("json");
        assert_eq!(json, json!({"isValid": false, "error": "nope"}));
    }
}
