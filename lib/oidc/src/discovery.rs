//! OpenID Connect discovery.

use async_trait::async_trait;
use openidconnect::IssuerUrl;
use openidconnect::core::CoreProviderMetadata;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::OidcError;
use crate::http::build_http_client;

/// Options for a single discovery request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Permit plaintext HTTP when talking to the issuer.
    pub allow_insecure_requests: bool,
}

impl DiscoveryOptions {
    /// Options for the given issuer: insecure requests are allowed only for `http` issuers.
    #[must_use]
    pub fn for_issuer(issuer: &str) -> Self {
        Self {
            allow_insecure_requests: is_plain_http(issuer),
        }
    }
}

/// Endpoints published by an issuer's discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerMetadata {
    /// The issuer identifier as published.
    pub issuer: String,
    /// Authorization endpoint.
    pub authorization_endpoint: String,
    /// Token endpoint, if published.
    pub token_endpoint: Option<String>,
    /// JSON Web Key Set URL.
    pub jwks_uri: Option<String>,
    /// UserInfo endpoint, if published.
    pub userinfo_endpoint: Option<String>,
}

/// Fetches issuer metadata.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Discovers the metadata of `issuer`.
    async fn discover(
        &self,
        issuer: &str,
        options: DiscoveryOptions,
    ) -> Result<IssuerMetadata, OidcError>;
}

/// [`Discovery`] backed by `openidconnect`'s `.well-known/openid-configuration` fetch.
#[derive(Debug, Clone)]
pub struct OpenIdDiscovery {
    http: reqwest::Client,
}

impl OpenIdDiscovery {
    /// Creates a discovery client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, OidcError> {
        Ok(Self {
            http: build_http_client(timeout)?,
        })
    }

    /// Creates a discovery client using an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Discovery for OpenIdDiscovery {
    #[instrument(skip(self))]
    async fn discover(
        &self,
        issuer: &str,
        options: DiscoveryOptions,
    ) -> Result<IssuerMetadata, OidcError> {
        if is_plain_http(issuer) && !options.allow_insecure_requests {
            return Err(OidcError::Discovery(format!(
                "refusing insecure discovery for issuer {issuer}"
            )));
        }

        let issuer_url = IssuerUrl::new(issuer.to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid issuer URL: {e}")))?;

        let metadata = CoreProviderMetadata::discover_async(issuer_url, &self.http)
            .await
            .map_err(|e| OidcError::Discovery(format!("failed to discover provider: {e}")))?;

        debug!("discovered issuer metadata");
        Ok(IssuerMetadata {
            issuer: metadata.issuer().as_str().to_string(),
            authorization_endpoint: metadata.authorization_endpoint().as_str().to_string(),
            token_endpoint: metadata
                .token_endpoint()
                .map(|endpoint| endpoint.as_str().to_string()),
            jwks_uri: Some(metadata.jwks_uri().as_str().to_string()),
            userinfo_endpoint: metadata
                .userinfo_endpoint()
                .map(|endpoint| endpoint.as_str().to_string()),
        })
    }
}

/// Returns true if the URL uses plaintext HTTP.
pub(crate) fn is_plain_http(url: &str) -> bool {
    url.get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http://"))
}
