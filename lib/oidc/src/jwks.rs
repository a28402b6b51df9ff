//! Retrieval of the signing keys an issuer publishes at its `jwks_uri`.

use async_trait::async_trait;
use openidconnect::core::CoreJsonWebKeySet;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::discovery::is_plain_http;
use crate::error::OidcError;
use crate::http::build_http_client;

/// Fetches JSON Web Key Sets.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetches the key set published at `jwks_uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is plaintext HTTP and `allow_insecure` is
    /// false, or if the key set cannot be fetched or parsed.
    async fn fetch_keys(
        &self,
        jwks_uri: &str,
        allow_insecure: bool,
    ) -> Result<CoreJsonWebKeySet, OidcError>;
}

/// [`KeySource`] fetching key sets over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    http: reqwest::Client,
}

impl HttpKeySource {
    /// Creates a key source with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, OidcError> {
        Ok(Self {
            http: build_http_client(timeout)?,
        })
    }

    /// Creates a key source using an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    #[instrument(skip(self))]
    async fn fetch_keys(
        &self,
        jwks_uri: &str,
        allow_insecure: bool,
    ) -> Result<CoreJsonWebKeySet, OidcError> {
        if is_plain_http(jwks_uri) && !allow_insecure {
            return Err(OidcError::Configuration(format!(
                "refusing insecure JWKS fetch from {jwks_uri}"
            )));
        }

        let keys = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| OidcError::Discovery(format!("failed to fetch JWKS: {e}")))?
            .json::<CoreJsonWebKeySet>()
            .await
            .map_err(|e| OidcError::Discovery(format!("invalid JWKS document: {e}")))?;

        debug!(keys = keys.keys().len(), "fetched signing keys");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_http_jwks_needs_opt_in() {
        let source = HttpKeySource::new(Duration::from_secs(1)).expect("source");
        let err = source
            .fetch_keys("http://idp.lan/jwks", false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OidcError::Configuration("refusing insecure JWKS fetch from http://idp.lan/jwks".to_string())
        );
    }
}
