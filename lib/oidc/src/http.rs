//! Outbound HTTP client shared by discovery and token exchange.

use std::time::Duration;

use crate::error::OidcError;

/// Builds the client used to talk to identity providers.
///
/// Redirects are never followed, so a compromised endpoint cannot bounce
/// credentials to another host.
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, OidcError> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| OidcError::Configuration(format!("failed to create HTTP client: {e}")))
}
