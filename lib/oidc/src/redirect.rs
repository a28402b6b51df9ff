//! Redirect-URI derivation from the incoming request.

use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

use crate::config::SsoConfig;
use crate::error::OidcError;

/// Request headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders(HashMap<String, String>);

impl RequestHeaders {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header, replacing any previous value.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Returns the first value of a comma-separated header, trimmed.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// Derives the redirect URI registered with the provider.
pub trait RedirectUriResolver: Send + Sync {
    /// Returns the redirect URI for a request.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Unauthorized`] if no acceptable origin can be determined.
    fn redirect_uri(
        &self,
        request_origin: Option<&str>,
        headers: &RequestHeaders,
    ) -> Result<String, OidcError>;
}

/// [`RedirectUriResolver`] appending a fixed callback path to the request origin.
///
/// The origin is taken from the explicit request origin if given, otherwise
/// from `X-Forwarded-Proto`/`X-Forwarded-Host` or `Host`. When an allow-list
/// is configured the origin must be on it.
#[derive(Debug, Clone)]
pub struct OriginRedirectResolver {
    callback_path: String,
    allowed_origins: Vec<String>,
}

impl Default for OriginRedirectResolver {
    fn default() -> Self {
        Self::new(SsoConfig::default().callback_path(), Vec::new())
    }
}

impl OriginRedirectResolver {
    /// Creates a resolver for the given callback path and allow-list.
    #[must_use]
    pub fn new(callback_path: impl Into<String>, allowed_origins: Vec<String>) -> Self {
        Self {
            callback_path: callback_path.into(),
            allowed_origins: allowed_origins
                .iter()
                .filter_map(|origin| normalize_origin(origin))
                .collect(),
        }
    }

    /// Creates a resolver from configuration.
    ///
    /// Logs a warning when no usable origin is configured, since the
    /// redirect URI then follows the client's `Host` headers.
    #[must_use]
    pub fn from_config(config: &SsoConfig) -> Self {
        let resolver = Self::new(config.callback_path(), config.allowed_origins().to_vec());
        if resolver.allows_any_origin() {
            warn!(
                configured = config.allowed_origins().len(),
                "no allowed_origins configured; redirect URIs will follow request Host headers"
            );
        }
        resolver
    }

    /// Returns true if no allow-list restricts the request origin.
    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty()
    }

    fn origin(&self, request_origin: Option<&str>, headers: &RequestHeaders) -> Option<String> {
        if let Some(origin) = request_origin.filter(|origin| !origin.is_empty()) {
            return normalize_origin(origin);
        }
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get("host"))?;
        let scheme = headers.get("x-forwarded-proto").unwrap_or("http");
        normalize_origin(&format!("{scheme}://{host}"))
    }
}

impl RedirectUriResolver for OriginRedirectResolver {
    fn redirect_uri(
        &self,
        request_origin: Option<&str>,
        headers: &RequestHeaders,
    ) -> Result<String, OidcError> {
        let origin = self
            .origin(request_origin, headers)
            .ok_or_else(|| OidcError::unauthorized("Unable to determine request origin"))?;

        if !self.allowed_origins.is_empty() && !self.allowed_origins.contains(&origin) {
            warn!(%origin, "login attempted from an origin that is not allowed");
            return Err(OidcError::unauthorized("Origin not allowed"));
        }

        let path = self.callback_path.trim_start_matches('/');
        let redirect_uri = format!("{origin}/{path}");
        debug!(%redirect_uri, "resolved redirect URI");
        Ok(redirect_uri)
    }
}

/// Reduces a URL to `scheme://host[:port]`; only http(s) origins are accepted.
fn normalize_origin(origin: &str) -> Option<String> {
    let url = Url::parse(origin).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url.origin().ascii_serialization())
}
