//! Single-sign-on configuration.
//!
//! Fields with defaults can be omitted when loading from files or
//! environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::OidcError;

/// Configuration for the OIDC authentication core.
#[derive(Clone, Serialize, Deserialize)]
pub struct SsoConfig {
    /// Lifetime of an issued state token, in seconds.
    /// Default: 600
    #[serde(default = "default_state_ttl_seconds")]
    state_ttl_seconds: u64,
    /// Hex-encoded HMAC key for signing state tokens.
    /// A random key is generated at startup when absent.
    #[serde(default)]
    state_secret: Option<String>,
    /// Path appended to the request origin to form the redirect URI.
    /// Default: "/auth/oidc/callback"
    #[serde(default = "default_callback_path")]
    callback_path: String,
    /// Origins allowed to start a login. Empty allows any http(s) origin.
    #[serde(default)]
    allowed_origins: Vec<String>,
    /// Lifetime of a session token handed out after a successful callback, in seconds.
    /// Default: 300
    #[serde(default = "default_session_ttl_seconds")]
    session_ttl_seconds: u64,
    /// Timeout for discovery and token-exchange HTTP calls, in seconds.
    /// Default: 10
    #[serde(default = "default_http_timeout_seconds")]
    http_timeout_seconds: u64,
}

fn default_state_ttl_seconds() -> u64 {
    600
}

fn default_callback_path() -> String {
    "/auth/oidc/callback".to_string()
}

fn default_session_ttl_seconds() -> u64 {
    300
}

fn default_http_timeout_seconds() -> u64 {
    10
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl_seconds(),
            state_secret: None,
            callback_path: default_callback_path(),
            allowed_origins: Vec::new(),
            session_ttl_seconds: default_session_ttl_seconds(),
            http_timeout_seconds: default_http_timeout_seconds(),
        }
    }
}

impl std::fmt::Debug for SsoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoConfig")
            .field("state_ttl_seconds", &self.state_ttl_seconds)
            .field(
                "state_secret",
                &self.state_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("callback_path", &self.callback_path)
            .field("allowed_origins", &self.allowed_origins)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .finish()
    }
}

impl SsoConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> SsoConfigBuilder {
        SsoConfigBuilder::default()
    }

    /// Returns the state token lifetime.
    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_seconds)
    }

    /// Decodes the configured state secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not valid hex or is empty.
    pub fn state_secret(&self) -> Result<Option<Vec<u8>>, OidcError> {
        let Some(encoded) = self.state_secret.as_deref() else {
            return Ok(None);
        };
        let secret = hex::decode(encoded.trim()).map_err(|e| {
            OidcError::Configuration(format!("state_secret must be hex encoded: {e}"))
        })?;
        if secret.is_empty() {
            return Err(OidcError::Configuration(
                "state_secret must not be empty".to_string(),
            ));
        }
        Ok(Some(secret))
    }

    /// Returns the callback path.
    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Returns the allowed origins.
    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Returns the session token lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    /// Returns the HTTP timeout for calls to identity providers.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

/// Builder for `SsoConfig`.
#[derive(Debug, Default)]
pub struct SsoConfigBuilder {
    config: SsoConfig,
}

impl SsoConfigBuilder {
    /// Sets the state token lifetime in seconds.
    #[must_use]
    pub fn state_ttl_seconds(mut self, seconds: u64) -> Self {
        self.config.state_ttl_seconds = seconds;
        self
    }

    /// Sets the hex-encoded state secret.
    #[must_use]
    pub fn state_secret(mut self, hex_secret: String) -> Self {
        self.config.state_secret = Some(hex_secret);
        self
    }

    /// Sets the callback path.
    #[must_use]
    pub fn callback_path(mut self, path: String) -> Self {
        self.config.callback_path = path;
        self
    }

    /// Adds an allowed origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: String) -> Self {
        if !self.config.allowed_origins.contains(&origin) {
            self.config.allowed_origins.push(origin);
        }
        self
    }

    /// Sets the session token lifetime in seconds.
    #[must_use]
    pub fn session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.config.session_ttl_seconds = seconds;
        self
    }

    /// Sets the HTTP timeout in seconds.
    #[must_use]
    pub fn http_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.http_timeout_seconds = seconds;
        self
    }

    /// Builds the `SsoConfig`.
    #[must_use]
    pub fn build(self) -> SsoConfig {
        self.config
    }
}
