//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional TOML file, overridden by
//! `SSO__`-prefixed environment variables (`SSO__BIND_ADDRESS`,
//! `SSO__SSO__STATE_SECRET`, ...).
//!
//! See [`SsoConfig`] for the authentication settings.

use nas_sso_core::Provider;
use nas_sso_oidc::SsoConfig;
use serde::Deserialize;
use std::path::Path;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sso.toml";

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Interval between sweeps of expired state and session records, in seconds.
    #[serde(default = "default_purge_interval_seconds")]
    pub purge_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Single-sign-on configuration.
    #[serde(default)]
    pub sso: SsoConfig,

    /// Identity providers available at startup.
    #[serde(default)]
    pub providers: Vec<Provider>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_purge_interval_seconds() -> u64 {
    60
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            purge_interval_seconds: default_purge_interval_seconds(),
            secure_cookies: default_secure_cookies(),
            sso: SsoConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `path` (if it exists) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SSO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
