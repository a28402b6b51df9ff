//! Shared application state.

use nas_sso_oidc::{
    ClientConfigResolver, Discovery, JwksClaimsValidator, KeySource, MemorySessionStore,
    MemoryStateStore, OidcError, OidcService, ProviderRegistry, StateTokenService,
    TokenExchanger,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;

/// Overrides for the outbound calls made during a callback.
///
/// `None` keeps the HTTP implementation.
#[derive(Default)]
pub struct Upstreams {
    /// Exchanges authorization codes for tokens.
    pub exchanger: Option<Arc<dyn TokenExchanger>>,
    /// Supplies the keys ID tokens are verified against.
    pub keys: Option<Arc<dyn KeySource>>,
}

/// Application state shared across handlers.
#[derive(Debug)]
pub struct AppState {
    /// Login and callback flows.
    pub service: OidcService,
    /// Configured identity providers.
    pub registry: Arc<ProviderRegistry>,
    /// Sessions awaiting redemption.
    pub sessions: Arc<MemorySessionStore>,
    /// Pending login states.
    pub state_store: Arc<MemoryStateStore>,
    /// Lifetime of the session cookie.
    pub session_ttl: Duration,
    /// Whether cookies carry the Secure flag.
    pub secure_cookies: bool,
}

impl AppState {
    /// Wires the service from configuration.
    ///
    /// `upstreams` replaces the HTTP token exchanger or key source.
    ///
    /// # Errors
    ///
    /// Returns an error if the state secret is invalid or the HTTP client
    /// cannot be created.
    pub async fn from_config(
        config: &ServerConfig,
        discovery: Arc<dyn Discovery>,
        upstreams: Upstreams,
    ) -> Result<Self, OidcError> {
        let resolver = Arc::new(ClientConfigResolver::new(discovery));
        let registry = Arc::new(ProviderRegistry::new(Arc::clone(&resolver)));
        registry.replace_all(config.providers.iter().cloned()).await;

        let state_store = Arc::new(MemoryStateStore::new());
        let states = Arc::new(StateTokenService::from_config(
            &config.sso,
            state_store.clone(),
        )?);
        let sessions = Arc::new(MemorySessionStore::new(config.sso.session_ttl()));

        let mut builder = OidcService::builder()
            .config(config.sso.clone())
            .providers(registry.clone())
            .states(states)
            .resolver(resolver)
            .sessions(sessions.clone());
        if let Some(exchanger) = upstreams.exchanger {
            builder = builder.exchanger(exchanger);
        }
        if let Some(keys) = upstreams.keys {
            builder = builder.claims(Arc::new(JwksClaimsValidator::new(keys)));
        }

        Ok(Self {
            service: builder.build()?,
            registry,
            sessions,
            state_store,
            session_ttl: config.sso.session_ttl(),
            secure_cookies: config.secure_cookies,
        })
    }

    /// Drops expired states and sessions.
    pub async fn purge_expired(&self) -> (usize, usize) {
        let states = self.state_store.purge_expired().await;
        let sessions = self.sessions.purge_expired().await;
        (states, sessions)
    }
}
