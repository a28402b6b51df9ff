//! Resolution and caching of per-provider client configuration.
//!
//! A provider either names an issuer, in which case its endpoints come from
//! discovery, or lists its endpoints by hand. Either way the result is cached
//! under the provider ID until explicitly evicted. The cache does not notice
//! when a provider definition changes; whoever mutates a provider must call
//! [`ClientConfigResolver::clear_cache`] before the next resolution.

use nas_sso_core::Provider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument, warn};

use crate::discovery::{Discovery, DiscoveryOptions, IssuerMetadata, is_plain_http};

/// How the client authenticates at the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientAuth {
    /// Confidential client sending its secret in the request body.
    ClientSecretPost {
        /// The client secret.
        client_secret: String,
    },
    /// Public client; no secret is sent.
    None,
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientSecretPost { .. } => f
                .debug_struct("ClientSecretPost")
                .field("client_secret", &"<redacted>")
                .finish(),
            Self::None => f.write_str("None"),
        }
    }
}

impl ClientAuth {
    /// Confidential if the provider has a secret, public otherwise.
    #[must_use]
    pub fn for_provider(provider: &Provider) -> Self {
        match provider.client_secret() {
            Some(secret) => Self::ClientSecretPost {
                client_secret: secret.to_string(),
            },
            None => Self::None,
        }
    }

    /// Returns the client secret of a confidential client.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        match self {
            Self::ClientSecretPost { client_secret } => Some(client_secret),
            Self::None => None,
        }
    }

    /// Returns the token-endpoint authentication method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::ClientSecretPost { .. } => "client_secret_post",
            Self::None => "none",
        }
    }
}

/// Client configuration built from an issuer's discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredConfig {
    /// Discovered issuer metadata.
    pub metadata: IssuerMetadata,
    /// OAuth2 client ID.
    pub client_id: String,
    /// Token-endpoint authentication.
    pub auth: ClientAuth,
    /// Whether plaintext HTTP may be used with this issuer.
    pub allow_insecure_requests: bool,
}

/// Client configuration assembled from a provider's manual endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualConfig {
    /// Issuer, or `manual-{providerId}` when the provider has none.
    pub issuer: String,
    /// Authorization endpoint, verbatim.
    pub authorization_endpoint: Option<String>,
    /// Token endpoint, verbatim.
    pub token_endpoint: Option<String>,
    /// JWKS URL, verbatim.
    pub jwks_uri: Option<String>,
    /// OAuth2 client ID.
    pub client_id: String,
    /// Token-endpoint authentication.
    pub auth: ClientAuth,
    /// Whether plaintext HTTP may be used with these endpoints.
    pub allow_insecure_requests: bool,
}

impl ManualConfig {
    /// Assembles a configuration from the provider's fields.
    #[must_use]
    pub fn from_provider(provider: &Provider) -> Self {
        let issuer = provider
            .issuer()
            .map_or_else(|| format!("manual-{}", provider.id), str::to_string);
        let allow_insecure_requests = provider.has_insecure_issuer()
            || [
                &provider.authorization_endpoint,
                &provider.token_endpoint,
                &provider.jwks_uri,
            ]
            .into_iter()
            .flatten()
            .any(|endpoint| is_plain_http(endpoint));

        Self {
            issuer,
            authorization_endpoint: provider.authorization_endpoint.clone(),
            token_endpoint: provider.token_endpoint.clone(),
            jwks_uri: provider.jwks_uri.clone(),
            client_id: provider.client_id.clone(),
            auth: ClientAuth::for_provider(provider),
            allow_insecure_requests,
        }
    }
}

/// A resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientConfiguration {
    /// Endpoints came from discovery.
    Discovered(DiscoveredConfig),
    /// Endpoints came from the provider definition.
    Manual(ManualConfig),
}

impl ClientConfiguration {
    /// Returns the issuer identifier.
    #[must_use]
    pub fn issuer(&self) -> &str {
        match self {
            Self::Discovered(config) => &config.metadata.issuer,
            Self::Manual(config) => &config.issuer,
        }
    }

    /// Returns the authorization endpoint.
    #[must_use]
    pub fn authorization_endpoint(&self) -> Option<&str> {
        match self {
            Self::Discovered(config) => Some(&config.metadata.authorization_endpoint),
            Self::Manual(config) => config.authorization_endpoint.as_deref(),
        }
    }

    /// Returns the token endpoint.
    #[must_use]
    pub fn token_endpoint(&self) -> Option<&str> {
        match self {
            Self::Discovered(config) => config.metadata.token_endpoint.as_deref(),
            Self::Manual(config) => config.token_endpoint.as_deref(),
        }
    }

    /// Returns the JWKS URL.
    #[must_use]
    pub fn jwks_uri(&self) -> Option<&str> {
        match self {
            Self::Discovered(config) => config.metadata.jwks_uri.as_deref(),
            Self::Manual(config) => config.jwks_uri.as_deref(),
        }
    }

    /// Returns the UserInfo endpoint. Manual configurations have none.
    #[must_use]
    pub fn userinfo_endpoint(&self) -> Option<&str> {
        match self {
            Self::Discovered(config) => config.metadata.userinfo_endpoint.as_deref(),
            Self::Manual(_) => None,
        }
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        match self {
            Self::Discovered(config) => &config.client_id,
            Self::Manual(config) => &config.client_id,
        }
    }

    /// Returns the token-endpoint authentication.
    #[must_use]
    pub fn client_auth(&self) -> &ClientAuth {
        match self {
            Self::Discovered(config) => &config.auth,
            Self::Manual(config) => &config.auth,
        }
    }

    /// Returns true if plaintext HTTP may be used.
    #[must_use]
    pub fn allows_insecure_requests(&self) -> bool {
        match self {
            Self::Discovered(config) => config.allow_insecure_requests,
            Self::Manual(config) => config.allow_insecure_requests,
        }
    }

    /// Returns true if the endpoints came from discovery.
    #[must_use]
    pub fn is_discovered(&self) -> bool {
        matches!(self, Self::Discovered(_))
    }

    /// Returns a copy that permits plaintext HTTP.
    #[must_use]
    pub fn allowing_insecure_requests(&self) -> Self {
        let mut config = self.clone();
        match &mut config {
            Self::Discovered(discovered) => discovered.allow_insecure_requests = true,
            Self::Manual(manual) => manual.allow_insecure_requests = true,
        }
        config
    }
}

/// Resolves provider client configurations and caches them by provider ID.
pub struct ClientConfigResolver {
    discovery: Arc<dyn Discovery>,
    cache: RwLock<HashMap<String, Arc<ClientConfiguration>>>,
    epoch: AtomicU64,
}

impl std::fmt::Debug for ClientConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfigResolver")
            .field("cache_size", &self.cache_size())
            .finish_non_exhaustive()
    }
}

impl ClientConfigResolver {
    /// Creates a resolver with an empty cache.
    #[must_use]
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            cache: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Returns the discovery collaborator.
    #[must_use]
    pub fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    /// Returns the cached configuration for the provider, resolving it on a miss.
    ///
    /// A miss with an issuer tries discovery first and falls back to the
    /// provider's manual endpoints if discovery fails.
    #[instrument(skip_all, fields(provider_id = %provider.id))]
    pub async fn get_or_create_config(&self, provider: &Provider) -> Arc<ClientConfiguration> {
        let key = provider.id.as_str();
        if let Some(config) = self.cached(key) {
            debug!("client configuration cache hit");
            return config;
        }

        debug!("client configuration cache miss");
        let started_at = self.epoch.load(Ordering::Acquire);
        let config = Arc::new(self.resolve(provider).await);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::Acquire) == started_at {
            cache.insert(key.to_string(), Arc::clone(&config));
        } else {
            debug!("cache was cleared during resolution; result not cached");
        }
        config
    }

    /// Evicts one provider's configuration, or all of them.
    pub fn clear_cache(&self, provider_id: Option<&str>) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        match provider_id {
            Some(id) => {
                cache.remove(id);
                debug!(provider_id = id, "evicted client configuration");
            }
            None => {
                cache.clear();
                debug!("evicted all client configurations");
            }
        }
    }

    /// Returns the number of cached configurations.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn cached(&self, key: &str) -> Option<Arc<ClientConfiguration>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    async fn resolve(&self, provider: &Provider) -> ClientConfiguration {
        let Some(issuer) = provider.issuer() else {
            debug!("no issuer configured; using manual endpoints");
            return ClientConfiguration::Manual(ManualConfig::from_provider(provider));
        };

        let options = DiscoveryOptions::for_issuer(issuer);
        match self.discovery.discover(issuer, options).await {
            Ok(metadata) => ClientConfiguration::Discovered(DiscoveredConfig {
                metadata,
                client_id: provider.client_id.clone(),
                auth: ClientAuth::for_provider(provider),
                allow_insecure_requests: options.allow_insecure_requests,
            }),
            Err(e) => {
                warn!(error = %e, "discovery failed; falling back to manual endpoints");
                ClientConfiguration::Manual(ManualConfig::from_provider(provider))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OidcError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeDiscovery {
        calls: AtomicUsize,
        fail: bool,
        seen_options: Mutex<Vec<DiscoveryOptions>>,
        started: Notify,
        gate: Option<Notify>,
    }

    impl FakeDiscovery {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Notify::new()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Discovery for FakeDiscovery {
        async fn discover(
            &self,
            issuer: &str,
            options: DiscoveryOptions,
        ) -> Result<IssuerMetadata, OidcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_options
                .lock()
                .expect("options lock")
                .push(options);
            self.started.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(OidcError::Discovery("connection refused".to_string()));
            }
            Ok(IssuerMetadata {
                issuer: issuer.to_string(),
                authorization_endpoint: format!("{issuer}/authorize"),
                token_endpoint: Some(format!("{issuer}/token")),
                jwks_uri: Some(format!("{issuer}/jwks")),
                userinfo_endpoint: Some(format!("{issuer}/userinfo")),
            })
        }
    }

    fn provider(id: &str) -> Provider {
        Provider::new(id.parse().expect("valid provider id"), id, "nas-client")
    }

    #[tokio::test]
    async fn cache_hit_returns_same_reference() {
        let discovery = Arc::new(FakeDiscovery::default());
        let resolver = ClientConfigResolver::new(discovery.clone());
        let google = provider("google").with_issuer("https://accounts.google.com");

        let first = resolver.get_or_create_config(&google).await;
        let second = resolver.get_or_create_config(&google).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(discovery.calls(), 1);
        assert_eq!(resolver.cache_size(), 1);
    }

    #[tokio::test]
    async fn clear_then_resolve_yields_new_reference() {
        let discovery = Arc::new(FakeDiscovery::default());
        let resolver = ClientConfigResolver::new(discovery.clone());
        let google = provider("google").with_issuer("https://accounts.google.com");

        let first = resolver.get_or_create_config(&google).await;
        resolver.clear_cache(Some("google"));
        assert_eq!(resolver.cache_size(), 0);
        let second = resolver.get_or_create_config(&google).await;

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(discovery.calls(), 2);
    }

    #[tokio::test]
    async fn clear_all_empties_the_cache() {
        let resolver = ClientConfigResolver::new(Arc::new(FakeDiscovery::default()));
        resolver
            .get_or_create_config(&provider("a").with_issuer("https://a.example"))
            .await;
        resolver
            .get_or_create_config(&provider("b").with_issuer("https://b.example"))
            .await;
        assert_eq!(resolver.cache_size(), 2);

        resolver.clear_cache(None);
        assert_eq!(resolver.cache_size(), 0);
    }

    #[tokio::test]
    async fn changed_provider_is_served_stale_until_evicted() {
        let discovery = Arc::new(FakeDiscovery::default());
        let resolver = ClientConfigResolver::new(discovery.clone());
        let before = provider("corp").with_issuer("https://old.example");
        let after = provider("corp").with_issuer("https://new.example");

        resolver.get_or_create_config(&before).await;
        let stale = resolver.get_or_create_config(&after).await;
        assert_eq!(stale.issuer(), "https://old.example");

        resolver.clear_cache(Some("corp"));
        let fresh = resolver.get_or_create_config(&after).await;
        assert_eq!(fresh.issuer(), "https://new.example");
    }

    #[tokio::test]
    async fn empty_issuer_builds_manual_config_without_discovery() {
        let discovery = Arc::new(FakeDiscovery::default());
        let resolver = ClientConfigResolver::new(discovery.clone());
        let manual = provider("manual")
            .with_issuer("")
            .with_authorization_endpoint("https://idp.example/auth")
            .with_token_endpoint("https://idp.example/token")
            .with_client_secret("s3cret");

        let config = resolver.get_or_create_config(&manual).await;

        assert_eq!(discovery.calls(), 0);
        assert!(!config.is_discovered());
        assert_eq!(config.issuer(), "manual-manual");
        assert_eq!(config.authorization_endpoint(), Some("https://idp.example/auth"));
        assert_eq!(config.token_endpoint(), Some("https://idp.example/token"));
        assert_eq!(config.client_auth().method(), "client_secret_post");
        assert_eq!(config.client_auth().client_secret(), Some("s3cret"));
        assert!(!config.allows_insecure_requests());
    }

    #[tokio::test]
    async fn public_client_has_no_secret() {
        let resolver = ClientConfigResolver::new(Arc::new(FakeDiscovery::default()));
        let config = resolver
            .get_or_create_config(&provider("public").with_authorization_endpoint("https://idp/auth"))
            .await;
        assert_eq!(config.client_auth(), &ClientAuth::None);
        assert_eq!(config.client_auth().method(), "none");
    }

    #[tokio::test]
    async fn discovery_failure_falls_back_to_manual() {
        let discovery = Arc::new(FakeDiscovery::failing());
        let resolver = ClientConfigResolver::new(discovery.clone());
        let broken = provider("broken")
            .with_issuer("https://down.example")
            .with_token_endpoint("https://down.example/token");

        let config = resolver.get_or_create_config(&broken).await;

        assert_eq!(discovery.calls(), 1);
        assert!(!config.is_discovered());
        assert_eq!(config.issuer(), "https://down.example");
        assert_eq!(config.token_endpoint(), Some("https://down.example/token"));
        assert_eq!(resolver.cache_size(), 1);
    }

    #[tokio::test]
    async fn http_issuer_requests_insecure_discovery() {
        let discovery = Arc::new(FakeDiscovery::default());
        let resolver = ClientConfigResolver::new(discovery.clone());

        let config = resolver
            .get_or_create_config(&provider("lan").with_issuer("http://idp.lan:8080"))
            .await;
        resolver
            .get_or_create_config(&provider("cloud").with_issuer("https://idp.example"))
            .await;

        let seen = discovery.seen_options.lock().expect("options lock").clone();
        assert_eq!(
            seen,
            [
                DiscoveryOptions {
                    allow_insecure_requests: true
                },
                DiscoveryOptions {
                    allow_insecure_requests: false
                },
            ]
        );
        assert!(config.allows_insecure_requests());
        assert_eq!(config.userinfo_endpoint(), Some("http://idp.lan:8080/userinfo"));
    }

    #[tokio::test]
    async fn resolution_racing_a_clear_is_not_cached() {
        let discovery = Arc::new(FakeDiscovery::gated());
        let resolver = Arc::new(ClientConfigResolver::new(discovery.clone()));
        let google = provider("google").with_issuer("https://accounts.google.com");

        let task = {
            let resolver = Arc::clone(&resolver);
            let google = google.clone();
            tokio::spawn(async move { resolver.get_or_create_config(&google).await })
        };

        discovery.started.notified().await;
        resolver.clear_cache(None);
        if let Some(gate) = &discovery.gate {
            gate.notify_one();
        }

        let config = task.await.expect("join");
        assert_eq!(config.issuer(), "https://accounts.google.com");
        assert_eq!(resolver.cache_size(), 0);
    }

    #[test]
    fn allowing_insecure_requests_copies() {
        let config = ClientConfiguration::Manual(ManualConfig::from_provider(
            &provider("x").with_token_endpoint("https://idp/token"),
        ));
        let insecure = config.allowing_insecure_requests();
        assert!(!config.allows_insecure_requests());
        assert!(insecure.allows_insecure_requests());
        assert_eq!(insecure.token_endpoint(), config.token_endpoint());
    }

    #[test]
    fn manual_http_endpoint_allows_insecure_requests() {
        let config = ManualConfig::from_provider(
            &provider("lan").with_token_endpoint("http://idp.lan/token"),
        );
        assert!(config.allow_insecure_requests);
    }

    #[test]
    fn client_auth_debug_redacts_secret() {
        let auth = ClientAuth::ClientSecretPost {
            client_secret: "hunter2".to_string(),
        };
        let debug = format!("{auth:?}");
        assert!(!debug.contains("hunter2"));
    }
}
