//! Provider lookup.

use async_trait::async_trait;
use nas_sso_core::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::client_config::ClientConfigResolver;
use crate::error::OidcError;

/// Looks providers up by ID.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    /// Returns the provider with the given ID, if it exists.
    async fn provider(&self, id: &str) -> Result<Option<Provider>, OidcError>;
}

/// In-memory provider definitions.
///
/// Every mutation evicts the affected client configurations, so the
/// resolver never serves endpoints for a provider definition that has
/// since changed.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Provider>>,
    resolver: Arc<ClientConfigResolver>,
}

impl ProviderRegistry {
    /// Creates an empty registry that evicts from `resolver` on change.
    #[must_use]
    pub fn new(resolver: Arc<ClientConfigResolver>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            resolver,
        }
    }

    /// Adds or replaces a provider.
    pub async fn upsert(&self, provider: Provider) {
        let id = provider.id.to_string();
        self.providers.write().await.insert(id.clone(), provider);
        self.resolver.clear_cache(Some(&id));
        info!(provider_id = %id, "provider saved");
    }

    /// Removes a provider, returning it if it existed.
    pub async fn remove(&self, id: &str) -> Option<Provider> {
        let removed = self.providers.write().await.remove(id);
        self.resolver.clear_cache(Some(id));
        if removed.is_some() {
            info!(provider_id = id, "provider removed");
        }
        removed
    }

    /// Replaces all providers at once.
    pub async fn replace_all(&self, providers: impl IntoIterator<Item = Provider>) {
        let providers: HashMap<String, Provider> = providers
            .into_iter()
            .map(|provider| (provider.id.to_string(), provider))
            .collect();
        let count = providers.len();
        *self.providers.write().await = providers;
        self.resolver.clear_cache(None);
        info!(count, "provider registry replaced");
    }

    /// Returns all providers, sorted by ID.
    pub async fn list(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.providers.read().await.values().cloned().collect();
        providers.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        providers
    }
}

#[async_trait]
impl ProviderSource for ProviderRegistry {
    async fn provider(&self, id: &str) -> Result<Option<Provider>, OidcError> {
        Ok(self.providers.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Discovery, DiscoveryOptions, IssuerMetadata};

    struct StaticDiscovery;

    #[async_trait]
    impl Discovery for StaticDiscovery {
        async fn discover(
            &self,
            issuer: &str,
            _options: DiscoveryOptions,
        ) -> Result<IssuerMetadata, OidcError> {
            Ok(IssuerMetadata {
                issuer: issuer.to_string(),
                authorization_endpoint: format!("{issuer}/auth"),
                token_endpoint: Some(format!("{issuer}/token")),
                jwks_uri: None,
                userinfo_endpoint: None,
            })
        }
    }

    fn provider(id: &str, issuer: &str) -> Provider {
        Provider::new(id.parse().expect("id"), id, "nas").with_issuer(issuer)
    }

    fn registry() -> (ProviderRegistry, Arc<ClientConfigResolver>) {
        let resolver = Arc::new(ClientConfigResolver::new(Arc::new(StaticDiscovery)));
        (ProviderRegistry::new(Arc::clone(&resolver)), resolver)
    }

    #[tokio::test]
    async fn upsert_and_lookup() {
        let (registry, _) = registry();
        registry.upsert(provider("google", "https://accounts.google.com")).await;

        let found = registry.provider("google").await.expect("lookup");
        assert_eq!(found.map(|p| p.name), Some("google".to_string()));
        assert_eq!(registry.provider("github").await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn upsert_evicts_stale_configuration() {
        let (registry, resolver) = registry();
        registry.upsert(provider("corp", "https://old.example")).await;
        let old = registry.provider("corp").await.expect("lookup").expect("exists");
        resolver.get_or_create_config(&old).await;

        registry.upsert(provider("corp", "https://new.example")).await;
        assert_eq!(resolver.cache_size(), 0);

        let new = registry.provider("corp").await.expect("lookup").expect("exists");
        assert_eq!(
            resolver.get_or_create_config(&new).await.issuer(),
            "https://new.example"
        );
    }

    #[tokio::test]
    async fn remove_and_replace_evict() {
        let (registry, resolver) = registry();
        let a = provider("a", "https://a.example");
        let b = provider("b", "https://b.example");
        registry.replace_all([a.clone(), b.clone()]).await;
        resolver.get_or_create_config(&a).await;
        resolver.get_or_create_config(&b).await;

        assert!(registry.remove("a").await.is_some());
        assert_eq!(resolver.cache_size(), 1);

        registry.replace_all([b]).await;
        assert_eq!(resolver.cache_size(), 0);
        assert_eq!(registry.list().await.len(), 1);
    }
}
