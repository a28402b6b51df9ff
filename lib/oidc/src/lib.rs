//! OIDC single-sign-on authentication core.
//!
//! This crate provides:
//! - Signed, single-use state tokens ([`StateTokenService`])
//! - Per-provider client configuration via discovery or manual endpoints,
//!   cached by provider ID ([`ClientConfigResolver`])
//! - ID-token signature verification against the issuer's JWKS
//!   ([`JwksClaimsValidator`])
//! - The login and callback flows ([`OidcService`])
//!
//! Every external concern (provider storage, discovery, token exchange,
//! claims, authorization rules, sessions, redirect URIs, provider
//! validation) sits behind a trait with a default implementation here.

pub mod claims;
pub mod client_config;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exchange;
mod http;
pub mod jwks;
pub mod redirect;
pub mod registry;
pub mod rules;
pub mod service;
pub mod session;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod validation;

// Re-export main types at crate root
pub use claims::{ClaimsValidator, JwksClaimsValidator, VerifiedIdToken};
pub use client_config::{
    ClientAuth, ClientConfigResolver, ClientConfiguration, DiscoveredConfig, ManualConfig,
};
pub use config::{SsoConfig, SsoConfigBuilder};
pub use discovery::{Discovery, DiscoveryOptions, IssuerMetadata, OpenIdDiscovery};
pub use error::{GENERIC_AUTH_FAILURE, OidcError, StateError};
pub use exchange::{
    IdTokenFields, OAuth2TokenExchanger, TokenExchangeRequest, TokenExchanger, TokenSet,
};
pub use jwks::{HttpKeySource, KeySource};
pub use redirect::{OriginRedirectResolver, RedirectUriResolver, RequestHeaders};
pub use registry::{ProviderRegistry, ProviderSource};
pub use rules::AuthorizationChecker;
pub use service::{AuthorizationRequest, CallbackRequest, OidcService, OidcServiceBuilder};
pub use session::{MemorySessionStore, Session, SessionId, SessionIssuer};
pub use state::{
    DEFAULT_STATE_TTL, LegacyState, STATE_KEY_PREFIX, StateTokenService, ValidatedState,
    extract_provider_from_legacy_state, extract_provider_from_state,
};
pub use store::{MemoryStateStore, StateRecord, StateStore};
pub use validation::{DiscoveryValidator, ProviderValidation, ProviderValidator};
