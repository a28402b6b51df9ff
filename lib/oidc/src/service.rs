//! Login and callback orchestration.
//!
//! [`OidcService`] is the entry point used by the HTTP layer. It builds
//! authorization URLs and completes the authorization-code callback,
//! delegating each step to a collaborator so deployments can swap out
//! storage, token exchange, or session issuance.
//!
//! Callback failures are narrowed before they leave the service: explicit
//! authorization refusals keep their message, everything else is logged
//! and reported as "Authentication failed".

use nas_sso_authz::ClaimRuleEvaluator;
use nas_sso_core::Provider;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::claims::{ClaimsValidator, JwksClaimsValidator};
use crate::client_config::{ClientConfigResolver, ClientConfiguration};
use crate::config::SsoConfig;
use crate::discovery::is_plain_http;
use crate::error::{GENERIC_AUTH_FAILURE, OidcError};
use crate::exchange::{OAuth2TokenExchanger, TokenExchangeRequest, TokenExchanger};
use crate::jwks::HttpKeySource;
use crate::redirect::{OriginRedirectResolver, RedirectUriResolver, RequestHeaders};
use crate::registry::ProviderSource;
use crate::rules::AuthorizationChecker;
use crate::session::{MemorySessionStore, SessionIssuer};
use crate::state::StateTokenService;
use crate::validation::{DiscoveryValidator, ProviderValidation, ProviderValidator};

/// Authorization-response parameters carried over from the received callback URL.
const PASS_THROUGH_PARAMS: [&str; 6] = ["scope", "authuser", "prompt", "hd", "session_state", "iss"];

/// A request to start a login.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    /// The provider to sign in with.
    pub provider_id: String,
    /// Opaque caller state, returned after the callback.
    pub state: String,
    /// Origin of the page starting the login, if known.
    pub request_origin: Option<String>,
    /// Headers of the incoming request.
    pub request_headers: RequestHeaders,
}

/// The provider's redirect back to us.
#[derive(Clone, Default)]
pub struct CallbackRequest {
    /// The provider the callback belongs to.
    pub provider_id: String,
    /// The authorization code.
    pub code: String,
    /// The state token, as issued.
    pub state: String,
    /// Origin of the callback request, if known.
    pub request_origin: Option<String>,
    /// The full callback URL as received, if available.
    pub full_callback_url: Option<String>,
    /// Headers of the incoming request.
    pub request_headers: RequestHeaders,
}

impl std::fmt::Debug for CallbackRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRequest")
            .field("provider_id", &self.provider_id)
            .field("code", &"<redacted>")
            .field("request_origin", &self.request_origin)
            .finish_non_exhaustive()
    }
}

/// Orchestrates the OIDC login and callback flows.
pub struct OidcService {
    providers: Arc<dyn ProviderSource>,
    states: Arc<StateTokenService>,
    resolver: Arc<ClientConfigResolver>,
    redirects: Arc<dyn RedirectUriResolver>,
    exchanger: Arc<dyn TokenExchanger>,
    claims: Arc<dyn ClaimsValidator>,
    authorization: Arc<dyn AuthorizationChecker>,
    sessions: Arc<dyn SessionIssuer>,
    validator: Arc<dyn ProviderValidator>,
}

impl std::fmt::Debug for OidcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcService")
            .field("states", &self.states)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl OidcService {
    /// Creates a service builder.
    #[must_use]
    pub fn builder() -> OidcServiceBuilder {
        OidcServiceBuilder::default()
    }

    /// Returns the state token service.
    #[must_use]
    pub fn states(&self) -> &Arc<StateTokenService> {
        &self.states
    }

    /// Returns the client configuration resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<ClientConfigResolver> {
        &self.resolver
    }

    /// Builds the URL that starts a login at the provider.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Unauthorized`] for an unknown provider or an
    /// unacceptable origin, and other errors if the URL cannot be built.
    #[instrument(skip_all, fields(provider_id = %request.provider_id))]
    pub async fn authorization_url(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<String, OidcError> {
        let provider = self.provider(&request.provider_id).await?;
        let redirect_uri = self
            .redirects
            .redirect_uri(request.request_origin.as_deref(), &request.request_headers)?;
        let state = self
            .states
            .generate_secure_state(provider.id.as_str(), &request.state, Some(&redirect_uri))
            .await?;

        if let Some(endpoint) = provider.custom_authorization_endpoint() {
            debug!("using the provider's authorization endpoint");
            let mut url = Url::parse(endpoint).map_err(|e| {
                OidcError::Configuration(format!("invalid authorization endpoint: {e}"))
            })?;
            url.query_pairs_mut()
                .append_pair("client_id", &provider.client_id)
                .append_pair("redirect_uri", &redirect_uri)
                .append_pair("scope", &provider.scope_string())
                .append_pair("state", &state)
                .append_pair("response_type", "code");
            return Ok(url.into());
        }

        let mut config = self.resolver.get_or_create_config(&provider).await;
        if provider.has_insecure_issuer() && !config.allows_insecure_requests() {
            config = Arc::new(config.allowing_insecure_requests());
        }
        build_authorization_url(&provider, &config, &redirect_uri, state)
    }

    /// Completes the callback and returns a session token.
    ///
    /// # Errors
    ///
    /// Always returns [`OidcError::Unauthorized`]. Refusals keep their
    /// specific message; any other failure is logged and reported as
    /// "Authentication failed".
    #[instrument(skip_all, fields(provider_id = %request.provider_id))]
    pub async fn handle_callback(&self, request: &CallbackRequest) -> Result<String, OidcError> {
        match self.complete_callback(request).await {
            Ok(token) => {
                info!("OIDC login succeeded");
                Ok(token)
            }
            Err(err @ OidcError::Unauthorized(_)) => {
                warn!(error = %err, "OIDC login refused");
                Err(err)
            }
            Err(err) => {
                error!(error = %err, "OIDC callback failed");
                Err(OidcError::unauthorized(GENERIC_AUTH_FAILURE))
            }
        }
    }

    /// Validates a provider definition, bypassing any cached configuration.
    #[instrument(skip_all, fields(provider_id = %provider.id))]
    pub async fn validate_provider(&self, provider: &Provider) -> ProviderValidation {
        self.resolver.clear_cache(Some(provider.id.as_str()));
        self.validator.validate(provider).await
    }

    /// Evicts one provider's cached configuration, or all of them.
    pub fn clear_cache(&self, provider_id: Option<&str>) {
        self.resolver.clear_cache(provider_id);
    }

    async fn provider(&self, provider_id: &str) -> Result<Provider, OidcError> {
        self.providers
            .provider(provider_id)
            .await?
            .ok_or_else(|| OidcError::unauthorized(format!("Unknown provider: {provider_id}")))
    }

    async fn complete_callback(&self, request: &CallbackRequest) -> Result<String, OidcError> {
        let provider = self.provider(&request.provider_id).await?;

        let validated = self
            .states
            .validate_secure_state(&request.state, provider.id.as_str())
            .await?;
        let redirect_uri = validated
            .redirect_uri
            .ok_or_else(|| OidcError::unauthorized("Missing redirect URI in state"))?;
        self.note_origin_drift(request, &redirect_uri);

        let config = self.resolver.get_or_create_config(&provider).await;

        let callback_url = rebuild_callback_url(&provider, request, &redirect_uri)?;

        if validated.client_state.is_empty() {
            return Err(OidcError::unauthorized("Invalid state: missing client state"));
        }

        let tokens = self
            .exchanger
            .exchange(
                &config,
                &TokenExchangeRequest {
                    code: request.code.clone(),
                    client_state: validated.client_state,
                    redirect_uri,
                    callback_url,
                    full_callback_url: request.full_callback_url.clone(),
                },
            )
            .await?;

        let verified = self
            .claims
            .verify_id_token(&provider, &config, &tokens.id_token)
            .await?;

        self.authorization.check(&provider, &verified.claims)?;

        self.sessions
            .create_session(&provider.id, &verified.subject)
            .await
    }

    /// Logs when the callback arrives on a different origin than the login started from.
    fn note_origin_drift(&self, request: &CallbackRequest, stored_redirect_uri: &str) {
        if let Ok(current) = self
            .redirects
            .redirect_uri(request.request_origin.as_deref(), &request.request_headers)
        {
            if current != stored_redirect_uri {
                debug!(
                    stored = stored_redirect_uri,
                    current = %current,
                    "callback origin differs from the login origin"
                );
            }
        }
    }
}

fn build_authorization_url(
    provider: &Provider,
    config: &ClientConfiguration,
    redirect_uri: &str,
    state: String,
) -> Result<String, OidcError> {
    let endpoint = config.authorization_endpoint().ok_or_else(|| {
        OidcError::Configuration("provider has no authorization endpoint".to_string())
    })?;
    if is_plain_http(endpoint) && !config.allows_insecure_requests() {
        return Err(OidcError::Configuration(format!(
            "refusing insecure authorization endpoint {endpoint}"
        )));
    }

    let auth_url = AuthUrl::new(endpoint.to_string())
        .map_err(|e| OidcError::Configuration(format!("invalid authorization endpoint: {e}")))?;
    let redirect_url = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| OidcError::Configuration(format!("invalid redirect URI: {e}")))?;

    let client = BasicClient::new(ClientId::new(config.client_id().to_string()))
        .set_auth_uri(auth_url)
        .set_redirect_uri(redirect_url);

    let (url, _) = client
        .authorize_url(move || CsrfToken::new(state))
        .add_scopes(provider.scopes.iter().cloned().map(Scope::new))
        .url();
    Ok(url.to_string())
}

/// Rebuilds the callback URL from the stored redirect URI.
///
/// The token endpoint compares `redirect_uri` byte-for-byte with the one
/// used at authorization time, so the current request's path is never used.
fn rebuild_callback_url(
    provider: &Provider,
    request: &CallbackRequest,
    redirect_uri: &str,
) -> Result<Url, OidcError> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| OidcError::Configuration(format!("invalid stored redirect URI: {e}")))?;
    url.query_pairs_mut()
        .append_pair("code", &request.code)
        .append_pair("state", &request.state);

    if let Some(full) = request.full_callback_url.as_deref() {
        match Url::parse(full) {
            Ok(received) => {
                for (name, value) in received.query_pairs() {
                    if PASS_THROUGH_PARAMS.contains(&name.as_ref()) && !has_param(&url, &name) {
                        url.query_pairs_mut().append_pair(&name, &value);
                    }
                }
            }
            Err(e) => debug!(error = %e, "ignoring unparseable callback URL"),
        }
    }

    if !has_param(&url, "iss") {
        if let Some(issuer) = provider.issuer() {
            url.query_pairs_mut().append_pair("iss", issuer);
        }
    }
    Ok(url)
}

fn has_param(url: &Url, name: &str) -> bool {
    url.query_pairs().any(|(existing, _)| existing == name)
}

/// Builder for [`OidcService`].
///
/// Provider source, state service and resolver are required; every other
/// collaborator defaults to the implementation in this crate.
#[derive(Default)]
pub struct OidcServiceBuilder {
    config: SsoConfig,
    providers: Option<Arc<dyn ProviderSource>>,
    states: Option<Arc<StateTokenService>>,
    resolver: Option<Arc<ClientConfigResolver>>,
    redirects: Option<Arc<dyn RedirectUriResolver>>,
    exchanger: Option<Arc<dyn TokenExchanger>>,
    claims: Option<Arc<dyn ClaimsValidator>>,
    authorization: Option<Arc<dyn AuthorizationChecker>>,
    sessions: Option<Arc<dyn SessionIssuer>>,
    validator: Option<Arc<dyn ProviderValidator>>,
}

impl OidcServiceBuilder {
    /// Sets the configuration used for default collaborators.
    #[must_use]
    pub fn config(mut self, config: SsoConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the provider source.
    #[must_use]
    pub fn providers(mut self, providers: Arc<dyn ProviderSource>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Sets the state token service.
    #[must_use]
    pub fn states(mut self, states: Arc<StateTokenService>) -> Self {
        self.states = Some(states);
        self
    }

    /// Sets the client configuration resolver.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<ClientConfigResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the redirect-URI resolver.
    #[must_use]
    pub fn redirects(mut self, redirects: Arc<dyn RedirectUriResolver>) -> Self {
        self.redirects = Some(redirects);
        self
    }

    /// Sets the token exchanger.
    #[must_use]
    pub fn exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Sets the claims validator.
    #[must_use]
    pub fn claims(mut self, claims: Arc<dyn ClaimsValidator>) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Sets the authorization checker.
    #[must_use]
    pub fn authorization(mut self, authorization: Arc<dyn AuthorizationChecker>) -> Self {
        self.authorization = Some(authorization);
        self
    }

    /// Sets the session issuer.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<dyn SessionIssuer>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets the provider validator.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn ProviderValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Builds the service.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] if a required collaborator is
    /// missing or a default cannot be created.
    pub fn build(self) -> Result<OidcService, OidcError> {
        let providers = self
            .providers
            .ok_or_else(|| OidcError::Configuration("provider source is required".to_string()))?;
        let states = self
            .states
            .ok_or_else(|| OidcError::Configuration("state service is required".to_string()))?;
        let resolver = self
            .resolver
            .ok_or_else(|| OidcError::Configuration("config resolver is required".to_string()))?;

        let exchanger = match self.exchanger {
            Some(exchanger) => exchanger,
            None => Arc::new(OAuth2TokenExchanger::new(self.config.http_timeout())?),
        };
        let claims = match self.claims {
            Some(claims) => claims,
            None => Arc::new(JwksClaimsValidator::new(Arc::new(HttpKeySource::new(
                self.config.http_timeout(),
            )?))),
        };
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(DiscoveryValidator::new(Arc::clone(resolver.discovery()))));

        Ok(OidcService {
            providers,
            states,
            redirects: self
                .redirects
                .unwrap_or_else(|| Arc::new(OriginRedirectResolver::from_config(&self.config))),
            exchanger,
            claims,
            authorization: self
                .authorization
                .unwrap_or_else(|| Arc::new(ClaimRuleEvaluator::new())),
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new(self.config.session_ttl()))),
            validator,
            resolver,
        })
    }
}
