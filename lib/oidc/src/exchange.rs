//! Authorization-code exchange at the provider's token endpoint.

use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthType, AuthorizationCode, Client, ClientId, ClientSecret, ExtraTokenFields, RedirectUrl,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::client_config::ClientConfiguration;
use crate::discovery::is_plain_http;
use crate::error::OidcError;
use crate::http::build_http_client;

/// Extra token-response fields: the OIDC ID token.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct IdTokenFields {
    /// The raw ID token JWT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl std::fmt::Debug for IdTokenFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenFields")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ExtraTokenFields for IdTokenFields {}

type IdTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type ExchangeClient = Client<
    BasicErrorResponse,
    IdTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// What the token exchanger needs from the callback.
#[derive(Clone)]
pub struct TokenExchangeRequest {
    /// The authorization code.
    pub code: String,
    /// The caller's original state, recovered from the state token.
    pub client_state: String,
    /// The redirect URI used in the authorization request.
    pub redirect_uri: String,
    /// The callback URL rebuilt from the stored redirect URI.
    pub callback_url: Url,
    /// The callback URL exactly as received, if the caller supplied it.
    pub full_callback_url: Option<String>,
}

impl std::fmt::Debug for TokenExchangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeRequest")
            .field("code", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("callback_url", &self.callback_url.path())
            .finish_non_exhaustive()
    }
}

/// Tokens returned by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    /// OAuth2 access token.
    pub access_token: String,
    /// Raw ID token JWT.
    pub id_token: String,
    /// Refresh token, if issued.
    pub refresh_token: Option<String>,
    /// Access token lifetime, if given.
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchanges an authorization code for tokens.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Performs the exchange against the configuration's token endpoint.
    async fn exchange(
        &self,
        config: &ClientConfiguration,
        request: &TokenExchangeRequest,
    ) -> Result<TokenSet, OidcError>;
}

/// [`TokenExchanger`] using the `oauth2` client with client-secret-POST authentication.
#[derive(Debug, Clone)]
pub struct OAuth2TokenExchanger {
    http: reqwest::Client,
}

impl OAuth2TokenExchanger {
    /// Creates an exchanger with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, OidcError> {
        Ok(Self {
            http: build_http_client(timeout)?,
        })
    }

    /// Creates an exchanger using an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TokenExchanger for OAuth2TokenExchanger {
    #[instrument(skip_all, fields(issuer = %config.issuer()))]
    async fn exchange(
        &self,
        config: &ClientConfiguration,
        request: &TokenExchangeRequest,
    ) -> Result<TokenSet, OidcError> {
        if config.is_discovered() {
            check_issuer_parameter(config.issuer(), &request.callback_url)?;
        }

        let token_endpoint = config.token_endpoint().ok_or_else(|| {
            OidcError::Configuration("provider has no token endpoint".to_string())
        })?;
        if is_plain_http(token_endpoint) && !config.allows_insecure_requests() {
            return Err(OidcError::Configuration(format!(
                "refusing insecure token endpoint {token_endpoint}"
            )));
        }

        let token_url = TokenUrl::new(token_endpoint.to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid token endpoint: {e}")))?;
        let redirect_url = RedirectUrl::new(request.redirect_uri.clone())
            .map_err(|e| OidcError::Configuration(format!("invalid redirect URI: {e}")))?;

        let client = ExchangeClient::new(ClientId::new(config.client_id().to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);
        let client = match config.client_auth().client_secret() {
            Some(secret) => client.set_client_secret(ClientSecret::new(secret.to_string())),
            None => client,
        };

        let response = client
            .exchange_code(AuthorizationCode::new(request.code.clone()))
            .request_async(&self.http)
            .await
            .map_err(|e| OidcError::TokenExchange(format!("token exchange failed: {e}")))?;

        let id_token = response
            .extra_fields()
            .id_token
            .clone()
            .ok_or_else(|| OidcError::TokenExchange("no ID token in response".to_string()))?;

        debug!("authorization code exchanged");
        Ok(TokenSet {
            access_token: response.access_token().secret().clone(),
            id_token,
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in(),
        })
    }
}

/// Checks the RFC 9207 `iss` authorization-response parameter, when present.
fn check_issuer_parameter(expected: &str, callback_url: &Url) -> Result<(), OidcError> {
    let Some((_, iss)) = callback_url.query_pairs().find(|(name, _)| name == "iss") else {
        return Ok(());
    };
    if iss.trim_end_matches('/') != expected.trim_end_matches('/') {
        warn!(expected, received = %iss, "authorization response issuer mismatch");
        return Err(OidcError::TokenValidation(
            "authorization response issuer does not match".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_config::{ClientAuth, DiscoveredConfig, ManualConfig};
    use crate::discovery::IssuerMetadata;
    use nas_sso_core::Provider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(callback: &str) -> TokenExchangeRequest {
        TokenExchangeRequest {
            code: "auth-code".to_string(),
            client_state: "client".to_string(),
            redirect_uri: "https://nas.local/auth/oidc/callback".to_string(),
            callback_url: Url::parse(callback).expect("callback url"),
            full_callback_url: None,
        }
    }

    fn discovered(issuer: &str, token_endpoint: &str) -> ClientConfiguration {
        ClientConfiguration::Discovered(DiscoveredConfig {
            metadata: IssuerMetadata {
                issuer: issuer.to_string(),
                authorization_endpoint: format!("{issuer}/authorize"),
                token_endpoint: Some(token_endpoint.to_string()),
                jwks_uri: None,
                userinfo_endpoint: None,
            },
            client_id: "nas".to_string(),
            auth: ClientAuth::None,
            allow_insecure_requests: false,
        })
    }

    fn exchanger() -> OAuth2TokenExchanger {
        OAuth2TokenExchanger::new(Duration::from_secs(5)).expect("exchanger")
    }

    /// Serves one token response and returns the raw request it received.
    async fn one_shot_token_endpoint(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buffer = [0_u8; 4096];
            loop {
                let read = socket.read(&mut buffer).await.expect("read");
                if read == 0 {
                    break;
                }
                received.extend_from_slice(&buffer[..read]);
                if request_complete(&received) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).into_owned()
        });
        (format!("http://{address}/token"), handle)
    }

    fn request_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        received.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn exchanges_code_with_client_secret_post() {
        let (token_url, server) = one_shot_token_endpoint(
            r#"{"access_token":"at-1","token_type":"bearer","expires_in":3600,"refresh_token":"rt-1","id_token":"h.p.s"}"#,
        )
        .await;
        let provider = Provider::new("lan".parse().expect("id"), "LAN", "nas-client")
            .with_client_secret("s3cret")
            .with_token_endpoint(token_url);
        let config = ClientConfiguration::Manual(ManualConfig::from_provider(&provider));

        let tokens = exchanger()
            .exchange(&config, &request("https://nas.local/auth/oidc/callback?code=auth-code"))
            .await
            .expect("exchange");

        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.id_token, "h.p.s");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(tokens.expires_in, Some(Duration::from_secs(3600)));

        let received = server.await.expect("join");
        assert!(received.starts_with("POST /token"));
        assert!(received.contains("grant_type=authorization_code"));
        assert!(received.contains("code=auth-code"));
        assert!(received.contains("client_id=nas-client"));
        assert!(received.contains("client_secret=s3cret"));
        assert!(!received.to_ascii_lowercase().contains("authorization: basic"));
    }

    #[tokio::test]
    async fn missing_id_token_is_an_exchange_error() {
        let (token_url, _server) =
            one_shot_token_endpoint(r#"{"access_token":"at-1","token_type":"bearer"}"#).await;
        let provider = Provider::new("lan".parse().expect("id"), "LAN", "nas-client")
            .with_token_endpoint(token_url);
        let config = ClientConfiguration::Manual(ManualConfig::from_provider(&provider));

        let err = exchanger()
            .exchange(&config, &request("https://nas.local/auth/oidc/callback?code=c"))
            .await
            .unwrap_err();
        assert_eq!(err, OidcError::TokenExchange("no ID token in response".to_string()));
    }

    #[tokio::test]
    async fn insecure_token_endpoint_is_refused() {
        let config = discovered("https://idp.example", "http://idp.example/token");
        let err = exchanger()
            .exchange(&config, &request("https://nas.local/cb?code=c"))
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::Configuration(message) if message.contains("insecure")));
    }

    #[tokio::test]
    async fn missing_token_endpoint_is_a_configuration_error() {
        let provider = Provider::new("x".parse().expect("id"), "X", "nas");
        let config = ClientConfiguration::Manual(ManualConfig::from_provider(&provider));
        let err = exchanger()
            .exchange(&config, &request("https://nas.local/cb?code=c"))
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::Configuration(_)));
    }

    #[tokio::test]
    async fn issuer_parameter_mismatch_is_rejected() {
        let config = discovered("https://idp.example", "https://idp.example/token");
        let err = exchanger()
            .exchange(
                &config,
                &request("https://nas.local/cb?code=c&iss=https%3A%2F%2Fevil.example"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::TokenValidation(_)));
    }

    #[test]
    fn issuer_parameter_ignores_trailing_slash() {
        let url = Url::parse("https://nas.local/cb?iss=https%3A%2F%2Fidp.example%2F").expect("url");
        assert!(check_issuer_parameter("https://idp.example", &url).is_ok());

        let without = Url::parse("https://nas.local/cb?code=c").expect("url");
        assert!(check_issuer_parameter("https://idp.example", &without).is_ok());
    }

    #[test]
    fn debug_output_hides_tokens() {
        let tokens = TokenSet {
            access_token: "secret-access".to_string(),
            id_token: "secret-id".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: None,
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-"));
    }
}
