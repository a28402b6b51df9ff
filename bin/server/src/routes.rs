//! Authentication routes: provider listing, login redirect, callback,
//! session redemption and provider validation.

use axum::{
    Json, Router,
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderMap, Uri, header},
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use nas_sso_oidc::{
    AuthorizationRequest, CallbackRequest, ProviderSource, ProviderValidation, RequestHeaders,
    Session, extract_provider_from_state,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::Duration as TimeDuration;
use tower_http::trace::TraceLayer;

use crate::error::AuthError;
use crate::state::AppState;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "sso_session";

/// Builds the router.
pub fn router(state: Arc<AppState>, callback_path: &str) -> Router {
    Router::new()
        .route("/auth/oidc/providers", get(list_providers))
        .route("/auth/oidc/authorize/{provider_id}", get(authorize))
        .route(callback_path, get(callback))
        .route("/auth/oidc/session", get(redeem_session))
        .route(
            "/auth/oidc/providers/{provider_id}/validate",
            post(validate_provider),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A provider as shown on the login page.
#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    id: String,
    name: String,
}

/// Query parameters for starting a login.
#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    state: String,
}

/// Query parameters for the OIDC callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Lists the configured providers.
pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderSummary>> {
    let providers = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|provider| ProviderSummary {
            id: provider.id.to_string(),
            name: provider.name,
        })
        .collect();
    Json(providers)
}

/// Starts a login by redirecting to the identity provider.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> Result<Redirect, AuthError> {
    let request = AuthorizationRequest {
        provider_id,
        state: query.state,
        request_origin: origin(&headers),
        request_headers: request_headers(&headers),
    };
    let url = state.service.authorization_url(&request).await?;
    Ok(Redirect::to(&url))
}

/// Handles the identity provider's redirect back and sets the session cookie.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    if let Some(error) = query.error {
        return Err(AuthError::ProviderRefused {
            error,
            description: query.error_description,
        });
    }
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or(AuthError::MissingParameter("code"))?;
    let state_token = query
        .state
        .filter(|state| !state.is_empty())
        .ok_or(AuthError::MissingParameter("state"))?;
    let provider_id = extract_provider_from_state(&state_token)
        .ok_or_else(|| AuthError::Unauthorized("Invalid state: missing provider".to_string()))?
        .to_string();

    let request_headers = request_headers(&headers);
    let request = CallbackRequest {
        provider_id,
        code,
        state: state_token,
        request_origin: origin(&headers),
        full_callback_url: full_request_url(&request_headers, &uri),
        request_headers,
    };
    let token = state.service.handle_callback(&request).await?;

    let session_cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::try_from(state.session_ttl).unwrap_or(TimeDuration::MAX));

    Ok((jar.add(session_cookie), Redirect::to("/")))
}

/// Redeems the session cookie, once.
pub async fn redeem_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(AuthError::MissingSession)?;
    let session: Session = state
        .sessions
        .redeem(&token)
        .await
        .ok_or(AuthError::MissingSession)?;

    let remove_session = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    Ok((jar.add(remove_session), Json(session)))
}

/// Re-validates a configured provider against its identity provider.
pub async fn validate_provider(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<Json<ProviderValidation>, AuthError> {
    let provider = state
        .registry
        .provider(&provider_id)
        .await?
        .ok_or(AuthError::ProviderNotFound(provider_id))?;
    Ok(Json(state.service.validate_provider(&provider).await))
}

fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
        .collect()
}

fn origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .filter(|value| *value != "null")
        .map(str::to_string)
}

/// Reconstructs the absolute URL the request arrived on.
fn full_request_url(headers: &RequestHeaders, uri: &Uri) -> Option<String> {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))?;
    let scheme = headers.get("x-forwarded-proto").unwrap_or("http");
    let path = uri.path_and_query().map_or("/", |path| path.as_str());
    Some(format!("{scheme}://{host}{path}"))
}
