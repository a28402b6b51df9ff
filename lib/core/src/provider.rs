//! Identity provider definitions.
//!
//! A [`Provider`] is owned by the persistence layer and read-only to the
//! authentication core. It either names an issuer (endpoints are then
//! discovered) or supplies its endpoints by hand.

use serde::{Deserialize, Serialize};

use crate::id::ProviderId;

/// An OIDC identity provider the platform can sign users in with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Stable identifier; also the client-configuration cache key.
    pub id: ProviderId,
    /// Human-readable name shown on the login page.
    pub name: String,
    /// OAuth2 client ID registered with the provider.
    pub client_id: String,
    /// OAuth2 client secret. Absent for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Issuer URL used for discovery. Empty or absent skips discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Manual authorization endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    /// Manual token endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// Manual JWKS URI override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    /// Scopes to request, in order.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Claim predicates a user must satisfy to obtain a session.
    #[serde(default)]
    pub authorization_rules: Vec<AuthorizationRule>,
    /// How `authorization_rules` combine.
    #[serde(default)]
    pub authorization_rule_mode: RuleMode,
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

impl Provider {
    /// Creates a provider with default scopes and no endpoints or rules.
    #[must_use]
    pub fn new(id: ProviderId, name: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            client_id: client_id.into(),
            client_secret: None,
            issuer: None,
            authorization_endpoint: None,
            token_endpoint: None,
            jwks_uri: None,
            scopes: default_scopes(),
            authorization_rules: Vec::new(),
            authorization_rule_mode: RuleMode::default(),
        }
    }

    /// Sets the client secret, making this a confidential client.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the issuer URL.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Sets the manual authorization endpoint.
    #[must_use]
    pub fn with_authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.authorization_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the manual token endpoint.
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the manual JWKS URI.
    #[must_use]
    pub fn with_jwks_uri(mut self, uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(uri.into());
        self
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Appends an authorization rule.
    #[must_use]
    pub fn with_rule(mut self, rule: AuthorizationRule) -> Self {
        self.authorization_rules.push(rule);
        self
    }

    /// Sets how rules combine.
    #[must_use]
    pub fn with_rule_mode(mut self, mode: RuleMode) -> Self {
        self.authorization_rule_mode = mode;
        self
    }

    /// Returns the issuer if one is configured and non-empty.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref().filter(|issuer| !issuer.is_empty())
    }

    /// Returns the manual authorization endpoint if one is configured and non-empty.
    #[must_use]
    pub fn custom_authorization_endpoint(&self) -> Option<&str> {
        self.authorization_endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.is_empty())
    }

    /// Returns the client secret if one is configured and non-empty.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
    }

    /// Returns true if the issuer uses plaintext HTTP.
    #[must_use]
    pub fn has_insecure_issuer(&self) -> bool {
        self.issuer()
            .is_some_and(|issuer| issuer.to_ascii_lowercase().starts_with("http://"))
    }

    /// Returns the scopes joined by single spaces, as sent on the wire.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Comparison applied by an [`AuthorizationRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    /// The claim equals one of the values.
    Equals,
    /// The claim contains one of the values as a substring.
    Contains,
    /// The claim starts with one of the values.
    StartsWith,
    /// The claim ends with one of the values.
    EndsWith,
}

impl std::fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
        };
        f.write_str(name)
    }
}

/// How multiple rules on a provider combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    /// Any passing rule grants access.
    #[default]
    Or,
    /// Every rule must pass.
    And,
}

impl std::fmt::Display for RuleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Or => f.write_str("or"),
            Self::And => f.write_str("and"),
        }
    }
}

/// A predicate over one ID-token claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRule {
    /// Claim name; dotted paths address nested objects.
    pub claim: String,
    /// Comparison to apply.
    pub operator: RuleOperator,
    /// Accepted values; the rule passes if any of them matches.
    pub value: Vec<String>,
}

impl AuthorizationRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(claim: impl Into<String>, operator: RuleOperator, value: Vec<String>) -> Self {
        Self {
            claim: claim.into(),
            operator,
            value,
        }
    }
}

impl std::fmt::Display for AuthorizationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.claim,
            self.operator,
            self.value.join(", ")
        )
    }
}
