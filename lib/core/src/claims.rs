//! Claims decoded from an OIDC ID token.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full claim set of an ID token.
///
/// Standard claims have typed accessors; everything else (including
/// provider-specific claims such as `groups` or `cognito:groups`) is
/// reachable through [`IdTokenClaims::get`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdTokenClaims(Map<String, Value>);

impl IdTokenClaims {
    /// Wraps a decoded JSON object.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Returns the `sub` claim if it is a non-empty string.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.string("sub").filter(|sub| !sub.is_empty())
    }

    /// Returns the `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.string("iss")
    }

    /// Returns the `email` claim.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.string("email")
    }

    /// Returns the `email_verified` claim.
    ///
    /// Some providers send it as the string `"true"`/`"false"`.
    #[must_use]
    pub fn email_verified(&self) -> Option<bool> {
        match self.0.get("email_verified")? {
            Value::Bool(verified) => Some(*verified),
            Value::String(verified) => verified.parse().ok(),
            _ => None,
        }
    }

    /// Returns the display name, from `name` or `preferred_username`.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.string("name")
            .or_else(|| self.string("preferred_username"))
    }

    /// Returns the `exp` claim as seconds since the epoch.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.0.get("exp").and_then(Value::as_i64)
    }

    /// Looks up a claim by name.
    ///
    /// An exact top-level match wins, so names containing dots or colons
    /// (`cognito:groups`, `https://example.com/roles`) still resolve. Otherwise
    /// the name is treated as a dotted path into nested objects.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(name) {
            return Some(value);
        }

        let mut segments = name.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Returns the string values of a list-valued claim such as `groups`.
    #[must_use]
    pub fn string_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }

    /// Returns the underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn string(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for IdTokenClaims {
    fn from(claims: Map<String, Value>) -> Self {
        Self(claims)
    }
}
