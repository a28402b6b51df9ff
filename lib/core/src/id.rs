//! Strongly-typed identifiers.
//!
//! Provider IDs are operator-chosen strings. They travel inside the OIDC
//! `state` parameter as the prefix before the first `:`, so they may not
//! contain a colon, whitespace, or be empty.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Stable identifier of an identity provider.
///
/// Used as the client-configuration cache key and as the routing prefix of
/// every state token issued for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ParseIdError> {
        let reason = if s.is_empty() {
            "must not be empty"
        } else if s.contains(':') {
            "must not contain ':'"
        } else if s.chars().any(char::is_whitespace) {
            "must not contain whitespace"
        } else {
            return Ok(());
        };
        Err(ParseIdError {
            id_type: "ProviderId",
            reason: reason.to_string(),
        })
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProviderId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ProviderId {
    type Error = ParseIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

impl AsRef<str> for ProviderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ProviderId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ProviderId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_plain_ids() {
        let id: ProviderId = "unraid.net".parse().expect("should parse");
        assert_eq!(id.as_str(), "unraid.net");
        assert_eq!(id.to_string(), "unraid.net");
    }

    #[test]
    fn parse_rejects_colon() {
        let err = "google:work".parse::<ProviderId>().unwrap_err();
        assert_eq!(err.id_type, "ProviderId");
        assert!(err.reason.contains("':'"));
    }

    #[test]
    fn parse_rejects_empty_and_whitespace() {
        assert!("".parse::<ProviderId>().is_err());
        assert!("my provider".parse::<ProviderId>().is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: ProviderId = serde_json::from_str("\"authentik\"").expect("deserialize");
        assert_eq!(ok, "authentik");

        let bad: Result<ProviderId, _> = serde_json::from_str("\"a:b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn id_serde_roundtrip() {
        let id: ProviderId = "keycloak".parse().expect("should parse");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"keycloak\"");
    }
}
