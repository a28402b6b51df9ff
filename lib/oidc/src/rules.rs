//! Authorization-rule enforcement seam.

use nas_sso_authz::ClaimRuleEvaluator;
use nas_sso_core::{IdTokenClaims, Provider};

use crate::error::OidcError;

/// Decides whether an authenticated identity may sign in.
pub trait AuthorizationChecker: Send + Sync {
    /// Checks the provider's rules against the claims.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Unauthorized`] with a descriptive message when
    /// the login is refused.
    fn check(&self, provider: &Provider, claims: &IdTokenClaims) -> Result<(), OidcError>;
}

impl AuthorizationChecker for ClaimRuleEvaluator {
    fn check(&self, provider: &Provider, claims: &IdTokenClaims) -> Result<(), OidcError> {
        ClaimRuleEvaluator::check(self, provider, claims)
            .map_err(|e| OidcError::Unauthorized(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nas_sso_core::{AuthorizationRule, RuleOperator};
    use serde_json::json;

    #[test]
    fn denial_is_unauthorized_with_reason() {
        let provider = Provider::new("google".parse().expect("id"), "Google", "nas")
            .with_rule(AuthorizationRule::new(
                "hd",
                RuleOperator::Equals,
                vec!["example.com".to_string()],
            ));
        let claims: IdTokenClaims =
            serde_json::from_value(json!({"sub": "u", "hd": "other.com"})).expect("claims");

        let checker: &dyn AuthorizationChecker = &ClaimRuleEvaluator::new();
        let err = checker.check(&provider, &claims).unwrap_err();

        assert!(err.is_unauthorized());
        assert!(err.client_message().contains("google"));
    }
}
