//! Evaluation of provider authorization rules against ID-token claims.

use crate::error::AuthzError;
use nas_sso_core::{AuthorizationRule, IdTokenClaims, Provider, RuleMode, RuleOperator};
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Evaluates a provider's [`AuthorizationRule`]s.
///
/// A provider with no rules admits nobody.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimRuleEvaluator;

impl ClaimRuleEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Checks the claims against the provider's rules.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Denied`] when the rules reject the claims,
    /// [`AuthzError::NoRulesConfigured`] when the provider has none, and
    /// [`AuthzError::InvalidRule`] when a rule is malformed.
    #[instrument(skip_all, fields(provider_id = %provider.id, mode = %provider.authorization_rule_mode))]
    pub fn check(&self, provider: &Provider, claims: &IdTokenClaims) -> Result<(), AuthzError> {
        let rules = &provider.authorization_rules;
        if rules.is_empty() {
            warn!("provider has no authorization rules; denying login");
            return Err(AuthzError::NoRulesConfigured {
                provider: provider.id.clone(),
            });
        }

        for (position, rule) in rules.iter().enumerate() {
            validate_rule(rule).map_err(|reason| AuthzError::InvalidRule {
                provider: provider.id.clone(),
                index: position + 1,
                reason,
            })?;
        }

        let mode = provider.authorization_rule_mode;
        match mode {
            RuleMode::Or => {
                if rules.iter().any(|rule| rule_matches(rule, claims)) {
                    debug!("authorization granted");
                    return Ok(());
                }
                Err(AuthzError::Denied {
                    provider: provider.id.clone(),
                    mode,
                    reason: format!("none of the {} authorization rules matched", rules.len()),
                })
            }
            RuleMode::And => {
                if let Some(failed) = rules.iter().find(|rule| !rule_matches(rule, claims)) {
                    return Err(AuthzError::Denied {
                        provider: provider.id.clone(),
                        mode,
                        reason: format!("rule '{failed}' did not match"),
                    });
                }
                debug!("authorization granted");
                Ok(())
            }
        }
    }
}

fn validate_rule(rule: &AuthorizationRule) -> Result<(), String> {
    if rule.claim.trim().is_empty() {
        return Err("claim name is empty".to_string());
    }
    if rule.value.is_empty() {
        return Err(format!("no values given for claim '{}'", rule.claim));
    }
    Ok(())
}

fn rule_matches(rule: &AuthorizationRule, claims: &IdTokenClaims) -> bool {
    if rule.claim == "email" && claims.email_verified() == Some(false) {
        debug!(claim = %rule.claim, "email is not verified; rule does not match");
        return false;
    }

    let Some(value) = claims.get(&rule.claim) else {
        debug!(claim = %rule.claim, "claim missing from token");
        return false;
    };

    let matched = claim_strings(value).iter().any(|candidate| {
        rule.value
            .iter()
            .any(|expected| compare(rule.operator, candidate, expected))
    });
    debug!(claim = %rule.claim, operator = %rule.operator, matched, "rule evaluated");
    matched
}

fn claim_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Number(n) => vec![n.to_string()],
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_array() && !item.is_object())
            .flat_map(claim_strings)
            .collect(),
        Value::Null | Value::Object(_) => Vec::new(),
    }
}

fn compare(operator: RuleOperator, candidate: &str, expected: &str) -> bool {
    match operator {
        RuleOperator::Equals => candidate == expected,
        RuleOperator::Contains => candidate.contains(expected),
        RuleOperator::StartsWith => candidate.starts_with(expected),
        RuleOperator::EndsWith => candidate.ends_with(expected),
    }
}
