//! Rule model
//!
//! TigerStyle: Validated on construction, explicit size limits.

use crate::constants::{RULE_EXPRESSION_LENGTH_BYTES_MAX, RULE_NAME_LENGTH_BYTES_MAX};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a rule's violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, lowest first
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A behavioral rule evaluated against completed traces
///
/// The expression is opaque here; parsing and evaluation belong to the
/// rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Create a new enabled rule with medium severity
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Result<Self> {
        let rule = Self {
            id: id.into(),
            name: name.into(),
            expression: expression.into(),
            severity: Severity::default(),
            enabled: true,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Set the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Check the rule is well formed
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidRule {
                id: self.id.clone(),
                reason: "id must not be empty".into(),
            });
        }
        if self.expression.is_empty() {
            return Err(Error::InvalidRule {
                id: self.id.clone(),
                reason: "expression must not be empty".into(),
            });
        }
        if self.expression.len() > RULE_EXPRESSION_LENGTH_BYTES_MAX {
            return Err(Error::InvalidRule {
                id: self.id.clone(),
                reason: format!(
                    "expression is {} bytes, max {}",
                    self.expression.len(),
                    RULE_EXPRESSION_LENGTH_BYTES_MAX
                ),
            });
        }
        if self.name.len() > RULE_NAME_LENGTH_BYTES_MAX {
            return Err(Error::InvalidRule {
                id: self.id.clone(),
                reason: format!(
                    "name is {} bytes, max {}",
                    self.name.len(),
                    RULE_NAME_LENGTH_BYTES_MAX
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_new() {
        let rule = Rule::new("r-1", "slow spans", "span.duration > 100").unwrap();
        assert_eq!(rule.id, "r-1");
        assert!(rule.enabled);
        assert_eq!(rule.severity, Severity::Medium);
    }

    #[test]
    fn test_rule_rejects_empty_fields() {
        assert!(Rule::new("", "n", "true").is_err());
        assert!(Rule::new("r-1", "n", "").is_err());
    }

    #[test]
    fn test_rule_rejects_long_expression() {
        let expr = "x".repeat(RULE_EXPRESSION_LENGTH_BYTES_MAX + 1);
        let err = Rule::new("r-1", "n", expr).unwrap_err();
        assert!(matches!(err, Error::InvalidRule { .. }));
    }

    #[test]
    fn test_rule_serde_defaults() {
        let rule: Rule =
            serde_json::from_str(r#"{"id":"r-1","name":"n","expression":"true"}"#).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.severity, Severity::Medium);
    }
}
