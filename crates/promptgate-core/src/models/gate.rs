//! Gate definitions.
//!
//! Canonical gates are loaded from YAML files and live for the process
//! lifetime. Temporary gates use the same shape but are owned by a scope.
//!
//! ```yaml
//! id: code-quality
//! name: "Code Quality"
//! type: validation
//! description: "Checks the response for basic engineering hygiene"
//! guidance: |
//!   Prefer small functions and explain trade-offs.
//! pass_criteria:
//!   - "contains:## Summary"
//!   - "min_words:50"
//!   - "Mentions error handling"
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime boundary for a temporary gate or an injection override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateScope {
    #[default]
    Execution,
    Session,
    Chain,
    Step,
}

impl GateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateScope::Execution => "execution",
            GateScope::Session => "session",
            GateScope::Chain => "chain",
            GateScope::Step => "step",
        }
    }
}

impl std::fmt::Display for GateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateType {
    /// Blocks advancement until its criteria pass.
    #[default]
    Validation,
    /// Only contributes guidance text.
    Guidance,
}

/// How a gate came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateSource {
    /// Declared by a person (definition file or explicit request field).
    #[default]
    Manual,
    /// Generated by the engine from inline criteria text.
    Automatic,
}

/// Enforcement strength for gate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    #[default]
    Enforce,
    Advise,
    Report,
}

impl GateMode {
    pub fn blocks(&self) -> bool {
        matches!(self, GateMode::Enforce)
    }
}

impl std::str::FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enforce" => Ok(GateMode::Enforce),
            "advise" => Ok(GateMode::Advise),
            "report" => Ok(GateMode::Report),
            other => Err(format!("Unknown gate mode: {}", other)),
        }
    }
}

/// A gate definition (canonical or temporary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub id: String,

    /// Display name; defaults to the id when omitted.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub scope: GateScope,

    #[serde(rename = "type", default)]
    pub gate_type: GateType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub guidance: String,

    /// Ordered criteria. Prefixed forms (`contains:`, `min_words:` ...) are
    /// checked mechanically, everything else needs a verdict.
    #[serde(default)]
    pub pass_criteria: Vec<String>,

    #[serde(default)]
    pub source: GateSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl GateDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scope: GateScope::default(),
            gate_type: GateType::default(),
            description: String::new(),
            guidance: String::new(),
            pass_criteria: Vec::new(),
            source: GateSource::default(),
            expires_at: None,
        }
    }

    pub fn with_criteria(mut self, criteria: &[&str]) -> Self {
        self.pass_criteria = criteria.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = guidance.into();
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn enforces(&self) -> bool {
        self.gate_type == GateType::Validation
    }

    /// Parse a gate definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let mut gate: GateDefinition = serde_yaml::from_str(yaml)
            .map_err(|e| format!("Failed to parse gate YAML: {}", e))?;
        if gate.name.trim().is_empty() {
            gate.name = gate.id.clone();
        }
        Ok(gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gate_yaml() {
        let yaml = r#"
id: code-quality
name: "Code Quality"
description: "Hygiene"
guidance: "Keep it small."
pass_criteria:
  - "contains:## Summary"
  - "Mentions error handling"
"#;
        let gate = GateDefinition::from_yaml(yaml).unwrap();
        assert_eq!(gate.id, "code-quality");
        assert_eq!(gate.gate_type, GateType::Validation);
        assert_eq!(gate.scope, GateScope::Execution);
        assert_eq!(gate.source, GateSource::Manual);
        assert_eq!(gate.pass_criteria.len(), 2);
    }

    #[test]
    fn test_name_defaults_to_id() {
        let gate = GateDefinition::from_yaml("id: security\ntype: guidance\n").unwrap();
        assert_eq!(gate.display_name(), "security");
        assert!(!gate.enforces());
    }

    #[test]
    fn test_expiry() {
        let mut gate = GateDefinition::new("g", "G");
        let now = Utc::now();
        assert!(!gate.is_expired(now));
        gate.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(gate.is_expired(now));
    }
}
