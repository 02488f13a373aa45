use serde::{Deserialize, Serialize};

use super::gate::{GateMode, GateScope, GateType};

/// Inbound `prompt_engine` request.
///
/// The core never interprets `command` itself beyond handing it to the
/// command parser; only its presence matters for planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionRequest {
    pub command: Option<String>,
    pub chain_id: Option<String>,
    pub session_id: Option<String>,
    /// The caller's answer to the previously rendered step.
    pub user_response: Option<String>,
    /// `GATE_REVIEW: PASS|FAIL - <reason>` style verdict.
    pub gate_verdict: Option<String>,
    /// Directive answering an escalation.
    pub gate_action: Option<GateAction>,
    pub force_restart: bool,
    /// Free-form arguments merged into the resolved prompt arguments.
    pub options: serde_json::Map<String, serde_json::Value>,
    pub quality_gates: Vec<String>,
    pub custom_checks: Vec<CustomCheck>,
    pub temporary_gates: Vec<TemporaryGateInput>,
    pub gate_scope: Option<GateScope>,
    pub gate_mode: Option<GateMode>,
}

impl ExecutionRequest {
    /// Convenience constructor for a plain command.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn has_command(&self) -> bool {
        non_empty(&self.command).is_some()
    }

    pub fn command_text(&self) -> Option<&str> {
        non_empty(&self.command)
    }

    pub fn session_id(&self) -> Option<&str> {
        non_empty(&self.session_id)
    }

    pub fn chain_id(&self) -> Option<&str> {
        non_empty(&self.chain_id)
    }

    pub fn user_response(&self) -> Option<&str> {
        non_empty(&self.user_response)
    }

    pub fn gate_verdict(&self) -> Option<&str> {
        non_empty(&self.gate_verdict)
    }

    /// True when the caller asked to continue an existing session rather
    /// than (re)issuing a chain definition.
    pub fn is_explicit_continuation(&self) -> bool {
        self.session_id().is_some() || (!self.has_command() && self.chain_id().is_some())
    }

    pub fn has_gate_overrides(&self) -> bool {
        !self.quality_gates.is_empty()
            || !self.custom_checks.is_empty()
            || !self.temporary_gates.is_empty()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Caller decision after an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Retry,
    Skip,
    Abort,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Retry => "retry",
            GateAction::Skip => "skip",
            GateAction::Abort => "abort",
        }
    }

    pub fn all() -> [GateAction; 3] {
        [GateAction::Retry, GateAction::Skip, GateAction::Abort]
    }
}

impl std::str::FromStr for GateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(GateAction::Retry),
            "skip" => Ok(GateAction::Skip),
            "abort" => Ok(GateAction::Abort),
            other => Err(format!("Unknown gate action: {}", other)),
        }
    }
}

/// A named ad-hoc check supplied with the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCheck {
    pub name: String,
    pub description: String,
}

/// Full temporary gate definition supplied with the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporaryGateInput {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub guidance: String,
    pub pass_criteria: Vec<String>,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    pub scope: Option<GateScope>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_fields_are_absent() {
        let req: ExecutionRequest = serde_json::from_value(serde_json::json!({
            "command": "   ",
            "session_id": "",
            "chain_id": "chain-abc"
        }))
        .unwrap();

        assert!(!req.has_command());
        assert_eq!(req.session_id(), None);
        assert_eq!(req.chain_id(), Some("chain-abc"));
        assert!(req.is_explicit_continuation());
    }

    #[test]
    fn test_parse_gate_action() {
        let req: ExecutionRequest = serde_json::from_value(serde_json::json!({
            "session_id": "s1",
            "gate_action": "skip"
        }))
        .unwrap();
        assert_eq!(req.gate_action, Some(GateAction::Skip));
        assert_eq!("ABORT".parse::<GateAction>().unwrap(), GateAction::Abort);
        assert!("later".parse::<GateAction>().is_err());
    }
}
