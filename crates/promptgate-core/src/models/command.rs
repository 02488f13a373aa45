//! Parsed command and execution plan types.

use serde::{Deserialize, Serialize};

use super::gate::GateMode;

/// Shell verification attached to a step (`:: verify:"cargo test"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyDirective {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// One step of a parsed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedStep {
    pub prompt_id: String,
    /// Raw argument text exactly as written after the prompt id.
    #[serde(default)]
    pub raw_args: String,
    /// Inline gate references or criteria attached with `::`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_gates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyDirective>,
}

impl ParsedStep {
    pub fn new(prompt_id: impl Into<String>, raw_args: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            raw_args: raw_args.into(),
            inline_gates: Vec::new(),
            verify: None,
        }
    }
}

/// Output of the command parser collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCommand {
    pub steps: Vec<ParsedStep>,
    /// Framework selected with an `@NAME` operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Gate mode selected inline with `:: mode:advise`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_mode: Option<GateMode>,
}

impl ParsedCommand {
    pub fn is_chain(&self) -> bool {
        self.steps.len() > 1
    }
}

/// How a prompt definition wants to be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptExecution {
    /// Rendered as-is, no framework processing.
    Prompt,
    /// Eligible for framework system prompt and style guidance.
    #[default]
    Template,
}

/// Execution kind, resolved once during planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutionKind {
    Prompt { step: ParsedStep },
    Template { step: ParsedStep },
    Chain { steps: Vec<ParsedStep> },
}

impl ExecutionKind {
    pub fn steps(&self) -> Vec<&ParsedStep> {
        match self {
            ExecutionKind::Prompt { step } | ExecutionKind::Template { step } => vec![step],
            ExecutionKind::Chain { steps } => steps.iter().collect(),
        }
    }

    pub fn step(&self, number: u32) -> Option<&ParsedStep> {
        if number == 0 {
            return None;
        }
        self.steps().get(number as usize - 1).copied()
    }

    pub fn total_steps(&self) -> u32 {
        self.steps().len() as u32
    }

    pub fn is_chain(&self) -> bool {
        matches!(self, ExecutionKind::Chain { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionKind::Prompt { .. } => "prompt",
            ExecutionKind::Template { .. } => "template",
            ExecutionKind::Chain { .. } => "chain",
        }
    }
}

/// Result of the planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub kind: ExecutionKind,
    /// Stable id of the step list; present whenever a session is needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    /// Category of the first step's prompt (drives category injection rules).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// True when state must survive this request (chains, gated or verified steps).
    pub requires_session: bool,
    /// True when the plan was rebuilt from a stored session blueprint.
    #[serde(default)]
    pub from_session: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_kind_steps() {
        let kind = ExecutionKind::Chain {
            steps: vec![ParsedStep::new("a", ""), ParsedStep::new("b", "x=1")],
        };
        assert_eq!(kind.total_steps(), 2);
        assert_eq!(kind.step(2).map(|s| s.prompt_id.as_str()), Some("b"));
        assert!(kind.step(0).is_none());
        assert!(kind.step(3).is_none());
        assert!(kind.is_chain());

        let single = ExecutionKind::Prompt {
            step: ParsedStep::new("a", ""),
        };
        assert_eq!(single.total_steps(), 1);
        assert_eq!(single.label(), "prompt");
    }
}
