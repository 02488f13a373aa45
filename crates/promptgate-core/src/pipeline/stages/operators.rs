use async_trait::async_trait;

use super::support::unknown_framework;
use crate::error::EngineError;
use crate::models::ToolResponse;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Reads: `parsed`, `plan`, `request`. Writes: `response` (rejections only).
///
/// Runs before session management so a bad operator never creates or
/// mutates a session.
pub struct OperatorValidationStage {
    state: EngineState,
}

impl OperatorValidationStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    fn check(&self, ctx: &ExecutionContext) -> Result<Option<ToolResponse>, EngineError> {
        let plan = ctx.require_plan(self.name())?;
        let request = ctx.request();

        if let Some(framework) = ctx.parsed.as_ref().and_then(|p| p.framework.as_deref()) {
            if !self.state.frameworks.has_framework(framework) {
                return Ok(Some(unknown_framework(
                    &self.state.frameworks.framework_ids(),
                    framework,
                )));
            }
        }

        for (i, step) in plan.kind.steps().into_iter().enumerate() {
            let Some(verify) = &step.verify else { continue };
            let problem = if verify.command.trim().is_empty() {
                Some("verification command is empty")
            } else if verify.max_attempts == Some(0) {
                Some("`max` must be at least 1")
            } else if verify.timeout_ms == Some(0) {
                Some("`timeout` must be greater than 0")
            } else {
                None
            };
            if let Some(problem) = problem {
                return Ok(Some(ToolResponse::rejected(format!(
                    "Invalid verify operator on step {} (`{}`): {}.",
                    i + 1,
                    step.prompt_id,
                    problem
                ))));
            }
        }

        for gate in &request.temporary_gates {
            let unnamed = gate.name.trim().is_empty()
                && gate.id.as_deref().map(str::trim).unwrap_or("").is_empty();
            let empty = gate.pass_criteria.iter().all(|c| c.trim().is_empty())
                && gate.guidance.trim().is_empty()
                && gate.description.trim().is_empty();
            if unnamed || empty {
                return Ok(Some(ToolResponse::rejected(
                    "Each temporary gate needs a name (or id) and at least one of pass_criteria, guidance or description.",
                )));
            }
        }

        if request.custom_checks.iter().any(|c| c.name.trim().is_empty()) {
            return Ok(Some(ToolResponse::rejected("Custom checks need a name.")));
        }

        if request.gate_verdict().is_some() && request.gate_action.is_some() {
            return Ok(Some(ToolResponse::rejected(
                "Send either `gate_verdict` or `gate_action`, not both.",
            )));
        }

        Ok(None)
    }
}

#[async_trait]
impl PipelineStage for OperatorValidationStage {
    fn name(&self) -> &'static str {
        "operator_validation"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        match self.check(ctx)? {
            Some(rejection) => {
                tracing::info!(
                    "[OperatorValidation] Rejected: {}",
                    rejection.text_body()
                );
                ctx.set_response(rejection)
            }
            None => Ok(()),
        }
    }
}
