use async_trait::async_trait;

use super::support::unknown_prompt;
use crate::chain::compute_chain_id;
use crate::error::EngineError;
use crate::models::{
    ExecutionKind, ExecutionPlan, ParsedCommand, ParsedStep, PromptExecution, ToolResponse,
};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::prompts::PromptDefinition;
use crate::state::EngineState;

/// Resolves the execution kind once for the whole pass.
///
/// Reads: `parsed`, `request` (`session_id`, `chain_id`, gate overrides).
/// Writes: `plan`, `response` (unknown prompt / unknown session).
///
/// With a command, prompts are looked up and a single prompt that declares
/// `chain_steps` is expanded into a chain. Without one, the plan is rebuilt
/// from the stored session blueprint.
pub struct PlanningStage {
    state: EngineState,
}

impl PlanningStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    fn lookup(&self, prompt_id: &str) -> Result<PromptDefinition, ToolResponse> {
        self.state
            .prompts
            .get(prompt_id)
            .ok_or_else(|| unknown_prompt(&self.state.prompts, prompt_id))
    }

    /// Canonical ids and chain expansion. `Err` carries a rejection.
    fn resolve_steps(
        &self,
        parsed: &ParsedCommand,
    ) -> Result<(Vec<ParsedStep>, Vec<PromptDefinition>), ToolResponse> {
        let mut steps = Vec::with_capacity(parsed.steps.len());
        let mut prompts = Vec::with_capacity(parsed.steps.len());

        for step in &parsed.steps {
            let prompt = self.lookup(&step.prompt_id)?;
            let mut step = step.clone();
            step.prompt_id = prompt.id.clone();
            steps.push(step);
            prompts.push(prompt);
        }

        if steps.len() != 1 || prompts[0].chain_steps.is_empty() {
            return Ok((steps, prompts));
        }

        // A prompt that is itself a chain: its steps inherit the invocation
        // arguments, and the invocation's gates land on the final step.
        let invocation = steps.remove(0);
        let parent = prompts.remove(0);
        let count = parent.chain_steps.len();
        for (i, child) in parent.chain_steps.iter().enumerate() {
            let prompt = self.lookup(&child.prompt_id)?;
            let raw_args = [child.args.trim(), invocation.raw_args.trim()]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            let mut step = ParsedStep::new(prompt.id.clone(), raw_args);
            if i + 1 == count {
                step.inline_gates = invocation.inline_gates.clone();
                step.verify = invocation.verify.clone();
            }
            steps.push(step);
            prompts.push(prompt);
        }
        tracing::debug!(
            "[Planning] Expanded `{}` into {} chain step(s)",
            parent.id,
            steps.len()
        );
        Ok((steps, prompts))
    }

    fn plan_command(&self, ctx: &mut ExecutionContext, parsed: ParsedCommand) -> Result<(), EngineError> {
        let (steps, prompts) = match self.resolve_steps(&parsed) {
            Ok(resolved) => resolved,
            Err(rejection) => return ctx.set_response(rejection),
        };
        let category = prompts.first().and_then(|p| p.category.clone());

        let request = ctx.request();
        let has_step_gates = steps
            .iter()
            .any(|s| !s.inline_gates.is_empty() || s.verify.is_some())
            || prompts.iter().any(|p| !p.gates.is_empty());

        let kind = if steps.len() > 1 {
            ExecutionKind::Chain { steps }
        } else {
            let step = steps
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::precondition(self.name(), "no steps after parsing"))?;
            match prompts[0].execution {
                PromptExecution::Prompt => ExecutionKind::Prompt { step },
                PromptExecution::Template => ExecutionKind::Template { step },
            }
        };

        let requires_session = kind.is_chain()
            || has_step_gates
            || request.has_gate_overrides()
            || request.session_id().is_some()
            || request.gate_verdict().is_some()
            || request.gate_action.is_some();
        let chain_id = requires_session.then(|| compute_chain_id(&kind.steps().into_iter().cloned().collect::<Vec<_>>()));

        tracing::info!(
            "[Planning] {} with {} step(s){}",
            kind.label(),
            kind.total_steps(),
            chain_id
                .as_deref()
                .map(|id| format!(", chain {}", id))
                .unwrap_or_default()
        );

        ctx.plan = Some(ExecutionPlan {
            kind,
            chain_id,
            category,
            requires_session,
            from_session: false,
        });
        Ok(())
    }

    async fn plan_continuation(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let request = ctx.request();
        let (session, missing) = match (request.session_id(), request.chain_id()) {
            (Some(id), _) => (
                self.state.sessions.get(id).await,
                format!("No session found for session_id `{}`.", id),
            ),
            (None, Some(chain_id)) => (
                self.state.sessions.find_by_chain(chain_id).await,
                format!("No session found for chain_id `{}`.", chain_id),
            ),
            (None, None) => {
                return Err(EngineError::precondition(
                    self.name(),
                    "continuation without session_id or chain_id",
                ))
            }
        };

        let Some(session) = session else {
            tracing::info!("[Planning] {}", missing);
            return ctx.set_response(ToolResponse::rejected(format!(
                "{} Start again with a `command`.",
                missing
            )));
        };

        ctx.plan = Some(ExecutionPlan {
            kind: session.blueprint.kind.clone(),
            chain_id: Some(session.chain_id.clone()),
            category: session.blueprint.category.clone(),
            requires_session: true,
            from_session: true,
        });
        Ok(())
    }
}

#[async_trait]
impl PipelineStage for PlanningStage {
    fn name(&self) -> &'static str {
        "planning"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        match ctx.parsed.clone() {
            Some(parsed) => self.plan_command(ctx, parsed),
            None => self.plan_continuation(ctx).await,
        }
    }
}
