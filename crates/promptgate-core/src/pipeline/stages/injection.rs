use async_trait::async_trait;

use crate::error::EngineError;
use crate::injection::{InjectionScope, InjectionType};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Reads: `plan`, `session`. Writes: `injection`.
///
/// Resolves every injection type for the step about to render and reduces
/// each decision to a yes/no for this step.
pub struct InjectionControlStage {
    state: EngineState,
}

impl InjectionControlStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    fn scope(ctx: &ExecutionContext) -> Result<InjectionScope, EngineError> {
        let plan = ctx.require_plan("injection_control")?;
        let session = ctx.session.session.as_ref();
        Ok(InjectionScope {
            session_id: session.map(|s| s.session_id.clone()),
            chain_id: plan.chain_id.clone(),
            chain_name: plan.kind.is_chain().then(|| {
                plan.kind
                    .steps()
                    .iter()
                    .map(|s| s.prompt_id.as_str())
                    .collect::<Vec<_>>()
                    .join("-->")
            }),
            category: plan.category.clone(),
            step_number: ctx.current_step(),
            total_steps: plan.kind.total_steps(),
        })
    }
}

#[async_trait]
impl PipelineStage for InjectionControlStage {
    fn name(&self) -> &'static str {
        "injection_control"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let scope = Self::scope(ctx)?;
        let is_chain = ctx.require_plan(self.name())?.kind.is_chain();
        let decisions = self.state.injection.resolve_all(&scope);

        for decision in &decisions {
            let fires = decision.should_inject(is_chain, scope.step_number);
            match decision.injection_type {
                InjectionType::SystemPrompt => ctx.injection.system_prompt = fires,
                InjectionType::GateGuidance => ctx.injection.gate_guidance = fires,
                InjectionType::StyleGuidance => ctx.injection.style_guidance = fires,
            }
            tracing::debug!(
                "[InjectionControl] {} step {}/{}: {} (decided by {})",
                decision.injection_type,
                scope.step_number,
                scope.total_steps,
                if fires { "inject" } else { "skip" },
                decision.source.as_str()
            );
        }
        ctx.injection.decisions = decisions;
        Ok(())
    }
}
