use async_trait::async_trait;

use super::support::render_step;
use crate::error::EngineError;
use crate::models::PromptExecution;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Reads: `plan`, `parsed`, `session.blueprint`.
/// Writes: `framework.{framework_id, system_prompt, style_guidance}`.
///
/// Template steps pick up the requested framework, then the one the chain
/// started with, then the active one. Plain prompts only get a framework
/// when the command names it with `@`.
pub struct FrameworkResolutionStage {
    state: EngineState,
}

impl FrameworkResolutionStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PipelineStage for FrameworkResolutionStage {
    fn name(&self) -> &'static str {
        "framework_resolution"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let Some((_, _, prompt)) = render_step(ctx, &self.state.prompts) else {
            return Ok(());
        };

        let requested = ctx.parsed.as_ref().and_then(|p| p.framework.clone());
        let from_session = ctx
            .session
            .session
            .as_ref()
            .and_then(|s| s.blueprint.framework.clone());

        let selected = match prompt.execution {
            PromptExecution::Template => requested
                .or(from_session)
                .or_else(|| self.state.frameworks.active_framework()),
            PromptExecution::Prompt => requested.or(from_session),
        };
        let Some(framework_id) = selected else {
            return Ok(());
        };
        if !self.state.frameworks.has_framework(&framework_id) {
            // Validated for commands; a stored blueprint may predate a config change.
            tracing::warn!(
                "[FrameworkResolution] Framework {} is no longer configured, skipping",
                framework_id
            );
            return Ok(());
        }

        tracing::debug!(
            "[FrameworkResolution] Using {} for `{}`",
            framework_id,
            prompt.id
        );
        ctx.framework.system_prompt = self.state.frameworks.system_prompt(&framework_id);
        ctx.framework.style_guidance = self.state.frameworks.style_guidance(&framework_id);
        ctx.framework.framework_id = Some(framework_id);
        Ok(())
    }
}
