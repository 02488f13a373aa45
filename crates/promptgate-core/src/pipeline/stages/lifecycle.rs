use async_trait::async_trait;
use chrono::Utc;

use crate::error::EngineError;
use crate::models::ToolResponse;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// First stage of every pass.
///
/// Reads: `request`.
/// Writes: `lifecycle.cleanup`, `response` (rejections only).
///
/// Rejects requests that can never succeed before anything is mutated and
/// registers the cleanup handler that drops execution-scoped temporary gates.
pub struct LifecycleStage {
    state: EngineState,
}

impl LifecycleStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PipelineStage for LifecycleStage {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let request = ctx.request();

        if !request.has_command() && request.session_id().is_none() && request.chain_id().is_none() {
            return ctx.set_response(ToolResponse::rejected(
                "Provide a `command` to start, or a `session_id` / `chain_id` to continue.",
            ));
        }

        if request.force_restart && request.session_id().is_some() {
            tracing::warn!(
                "[Lifecycle] Rejected force_restart with session_id {:?}",
                request.session_id()
            );
            return ctx.set_response(ToolResponse::rejected(
                "`force_restart` cannot be combined with `session_id`: restarting discards the session you asked to continue. Drop one of them.",
            ));
        }

        let now = Utc::now();
        let expired_gates = self.state.gate_registry.purge_expired(now);
        let expired_overrides = self.state.overrides.prune_expired(now);
        if expired_gates + expired_overrides > 0 {
            tracing::debug!(
                "[Lifecycle] Purged {} expired gate(s), {} expired override(s)",
                expired_gates,
                expired_overrides
            );
        }

        let registry = self.state.gate_registry.clone();
        let scope_id = ctx.execution_id.clone();
        ctx.lifecycle
            .cleanup
            .push("execution-scoped gates", move || {
                registry.cleanup_scope(&scope_id);
            });
        Ok(())
    }
}
