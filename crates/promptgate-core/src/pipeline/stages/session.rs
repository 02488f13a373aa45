use async_trait::async_trait;

use super::support::{attach_session, release_session_resources};
use crate::chain::{ChainSession, SessionBlueprint};
use crate::error::EngineError;
use crate::models::{ExecutionRequest, ResponseStatus, ToolResponse};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Binds the pass to a chain session.
///
/// Reads: `plan`, `parsed`, `request`.
/// Writes: `session.{session, is_new, resumed, scope_id, guard}`,
/// `response` (mismatch, missing session, already complete).
///
/// The per-chain lock taken here is held in the context until the pass
/// ends, so two requests for one chain never interleave.
pub struct SessionManagementStage {
    state: EngineState,
}

enum Binding {
    Created(ChainSession),
    Resumed(ChainSession),
    Respond(ToolResponse),
}

impl SessionManagementStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    /// Create a fresh session, releasing whatever the previous one held.
    async fn replace(
        &self,
        chain_id: &str,
        blueprint: SessionBlueprint,
    ) -> Result<ChainSession, EngineError> {
        if let Some(previous) = self.state.sessions.find_by_chain(chain_id).await {
            release_session_resources(&self.state, &previous).await?;
        }
        self.state.sessions.create(chain_id, blueprint).await
    }

    fn already_complete(session: &ChainSession) -> ToolResponse {
        let text = format!(
            "## Chain already complete\n\nSession `{}` finished all {} step(s). Issue the command again to start a new run.",
            session.session_id, session.total_steps
        );
        attach_session(ToolResponse::text(text, ResponseStatus::AlreadyComplete), session)
    }

    fn has_continuation_fields(request: &ExecutionRequest) -> bool {
        request.user_response().is_some()
            || request.gate_verdict().is_some()
            || request.gate_action.is_some()
    }

    async fn bind(
        &self,
        ctx: &ExecutionContext,
        chain_id: &str,
    ) -> Result<Binding, EngineError> {
        let plan = ctx.require_plan(self.name())?;
        let request = ctx.request();

        if let Some(requested) = request.chain_id() {
            if requested != chain_id {
                return Ok(Binding::Respond(ToolResponse::rejected(format!(
                    "Session/chain mismatch: chain_id `{}` does not match this command (`{}`).",
                    requested, chain_id
                ))));
            }
        }

        if let Some(session_id) = request.session_id() {
            let Some(existing) = self.state.sessions.get(session_id).await else {
                return Ok(Binding::Respond(ToolResponse::rejected(format!(
                    "No session found for session_id `{}`.",
                    session_id
                ))));
            };
            if existing.chain_id != chain_id {
                tracing::warn!(
                    "[SessionManagement] Session {} belongs to {}, request computed {}",
                    session_id,
                    existing.chain_id,
                    chain_id
                );
                return Ok(Binding::Respond(ToolResponse::rejected(format!(
                    "Session/chain mismatch: session `{}` belongs to chain `{}`, but this command is chain `{}`.",
                    session_id, existing.chain_id, chain_id
                ))));
            }
            if existing.is_complete() {
                return Ok(Binding::Respond(Self::already_complete(&existing)));
            }
            return Ok(Binding::Resumed(existing));
        }

        let existing = self.state.sessions.find_by_chain(chain_id).await;
        let blueprint = match (&existing, plan.from_session) {
            (Some(s), true) => s.blueprint.clone(),
            _ => SessionBlueprint {
                kind: plan.kind.clone(),
                framework: ctx.parsed.as_ref().and_then(|p| p.framework.clone()),
                gate_mode: ctx.parsed.as_ref().and_then(|p| p.gate_mode),
                category: plan.category.clone(),
            },
        };

        // A verdict or action needs a rendered step to answer.
        let answering = request.gate_action.is_some() || request.gate_verdict().is_some();
        let nothing_to_answer = || {
            Binding::Respond(ToolResponse::rejected(
                "There is no review to answer: no session is waiting on this chain. Send the command without `gate_verdict` / `gate_action` to start.",
            ))
        };
        let starts_fresh = request.force_restart
            || existing.as_ref().map(|s| s.is_complete()).unwrap_or(true);
        if answering && starts_fresh && !plan.from_session {
            return Ok(nothing_to_answer());
        }

        if request.force_restart {
            tracing::info!("[SessionManagement] force_restart for {}", chain_id);
            return Ok(Binding::Created(self.replace(chain_id, blueprint).await?));
        }

        match existing {
            None if plan.from_session => Ok(Binding::Respond(ToolResponse::rejected(format!(
                "No session found for chain_id `{}`.",
                chain_id
            )))),
            None => Ok(Binding::Created(
                self.state.sessions.create(chain_id, blueprint).await?,
            )),
            // Explicit continuation of a finished chain is informational.
            Some(s) if s.is_complete() && plan.from_session => {
                Ok(Binding::Respond(Self::already_complete(&s)))
            }
            Some(s) if s.is_complete() => {
                tracing::info!(
                    "[SessionManagement] Session {} is complete, starting over",
                    s.session_id
                );
                Ok(Binding::Created(self.replace(chain_id, blueprint).await?))
            }
            // Re-issuing a single prompt without an answer renders it afresh.
            Some(s) if !plan.kind.is_chain() && !Self::has_continuation_fields(request) => {
                tracing::debug!(
                    "[SessionManagement] Re-issued single prompt, replacing {}",
                    s.session_id
                );
                Ok(Binding::Created(self.replace(chain_id, blueprint).await?))
            }
            Some(s) => Ok(Binding::Resumed(s)),
        }
    }
}

#[async_trait]
impl PipelineStage for SessionManagementStage {
    fn name(&self) -> &'static str {
        "session_management"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let plan = ctx.require_plan(self.name())?;
        if !plan.requires_session {
            return Ok(());
        }
        let chain_id = plan
            .chain_id
            .clone()
            .ok_or_else(|| EngineError::precondition(self.name(), "session plan without chain id"))?;

        let guard = self.state.sessions.lock_chain(&chain_id).await;

        let (session, is_new) = match self.bind(ctx, &chain_id).await? {
            Binding::Created(s) => (s, true),
            Binding::Resumed(s) => (s, false),
            Binding::Respond(response) => return ctx.set_response(response),
        };

        tracing::info!(
            "[SessionManagement] {} session {} at step {}/{}",
            if is_new { "Created" } else { "Resumed" },
            session.session_id,
            session.current_step,
            session.total_steps
        );

        ctx.session.scope_id = Some(session.session_id.clone());
        ctx.session.is_new = is_new;
        ctx.session.resumed = !is_new;
        ctx.session.guard = Some(guard);
        ctx.session.session = Some(session);
        Ok(())
    }
}
