use async_trait::async_trait;

use crate::chain::{PendingReview, ReviewKind};
use crate::error::EngineError;
use crate::models::GateType;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Records what was rendered so the next call can resume.
///
/// Reads: `execution`, `gates.{gate_ids, review_pending}`, `plan`.
/// Writes: `session.session` (placeholder, pending review),
/// `execution.placeholder_recorded`.
///
/// A step with `verify` opens a shell review and writes the verification
/// marker. Otherwise validation gates with criteria open a gate review.
pub struct ResponseCaptureStage {
    state: EngineState,
}

impl ResponseCaptureStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    fn open_review(&self, ctx: &ExecutionContext, number: u32) -> Option<PendingReview> {
        let step = ctx.plan.as_ref()?.kind.step(number)?;

        if let Some(verify) = &step.verify {
            let mut review = PendingReview::shell(
                number,
                verify.command.clone(),
                verify
                    .timeout_ms
                    .unwrap_or(self.state.config.verification.default_timeout_ms),
                verify.working_dir.clone(),
                0,
            );
            review.max_attempts = self
                .state
                .enforcer
                .ceiling_for(&review.kind, verify.max_attempts);
            return Some(review);
        }

        let validating: Vec<String> = ctx
            .gates
            .gate_ids
            .iter()
            .filter(|id| {
                self.state
                    .gate_registry
                    .get(id)
                    .map(|g| g.gate_type == GateType::Validation && !g.pass_criteria.is_empty())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if validating.is_empty() {
            return None;
        }
        let max = self.state.enforcer.ceiling_for(&ReviewKind::Gate, None);
        Some(PendingReview::gate(number, validating, max))
    }
}

#[async_trait]
impl PipelineStage for ResponseCaptureStage {
    fn name(&self) -> &'static str {
        "response_capture"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        if ctx.session.session.is_none() || ctx.execution.rendered.is_none() {
            return Ok(());
        }
        let number = ctx.execution.step_number;
        let review = if ctx.gates.review_pending {
            self.open_review(ctx, number)
        } else {
            None
        };

        let session = ctx.require_session_mut(self.name())?;
        session.record_placeholder(number);
        let already_open = session
            .pending_review
            .as_ref()
            .map(|r| r.step_number == number)
            .unwrap_or(false);
        if !already_open {
            session.pending_review = review;
        }
        let session = session.clone();

        if let Some(review) = session.pending_review.as_ref().filter(|r| r.is_shell()) {
            if !already_open {
                self.state.verifier.begin(review, &session.session_id).await?;
            }
        }
        self.state.sessions.save(&session).await?;

        tracing::debug!(
            "[ResponseCapture] Session {} step {}/{} rendered{}",
            session.session_id,
            number,
            session.total_steps,
            session
                .pending_review
                .as_ref()
                .map(|r| format!(", awaiting {}", r.gate_ids.join(", ")))
                .unwrap_or_default()
        );
        ctx.execution.placeholder_recorded = true;
        Ok(())
    }
}
