use async_trait::async_trait;

use super::support::{
    attach_session, is_verdict_text, release_session_resources, step_scope_id,
};
use crate::chain::{ChainSession, PendingReview, ReviewKind};
use crate::error::EngineError;
use crate::gates::enforcement::{bounce_back_text, escalation_payload, escalation_text};
use crate::gates::verification::failure_feedback;
use crate::gates::verdict::VERDICT_FORMAT_HINT;
use crate::gates::{evaluate_gate, parse_verdict, ActionOutcome, FailureDecision};
use crate::models::{
    GateAction, GateMode, GateResult, GateValidationPayload, ResponseStatus, ToolResponse,
};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

const SHELL_GATE_ID: &str = "shell-verify";

/// Handles the answer to the previously rendered step.
///
/// Reads: `request` (`user_response`, `gate_verdict`, `gate_action`),
/// `session`, `gates.mode`.
/// Writes: `session.{session, captured, advanced}`,
/// `gates.{results, advisories}`, `response` (bounce-back, escalation,
/// review reminder, abort, completion).
///
/// Outstanding reviews are resolved first. A passing (or skipped) review,
/// or a plain answer when nothing is under review, is captured into the
/// current step and the session advances by exactly one step.
pub struct GateReviewStage {
    state: EngineState,
}

impl GateReviewStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    async fn review(&self, ctx: &mut ExecutionContext, session: &mut ChainSession) -> Result<(), EngineError> {
        if let Some(action) = ctx.request().gate_action {
            return self.apply_action(ctx, session, action).await;
        }
        match session.pending_review.clone() {
            Some(review) if review.escalated => {
                tracing::info!(
                    "[GateReview] {} is escalated, waiting for gate_action",
                    review.primary_gate()
                );
                let response = ToolResponse::text(escalation_text(&review), ResponseStatus::Escalation)
                    .with_payload(|p| p.escalation = Some(escalation_payload(&review)));
                ctx.set_response(attach_session(response, session))
            }
            Some(review) if review.is_shell() => self.review_shell(ctx, session, review).await,
            Some(review) => self.review_gates(ctx, session, review).await,
            None => {
                let step = session.current_step;
                self.capture_answer(ctx, session, step);
                if session.step_result(step).is_none() {
                    // Never rendered (e.g. restored mid-pass); render it now.
                    return Ok(());
                }
                self.advance(ctx, session).await
            }
        }
    }

    fn capture_answer(&self, ctx: &mut ExecutionContext, session: &mut ChainSession, step: u32) {
        let Some(answer) = ctx.request().user_response().map(str::to_string) else {
            return;
        };
        if is_verdict_text(&answer) && session.is_awaiting_review() {
            return;
        }
        session.capture(step, &answer);
        ctx.session.captured = true;
        tracing::debug!(
            "[GateReview] Captured {} chars for step {} of {}",
            answer.len(),
            step,
            session.session_id
        );
    }

    async fn advance(&self, ctx: &mut ExecutionContext, session: &mut ChainSession) -> Result<(), EngineError> {
        let from = session.current_step;
        session.advance()?;
        ctx.session.advanced = true;
        self.state
            .gate_registry
            .cleanup_scope(&step_scope_id(&session.session_id, from));

        if !session.is_complete() {
            tracing::info!(
                "[GateReview] Session {} advanced to step {}/{}",
                session.session_id,
                session.current_step,
                session.total_steps
            );
            return Ok(());
        }

        self.state.sessions.save(session).await?;
        release_session_resources(&self.state, session).await?;
        tracing::info!(
            "[GateReview] Session {} complete ({} steps)",
            session.session_id,
            session.total_steps
        );
        let response = self.completion_response(ctx, session);
        ctx.set_response(response)
    }

    fn completion_response(&self, ctx: &ExecutionContext, session: &ChainSession) -> ToolResponse {
        let label = if session.blueprint.kind.is_chain() { "Chain" } else { "Prompt" };
        let mut text = format!(
            "## {} complete\n\nAll {} step(s) of `{}` are done.\n\n### Steps",
            label,
            session.total_steps,
            session.blueprint.chain_name()
        );
        for (i, step) in session.blueprint.steps().iter().enumerate() {
            let number = i as u32 + 1;
            let state = match session.step_result(number) {
                Some(r) if !r.is_placeholder => "output captured",
                _ => "no output captured",
            };
            text.push_str(&format!("\n{}. `{}`: {}", number, step.prompt_id, state));
        }
        if !ctx.gates.advisories.is_empty() {
            text.push_str("\n\n### Gate advisories\n");
            for note in &ctx.gates.advisories {
                text.push_str(&format!("\n- {}", note));
            }
        }

        let results = ctx.gates.results.clone();
        let response = ToolResponse::text(text, ResponseStatus::ChainComplete).with_payload(|p| {
            if !results.is_empty() {
                p.gate_validation = Some(GateValidationPayload::from_results(results, false));
            }
        });
        attach_session(response, session)
    }

    // ─── gate_action ───────────────────────────────────────────────────────

    async fn apply_action(
        &self,
        ctx: &mut ExecutionContext,
        session: &mut ChainSession,
        action: GateAction,
    ) -> Result<(), EngineError> {
        let Some(review) = session.pending_review.clone() else {
            return ctx.set_response(ToolResponse::rejected(format!(
                "gate_action `{}` given, but session `{}` has nothing awaiting review.",
                action.as_str(),
                session.session_id
            )));
        };

        match self.state.enforcer.apply_action(session, action)? {
            ActionOutcome::Retry => {
                if let Some(reset) = session.pending_review.as_ref() {
                    self.state.verifier.begin(reset, &session.session_id).await?;
                }
                self.state.sessions.save(session).await?;
                let text = match &review.kind {
                    ReviewKind::Gate => format!(
                        "## Retrying\n\nAttempts for {} were reset (0/{}). Revise your step {} output and send it with a new verdict.",
                        review.gate_ids.join(", "),
                        review.max_attempts,
                        review.step_number
                    ),
                    ReviewKind::ShellVerify { command, .. } => format!(
                        "## Retrying\n\nAttempts for `{}` were reset (0/{}). Fix the problem, then call again to re-run the verification.",
                        command, review.max_attempts
                    ),
                };
                ctx.set_response(attach_session(
                    ToolResponse::text(text, ResponseStatus::ReviewPending),
                    session,
                ))
            }
            ActionOutcome::Skip => {
                if review.is_shell() {
                    self.state.verifier.finish(&session.session_id).await?;
                }
                ctx.gates.advisories.push(format!(
                    "{} skipped on step {} after {} failed attempt(s)",
                    review.gate_ids.join(", "),
                    review.step_number,
                    review.attempts
                ));
                self.capture_answer(ctx, session, review.step_number);
                self.advance(ctx, session).await
            }
            ActionOutcome::Abort => {
                release_session_resources(&self.state, session).await?;
                self.state.sessions.clear(&session.session_id).await?;
                tracing::info!(
                    "[GateReview] Session {} aborted at step {}/{}",
                    session.session_id,
                    session.current_step,
                    session.total_steps
                );
                let text = format!(
                    "## Chain aborted\n\nSession `{}` was discarded at step {}/{}. Issue the command again to start over.",
                    session.session_id, session.current_step, session.total_steps
                );
                ctx.set_response(ToolResponse::text(text, ResponseStatus::Aborted))
            }
        }
    }

    // ─── Shell verification ────────────────────────────────────────────────

    async fn review_shell(
        &self,
        ctx: &mut ExecutionContext,
        session: &mut ChainSession,
        review: PendingReview,
    ) -> Result<(), EngineError> {
        self.capture_answer(ctx, session, review.step_number);
        let output = self.state.verifier.run(&review).await?;
        let command = match &review.kind {
            ReviewKind::ShellVerify { command, .. } => command.clone(),
            ReviewKind::Gate => String::new(),
        };

        if output.passed {
            tracing::info!(
                "[GateReview] Verification `{}` passed for {}",
                command,
                session.session_id
            );
            self.state.verifier.finish(&session.session_id).await?;
            session.pending_review = None;
            ctx.gates.results.push(GateResult {
                gate_id: SHELL_GATE_ID.to_string(),
                passed: true,
                failed_criteria: Vec::new(),
                hint: None,
            });
            return self.advance(ctx, session).await;
        }

        let feedback = failure_feedback(&command, &output);
        let decision = self.state.enforcer.record_failure(session, feedback.clone())?;
        let review = session
            .pending_review
            .clone()
            .ok_or_else(|| EngineError::precondition(self.name(), "review vanished after failure"))?;
        self.state
            .verifier
            .update(&review, &session.session_id, &output)
            .await?;
        self.state.sessions.save(session).await?;

        let result = GateResult {
            gate_id: SHELL_GATE_ID.to_string(),
            passed: false,
            failed_criteria: vec![command],
            hint: Some(if output.timed_out {
                "Verification timed out".to_string()
            } else {
                format!(
                    "Exit code {}",
                    output
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string())
                )
            }),
        };
        ctx.gates.results = vec![result.clone()];
        let response = self.failure_response(decision, &review, &feedback, vec![result]);
        ctx.set_response(attach_session(response, session))
    }

    fn failure_response(
        &self,
        decision: FailureDecision,
        review: &PendingReview,
        feedback: &str,
        results: Vec<GateResult>,
    ) -> ToolResponse {
        let validation = GateValidationPayload::from_results(results, true);
        match decision {
            FailureDecision::BounceBack => {
                ToolResponse::text(bounce_back_text(review, feedback), ResponseStatus::BounceBack)
                    .with_payload(|p| p.gate_validation = Some(validation))
            }
            FailureDecision::Escalate => {
                ToolResponse::text(escalation_text(review), ResponseStatus::Escalation).with_payload(|p| {
                    p.gate_validation = Some(validation);
                    p.escalation = Some(escalation_payload(review));
                })
            }
        }
    }

    // ─── Gate verdicts ─────────────────────────────────────────────────────

    async fn review_gates(
        &self,
        ctx: &mut ExecutionContext,
        session: &mut ChainSession,
        review: PendingReview,
    ) -> Result<(), EngineError> {
        let step = review.step_number;
        self.capture_answer(ctx, session, step);

        let request = ctx.request();
        let verdict_text = request.gate_verdict().map(str::to_string).or_else(|| {
            request
                .user_response()
                .filter(|t| is_verdict_text(t))
                .map(str::to_string)
        });
        let output = session
            .step_result(step)
            .filter(|r| !r.is_placeholder)
            .map(|r| r.content.clone());

        if output.is_none() && verdict_text.is_none() {
            self.state.sessions.save(session).await?;
            let text = format!(
                "## Review pending\n\nStep {} is waiting for review by {}. Send your step output as `user_response`.",
                step,
                review.gate_ids.join(", ")
            );
            return ctx.set_response(attach_session(
                ToolResponse::text(text, ResponseStatus::ReviewPending),
                session,
            ));
        }

        let mut evaluations = Vec::new();
        for gate_id in &review.gate_ids {
            match self.state.gate_registry.get(gate_id) {
                Some(gate) => evaluations.push(evaluate_gate(&gate, output.as_deref().unwrap_or(""))),
                None => tracing::warn!(
                    "[GateReview] Gate {} is no longer registered, skipping",
                    gate_id
                ),
            }
        }

        // Mechanical checks only count when there is output to check.
        let mechanical_failed = output.is_some() && evaluations.iter().any(|e| e.mechanically_failed());
        let manual: Vec<String> = evaluations
            .iter()
            .flat_map(|e| e.manual_criteria.iter().cloned())
            .collect();

        let (results, feedback) = if mechanical_failed {
            let results: Vec<GateResult> = evaluations.iter().map(|e| e.to_result()).collect();
            let hints: Vec<String> = evaluations
                .iter()
                .filter(|e| e.mechanically_failed())
                .map(|e| format!("{}: {}", e.gate_id, e.hints.join("; ")))
                .collect();
            (results, Some(format!("Failed checks:\n- {}", hints.join("\n- "))))
        } else if !manual.is_empty() || output.is_none() {
            let Some(text) = verdict_text else {
                self.state.sessions.save(session).await?;
                let criteria = if manual.is_empty() {
                    String::new()
                } else {
                    format!("\n\nCriteria:\n- {}", manual.join("\n- "))
                };
                let text = format!(
                    "## Verdict required\n\nOutput for step {} was captured. Evaluate it and reply with `gate_verdict`.{}\n\n{}",
                    step, criteria, VERDICT_FORMAT_HINT
                );
                return ctx.set_response(attach_session(
                    ToolResponse::text(text, ResponseStatus::ReviewPending),
                    session,
                ));
            };
            match parse_verdict(&text) {
                None => {
                    // Malformed verdicts do not consume an attempt.
                    self.state.sessions.save(session).await?;
                    let body = format!(
                        "## Verdict not understood\n\nCould not read `{}`.\n\n{}",
                        text.trim(),
                        VERDICT_FORMAT_HINT
                    );
                    return ctx.set_response(attach_session(
                        ToolResponse::text(body, ResponseStatus::BounceBack),
                        session,
                    ));
                }
                Some(verdict) => {
                    tracing::info!(
                        "[GateReview] Verdict {:?} for step {} (confidence {:.2})",
                        verdict.outcome,
                        step,
                        verdict.confidence
                    );
                    if verdict.passed() {
                        (evaluations.iter().map(|e| e.to_result()).collect(), None)
                    } else {
                        let reason = if verdict.reason.is_empty() {
                            "Verdict: FAIL".to_string()
                        } else {
                            verdict.reason.clone()
                        };
                        let results = evaluations
                            .iter()
                            .map(|e| GateResult {
                                gate_id: e.gate_id.clone(),
                                passed: false,
                                failed_criteria: e.manual_criteria.clone(),
                                hint: Some(reason.clone()),
                            })
                            .collect();
                        (results, Some(reason))
                    }
                }
            }
        } else {
            (evaluations.iter().map(|e| e.to_result()).collect(), None)
        };

        ctx.gates.results = results.clone();

        let Some(feedback) = feedback else {
            tracing::info!(
                "[GateReview] {} passed on step {}",
                review.gate_ids.join(", "),
                step
            );
            session.pending_review = None;
            return self.advance(ctx, session).await;
        };

        match ctx.gates.mode {
            GateMode::Enforce => {
                let decision = self.state.enforcer.record_failure(session, feedback.clone())?;
                let review = session
                    .pending_review
                    .clone()
                    .ok_or_else(|| EngineError::precondition(self.name(), "review vanished after failure"))?;
                self.state.sessions.save(session).await?;
                let response = self.failure_response(decision, &review, &feedback, results);
                ctx.set_response(attach_session(response, session))
            }
            GateMode::Advise => {
                ctx.gates.advisories.push(format!(
                    "{} did not pass on step {}: {}",
                    review.gate_ids.join(", "),
                    step,
                    feedback.replace('\n', " ")
                ));
                session.pending_review = None;
                self.advance(ctx, session).await
            }
            GateMode::Report => {
                session.pending_review = None;
                self.advance(ctx, session).await
            }
        }
    }
}

#[async_trait]
impl PipelineStage for GateReviewStage {
    fn name(&self) -> &'static str {
        "gate_review"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        if ctx.session.session.is_none() {
            return Ok(());
        }
        if ctx.session.is_new {
            return Ok(());
        }

        let mut session = ctx.require_session(self.name())?.clone();
        let outcome = self.review(ctx, &mut session).await;
        ctx.session.session = Some(session);
        outcome
    }
}
