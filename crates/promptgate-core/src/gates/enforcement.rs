//! Bounded retry and escalation.
//!
//! Each failed attempt on an outstanding review increments its counter.
//! Strictly below the ceiling the caller gets a bounce-back; at or above it
//! the review is escalated and only a `gate_action` (retry, skip, abort) is
//! accepted until the caller chooses.

use serde::{Deserialize, Serialize};

use crate::chain::{ChainSession, PendingReview, ReviewKind};
use crate::config::RetryPolicy;
use crate::error::EngineError;
use crate::models::{EscalationPayload, GateAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDecision {
    BounceBack,
    Escalate,
}

/// Pure ceiling check on the attempt count after a failure.
pub fn decide(attempts: u32, max_attempts: u32) -> FailureDecision {
    if attempts < max_attempts {
        FailureDecision::BounceBack
    } else {
        FailureDecision::Escalate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Counter reset, the review stays outstanding.
    Retry,
    /// Review dropped; the step may advance.
    Skip,
    /// The whole session should be discarded.
    Abort,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GateEnforcer {
    policy: RetryPolicy,
}

impl GateEnforcer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Ceiling for a review kind, honoring a per-step override for shell
    /// verification (`:: verify:"..." max:N`).
    pub fn ceiling_for(&self, kind: &ReviewKind, requested: Option<u32>) -> u32 {
        match kind {
            ReviewKind::Gate => self.policy.gate_review_max_attempts.max(1),
            ReviewKind::ShellVerify { .. } => requested
                .unwrap_or(self.policy.shell_verify_max_attempts)
                .max(1),
        }
    }

    /// Count a failed attempt on the session's outstanding review.
    pub fn record_failure(
        &self,
        session: &mut ChainSession,
        feedback: String,
    ) -> Result<FailureDecision, EngineError> {
        let key = session
            .pending_review
            .as_ref()
            .map(|r| r.primary_gate().to_string())
            .ok_or_else(|| EngineError::precondition("gate_review", "no outstanding review"))?;
        session.bump_retry(&key);

        let review = session
            .pending_review
            .as_mut()
            .ok_or_else(|| EngineError::precondition("gate_review", "no outstanding review"))?;
        review.attempts += 1;
        review.last_feedback = Some(feedback);

        let decision = decide(review.attempts, review.max_attempts);
        if decision == FailureDecision::Escalate {
            review.escalated = true;
            tracing::warn!(
                "[GateEnforcer] {} escalated after {}/{} attempts (session {})",
                review.primary_gate(),
                review.attempts,
                review.max_attempts,
                session.session_id
            );
        } else {
            tracing::info!(
                "[GateEnforcer] {} failed attempt {}/{} (session {})",
                review.primary_gate(),
                review.attempts,
                review.max_attempts,
                session.session_id
            );
        }
        Ok(decision)
    }

    /// Apply the caller's choice after an escalation.
    pub fn apply_action(
        &self,
        session: &mut ChainSession,
        action: GateAction,
    ) -> Result<ActionOutcome, EngineError> {
        let review = session.pending_review.as_mut().ok_or_else(|| {
            EngineError::InvalidRequest("gate_action given but nothing is awaiting review".to_string())
        })?;

        tracing::info!(
            "[GateEnforcer] Action '{}' on {} (session {})",
            action.as_str(),
            review.primary_gate(),
            session.session_id
        );

        match action {
            GateAction::Retry => {
                review.attempts = 0;
                review.escalated = false;
                review.last_feedback = None;
                Ok(ActionOutcome::Retry)
            }
            GateAction::Skip => {
                session.pending_review = None;
                Ok(ActionOutcome::Skip)
            }
            GateAction::Abort => Ok(ActionOutcome::Abort),
        }
    }
}

pub fn escalation_payload(review: &PendingReview) -> EscalationPayload {
    EscalationPayload {
        gate_id: review.primary_gate().to_string(),
        attempts: review.attempts,
        max_attempts: review.max_attempts,
        options: GateAction::all().iter().map(|a| a.as_str().to_string()).collect(),
    }
}

pub fn bounce_back_text(review: &PendingReview, feedback: &str) -> String {
    let what = match &review.kind {
        ReviewKind::Gate => format!("Gate review failed for {}", review.gate_ids.join(", ")),
        ReviewKind::ShellVerify { command, .. } => format!("Verification `{}` failed", command),
    };
    format!(
        "## Retry required\n\n{} (attempt {}/{}).\n\n{}\n\nRevise your previous answer to address the feedback above, then continue with the same session.",
        what,
        review.attempts,
        review.max_attempts,
        feedback.trim()
    )
}

pub fn escalation_text(review: &PendingReview) -> String {
    let what = match &review.kind {
        ReviewKind::Gate => format!("Gate {}", review.gate_ids.join(", ")),
        ReviewKind::ShellVerify { command, .. } => format!("Verification `{}`", command),
    };
    let feedback = review
        .last_feedback
        .as_deref()
        .map(|f| format!("\n\nLast failure:\n{}", f.trim()))
        .unwrap_or_default();
    format!(
        "## Escalation\n\n{} failed {} of {} allowed attempts.{}\n\nChoose how to proceed by calling again with `gate_action`:\n- `retry`: reset the attempt counter and try again\n- `skip`: accept the current output and move on\n- `abort`: stop this chain and discard its session",
        what, review.attempts, review.max_attempts, feedback
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SessionBlueprint;
    use crate::models::{ExecutionKind, ParsedStep};

    fn session_with_review(max: u32) -> ChainSession {
        let mut session = ChainSession::new(
            "s".to_string(),
            "c".to_string(),
            SessionBlueprint {
                kind: ExecutionKind::Prompt {
                    step: ParsedStep::new("p", ""),
                },
                framework: None,
                gate_mode: None,
                category: None,
            },
        );
        session.pending_review = Some(PendingReview::gate(1, vec!["quality".to_string()], max));
        session
    }

    #[test]
    fn test_decide_ceiling() {
        for attempts in 0..3 {
            assert_eq!(decide(attempts, 3), FailureDecision::BounceBack);
        }
        assert_eq!(decide(3, 3), FailureDecision::Escalate);
        assert_eq!(decide(7, 3), FailureDecision::Escalate);
    }

    #[test]
    fn test_record_failure_until_escalation() {
        let enforcer = GateEnforcer::default();
        let mut session = session_with_review(3);
        assert_eq!(
            enforcer.record_failure(&mut session, "a".into()).unwrap(),
            FailureDecision::BounceBack
        );
        assert_eq!(
            enforcer.record_failure(&mut session, "b".into()).unwrap(),
            FailureDecision::BounceBack
        );
        assert_eq!(
            enforcer.record_failure(&mut session, "c".into()).unwrap(),
            FailureDecision::Escalate
        );
        let review = session.pending_review.as_ref().unwrap();
        assert!(review.escalated);
        assert_eq!(session.retry_counts.get("quality"), Some(&3));
        assert!(escalation_text(review).contains("`retry`"));
        assert_eq!(escalation_payload(review).options, vec!["retry", "skip", "abort"]);
    }

    #[test]
    fn test_actions() {
        let enforcer = GateEnforcer::default();
        let mut session = session_with_review(1);
        enforcer.record_failure(&mut session, "x".into()).unwrap();

        assert_eq!(
            enforcer.apply_action(&mut session, GateAction::Retry).unwrap(),
            ActionOutcome::Retry
        );
        let review = session.pending_review.as_ref().unwrap();
        assert_eq!(review.attempts, 0);
        assert!(!review.escalated);

        assert_eq!(
            enforcer.apply_action(&mut session, GateAction::Skip).unwrap(),
            ActionOutcome::Skip
        );
        assert!(session.pending_review.is_none());
        assert!(enforcer.apply_action(&mut session, GateAction::Abort).is_err());
    }

    #[test]
    fn test_ceilings_are_separate() {
        let enforcer = GateEnforcer::new(RetryPolicy::default());
        assert_eq!(enforcer.ceiling_for(&ReviewKind::Gate, Some(9)), 3);
        let shell = ReviewKind::ShellVerify {
            command: "true".into(),
            timeout_ms: 1000,
            working_dir: None,
        };
        assert_eq!(enforcer.ceiling_for(&shell, None), 5);
        assert_eq!(enforcer.ceiling_for(&shell, Some(2)), 2);
    }
}
