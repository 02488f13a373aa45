//! Helpers shared by the stages that end a pass early and by formatting.

use crate::chain::{ChainSession, ReviewKind};
use crate::error::EngineError;
use crate::fuzzy;
use crate::models::{ParsedStep, SessionFooter, TextContent, ToolResponse};
use crate::pipeline::context::ExecutionContext;
use crate::prompts::{PromptDefinition, PromptLibrary};
use crate::state::EngineStateInner;

pub(crate) const VERDICT_PREFIX: &str = "GATE_REVIEW";

/// Scope id for step-bound temporary gates of a session.
pub(crate) fn step_scope_id(session_id: &str, step_number: u32) -> String {
    format!("{}:{}", session_id, step_number)
}

/// Step that renders next for a session that survives this pass.
pub(crate) fn next_render_step(session: &ChainSession, is_new: bool) -> u32 {
    if is_new || session.step_result(session.current_step).is_none() {
        session.current_step
    } else {
        session.current_step + 1
    }
}

/// The parsed step this pass renders, with its prompt definition.
pub(crate) fn render_step(
    ctx: &ExecutionContext,
    library: &PromptLibrary,
) -> Option<(u32, ParsedStep, PromptDefinition)> {
    let number = ctx.current_step();
    let step = ctx.plan.as_ref()?.kind.step(number)?.clone();
    let prompt = library.get(&step.prompt_id)?;
    Some((number, step, prompt))
}

/// A `user_response` that is really a verdict (`GATE_REVIEW: ...`).
pub(crate) fn is_verdict_text(text: &str) -> bool {
    text.trim_start().to_uppercase().starts_with(VERDICT_PREFIX)
}

pub(crate) fn next_action(session: &ChainSession) -> String {
    let id = &session.session_id;
    if session.is_complete() {
        return "Chain complete. Issue the command again to start a new run.".to_string();
    }
    match &session.pending_review {
        Some(review) if review.escalated => format!(
            "Call again with session_id \"{}\" and gate_action: retry | skip | abort",
            id
        ),
        Some(review) if review.is_shell() => format!(
            "Finish step {}, then call again with session_id \"{}\" to run the verification",
            review.step_number, id
        ),
        Some(review) => format!(
            "Call again with session_id \"{}\", user_response containing your step {} output, and gate_verdict \"{}: PASS|FAIL - <reason>\"",
            id, review.step_number, VERDICT_PREFIX
        ),
        None if session.current_step >= session.total_steps => format!(
            "Call again with session_id \"{}\" and user_response containing your output to finish",
            id
        ),
        None => format!(
            "Call again with session_id \"{}\" and user_response containing your step {} output to continue",
            id, session.current_step
        ),
    }
}

pub(crate) fn session_footer(session: &ChainSession) -> SessionFooter {
    SessionFooter {
        session_id: session.session_id.clone(),
        chain_id: session.chain_id.clone(),
        current_step: session.current_step.min(session.total_steps),
        total_steps: session.total_steps,
        next_action: next_action(session),
    }
}

/// Reminder lines appended after the body of every session response.
pub(crate) fn footer_text(session: &ChainSession) -> String {
    let mut lines = vec!["---".to_string()];
    if session.is_complete() {
        lines.push(format!(
            "[Chain] {} - Complete ({}/{})",
            session.chain_id, session.total_steps, session.total_steps
        ));
    } else {
        lines.push(format!(
            "[Chain] {} - Step {}/{}",
            session.chain_id, session.current_step, session.total_steps
        ));
    }
    if let Some(review) = &session.pending_review {
        match &review.kind {
            ReviewKind::Gate => lines.push(format!(
                "[Gate] {} - Respond: {}: PASS|FAIL - <reason>",
                review.gate_ids.join(", "),
                VERDICT_PREFIX
            )),
            ReviewKind::ShellVerify { command, .. } => lines.push(format!(
                "[Verify] `{}` - Attempt {}/{}",
                command,
                review.attempts + 1,
                review.max_attempts
            )),
        }
    }
    lines.push(format!("Session: {}", session.session_id));
    lines.push(format!("Next: {}", next_action(session)));
    lines.join("\n")
}

/// Append the footer text and session payload to a response.
pub(crate) fn attach_session(mut response: ToolResponse, session: &ChainSession) -> ToolResponse {
    response.content.push(TextContent::new(footer_text(session)));
    response.with_payload(|p| p.session = Some(session_footer(session)))
}

pub(crate) fn unknown_prompt(library: &PromptLibrary, prompt_id: &str) -> ToolResponse {
    let suggestions = library.suggest(prompt_id);
    let mut message = format!("Unknown prompt `{}`.", prompt_id);
    if !suggestions.is_empty() {
        message.push_str(&format!(" Did you mean: {}?", suggestions.join(", ")));
    }
    ToolResponse::rejected(message).with_payload(|p| p.suggestions = suggestions)
}

pub(crate) fn unknown_framework(known: &[String], requested: &str) -> ToolResponse {
    let suggestions = fuzzy::suggest(requested, known.iter().map(String::as_str));
    let mut message = format!(
        "Unknown framework `@{}`. Available: {}.",
        requested,
        known.join(", ")
    );
    if !suggestions.is_empty() {
        message.push_str(&format!(" Did you mean: {}?", suggestions.join(", ")));
    }
    ToolResponse::rejected(message).with_payload(|p| p.suggestions = suggestions)
}

/// Drop everything a session owns outside the store: its temporary gates
/// (session, chain and step scopes) and its verification marker.
pub(crate) async fn release_session_resources(
    state: &EngineStateInner,
    session: &ChainSession,
) -> Result<(), EngineError> {
    let registry = &state.gate_registry;
    let mut removed = registry.cleanup_scope(&session.session_id);
    removed += registry.cleanup_scope(&session.chain_id);
    for step in 1..=session.total_steps {
        removed += registry.cleanup_scope(&step_scope_id(&session.session_id, step));
    }
    let marker_cleared = state.verifier.finish(&session.session_id).await?;
    tracing::debug!(
        "[Pipeline] Released session {} ({} gate(s), marker cleared: {})",
        session.session_id,
        removed,
        marker_cleared
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{PendingReview, SessionBlueprint};
    use crate::models::{ExecutionKind, ParsedStep, ResponseStatus};

    fn session(total: usize) -> ChainSession {
        let steps = (1..=total)
            .map(|i| ParsedStep::new(format!("p{}", i), ""))
            .collect();
        ChainSession::new(
            "sess-x".to_string(),
            "chain-abc".to_string(),
            SessionBlueprint {
                kind: ExecutionKind::Chain { steps },
                framework: None,
                gate_mode: None,
                category: None,
            },
        )
    }

    #[test]
    fn test_footer_shows_progress_and_review() {
        let mut s = session(3);
        s.pending_review = Some(PendingReview::gate(1, vec!["quality".to_string()], 3));
        let text = footer_text(&s);
        assert!(text.contains("[Chain] chain-abc - Step 1/3"));
        assert!(text.contains("[Gate] quality - Respond: GATE_REVIEW: PASS|FAIL - <reason>"));
        assert!(text.contains("gate_verdict"));

        s.pending_review = Some(PendingReview::shell(1, "make test".to_string(), 1000, None, 5));
        assert!(footer_text(&s).contains("[Verify] `make test` - Attempt 1/5"));
    }

    #[test]
    fn test_attach_session_sets_payload() {
        let s = session(2);
        let response = attach_session(ToolResponse::text("body", ResponseStatus::Rendered), &s);
        assert_eq!(response.content.len(), 2);
        let footer = response.payload().and_then(|p| p.session.clone()).unwrap();
        assert_eq!(footer.session_id, "sess-x");
        assert_eq!(footer.total_steps, 2);
        assert!(footer.next_action.contains("continue"));
    }

    #[test]
    fn test_next_render_step() {
        let mut s = session(3);
        assert_eq!(next_render_step(&s, true), 1);
        assert_eq!(next_render_step(&s, false), 1);
        s.record_placeholder(1);
        assert_eq!(next_render_step(&s, false), 2);
    }

    #[test]
    fn test_verdict_text_detection() {
        assert!(is_verdict_text("  gate_review: PASS - fine"));
        assert!(!is_verdict_text("Pass the salt"));
    }
}
