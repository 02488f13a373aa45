use async_trait::async_trait;

use super::support::attach_session;
use crate::error::EngineError;
use crate::models::{GateValidationPayload, ResponseStatus, ToolResponse};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;

/// Assembles the rendered step into the final response.
///
/// Reads: `execution`, `framework`, `injection`, `gates`, `session`.
/// Writes: `response`.
///
/// Sections, in order: system text, the rendered step, gate guidance,
/// style guidance, advisories, notes. The session footer closes every
/// session-backed response.
#[derive(Default)]
pub struct FormattingStage;

impl FormattingStage {
    pub fn new() -> Self {
        Self
    }
}

fn system_section(ctx: &ExecutionContext) -> Option<String> {
    let mut parts = Vec::new();
    if ctx.injection.system_prompt {
        if let (Some(id), Some(prompt)) = (&ctx.framework.framework_id, &ctx.framework.system_prompt) {
            parts.push(format!("[Framework: {}] {}", id, prompt.trim()));
        }
    }
    if let Some(message) = ctx.execution.system_message.as_deref() {
        if !message.trim().is_empty() {
            parts.push(message.trim().to_string());
        }
    }
    (!parts.is_empty()).then(|| format!("## System\n\n{}", parts.join("\n\n")))
}

fn gate_section(ctx: &ExecutionContext) -> Option<String> {
    if !ctx.injection.gate_guidance || ctx.gates.guidance.is_empty() {
        return None;
    }
    let mut out = String::from("## Quality Gates");
    for gate in &ctx.gates.guidance {
        out.push_str(&format!("\n\n### {}", gate.name));
        if !gate.guidance.trim().is_empty() {
            out.push_str(&format!("\n{}", gate.guidance.trim()));
        }
        for criterion in &gate.criteria {
            out.push_str(&format!("\n- {}", criterion));
        }
    }
    Some(out)
}

fn style_section(ctx: &ExecutionContext) -> Option<String> {
    if !ctx.injection.style_guidance {
        return None;
    }
    ctx.framework
        .style_guidance
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("## Style\n\n{}", s.trim()))
}

fn list_section(title: &str, items: &[String]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let lines: Vec<String> = items.iter().map(|i| format!("- {}", i)).collect();
    Some(format!("## {}\n\n{}", title, lines.join("\n")))
}

pub(crate) fn compose_body(ctx: &ExecutionContext, rendered: &str) -> String {
    let mut sections = Vec::new();
    if ctx.session.advanced {
        if let Some(session) = ctx.session.session.as_ref() {
            sections.push(format!(
                "Step {} recorded. Continuing with step {}/{}.",
                session.current_step.saturating_sub(1),
                session.current_step,
                session.total_steps
            ));
        }
    }
    sections.extend(system_section(ctx));
    sections.push(rendered.trim_end().to_string());
    sections.extend(gate_section(ctx));
    sections.extend(style_section(ctx));
    sections.extend(list_section("Gate advisories", &ctx.gates.advisories));
    sections.extend(list_section("Notes", &ctx.gates.suggestions));
    sections.join("\n\n")
}

#[async_trait]
impl PipelineStage for FormattingStage {
    fn name(&self) -> &'static str {
        "formatting"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let Some(rendered) = ctx.execution.rendered.as_deref() else {
            return Err(EngineError::precondition(self.name(), "nothing was rendered"));
        };
        let body = compose_body(ctx, rendered);

        let suggestions = ctx.gates.suggestions.clone();
        let results = ctx.gates.results.clone();
        let mut response = ToolResponse::text(body, ResponseStatus::Rendered).with_payload(|p| {
            p.suggestions = suggestions;
            if !results.is_empty() {
                p.gate_validation = Some(GateValidationPayload::from_results(results, false));
            }
        });
        if let Some(session) = ctx.session.session.as_ref() {
            response = attach_session(response, session);
        }
        ctx.set_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionRequest;
    use crate::pipeline::context::GateGuidance;

    #[test]
    fn test_sections_follow_injection_flags() {
        let mut ctx = ExecutionContext::new(ExecutionRequest::command(">>demo"));
        ctx.framework.framework_id = Some("ReACT".to_string());
        ctx.framework.system_prompt = Some("Think then act.".to_string());
        ctx.framework.style_guidance = Some("Label blocks.".to_string());
        ctx.gates.guidance.push(GateGuidance {
            gate_id: "code-quality".to_string(),
            name: "Code Quality".to_string(),
            guidance: "Keep functions small".to_string(),
            criteria: vec!["contains:fn".to_string()],
        });
        ctx.injection.system_prompt = true;
        ctx.injection.gate_guidance = false;
        ctx.injection.style_guidance = true;

        let body = compose_body(&ctx, "Do the thing");
        assert!(body.starts_with("## System\n\n[Framework: ReACT] Think then act."));
        assert!(body.contains("Do the thing"));
        assert!(body.contains("## Style\n\nLabel blocks."));
        assert!(!body.contains("## Quality Gates"));

        ctx.injection.gate_guidance = true;
        let body = compose_body(&ctx, "Do the thing");
        let gates_at = body.find("## Quality Gates").unwrap();
        let style_at = body.find("## Style").unwrap();
        assert!(gates_at < style_at);
        assert!(body.contains("- contains:fn"));
    }

    #[test]
    fn test_plain_prompt_has_only_rendered_text() {
        let ctx = ExecutionContext::new(ExecutionRequest::command(">>demo"));
        assert_eq!(compose_body(&ctx, "Hello\n"), "Hello");
    }
}
