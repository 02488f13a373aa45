use std::collections::HashMap;

use async_trait::async_trait;

use super::support::{attach_session, render_step};
use crate::chain::{parse_args, ChainSession};
use crate::error::EngineError;
use crate::models::{ParsedStep, ToolResponse};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::prompts::PromptDefinition;
use crate::state::EngineState;

/// Renders the current step.
///
/// Reads: `plan`, `session`, `request.options`.
/// Writes: `execution.{step_number, prompt_id, args, system_message,
/// rendered}`, `response` (missing required arguments).
pub struct StepExecutionStage {
    state: EngineState,
}

impl StepExecutionStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }
}

/// Argument precedence, lowest first: declared defaults, earlier chain
/// outputs, `key=value` pairs from the command, request `options`.
fn collect_args(
    prompt: &PromptDefinition,
    step: &ParsedStep,
    number: u32,
    session: Option<&ChainSession>,
    options: &serde_json::Map<String, serde_json::Value>,
) -> HashMap<String, String> {
    let mut args = prompt.default_arguments();

    if let Some(session) = session {
        for n in 1..number {
            if let Some(result) = session.step_result(n).filter(|r| !r.is_placeholder) {
                args.insert(format!("step{}_output", n), result.content.clone());
            }
        }
        if let Some(previous) = session.previous_output(number) {
            args.insert("previous_step_output".to_string(), previous.to_string());
        }
    }

    for (key, value) in parse_args(&step.raw_args) {
        let key = if key == "_" { "input".to_string() } else { key };
        args.insert(key, value);
    }

    for (key, value) in options {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        args.insert(key.clone(), value);
    }
    args
}

#[async_trait]
impl PipelineStage for StepExecutionStage {
    fn name(&self) -> &'static str {
        "step_execution"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let Some((number, step, prompt)) = render_step(ctx, &self.state.prompts) else {
            return Err(EngineError::precondition(
                self.name(),
                "no renderable step for the current position",
            ));
        };

        let args = collect_args(
            &prompt,
            &step,
            number,
            ctx.session.session.as_ref(),
            &ctx.request().options,
        );

        let missing = prompt.missing_required(&args);
        if !missing.is_empty() {
            let mut response = ToolResponse::rejected(format!(
                "Prompt `{}` is missing required argument(s): {}. Pass them as `key=value` after the prompt id or in `options`.",
                prompt.id,
                missing.join(", ")
            ));
            if let Some(session) = ctx.session.session.as_ref() {
                response = attach_session(response, session);
            }
            return ctx.set_response(response);
        }

        let rendered = self.state.renderer.render(&prompt.template, &args)?;
        tracing::info!(
            "[StepExecution] Rendered `{}` (step {}, {} chars)",
            prompt.id,
            number,
            rendered.len()
        );

        ctx.execution.step_number = number;
        ctx.execution.prompt_id = Some(prompt.id.clone());
        ctx.execution.args = args;
        ctx.execution.system_message = prompt.system_message.clone();
        ctx.execution.rendered = Some(rendered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SessionBlueprint;
    use crate::models::ExecutionKind;
    use crate::prompts::PromptArgument;

    fn prompt() -> PromptDefinition {
        let mut prompt = PromptDefinition::new("summarize", "Summarize {{input}}");
        prompt.arguments = vec![PromptArgument {
            name: "tone".to_string(),
            required: false,
            default: Some("neutral".to_string()),
            description: None,
        }];
        prompt
    }

    #[test]
    fn test_remainder_becomes_input() {
        let step = ParsedStep::new("summarize", "the quarterly report tone=dry");
        let args = collect_args(&prompt(), &step, 1, None, &serde_json::Map::new());
        assert_eq!(args.get("tone").map(String::as_str), Some("dry"));
        assert!(args.get("input").is_some());
        assert!(!args.contains_key("_"));
    }

    #[test]
    fn test_options_override_command_args() {
        let step = ParsedStep::new("summarize", "tone=dry");
        let mut options = serde_json::Map::new();
        options.insert("tone".to_string(), serde_json::json!("warm"));
        options.insert("limit".to_string(), serde_json::json!(3));
        let args = collect_args(&prompt(), &step, 1, None, &options);
        assert_eq!(args.get("tone").map(String::as_str), Some("warm"));
        assert_eq!(args.get("limit").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_previous_outputs_available() {
        let steps = vec![ParsedStep::new("a", ""), ParsedStep::new("b", "")];
        let blueprint = SessionBlueprint {
            kind: ExecutionKind::Chain { steps },
            framework: None,
            gate_mode: None,
            category: None,
        };
        let mut session = ChainSession::new("s1".to_string(), "c1".to_string(), blueprint);
        session.capture(1, "first output");

        let step = ParsedStep::new("b", "");
        let args = collect_args(&prompt(), &step, 2, Some(&session), &serde_json::Map::new());
        assert_eq!(args.get("step1_output").map(String::as_str), Some("first output"));
        assert_eq!(
            args.get("previous_step_output").map(String::as_str),
            Some("first output")
        );
    }
}
