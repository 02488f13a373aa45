use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::ToolResponse;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Reads: `request.command`. Writes: `parsed`.
///
/// Continuations without a command pass through untouched.
pub struct CommandParsingStage {
    state: EngineState,
}

impl CommandParsingStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PipelineStage for CommandParsingStage {
    fn name(&self) -> &'static str {
        "command_parsing"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let Some(command) = ctx.request().command_text().map(str::to_string) else {
            return Ok(());
        };

        match self.state.parser.parse(&command) {
            Ok(parsed) if parsed.steps.is_empty() => {
                ctx.set_response(ToolResponse::rejected("Command contains no prompt steps."))
            }
            Ok(parsed) => {
                ctx.parsed = Some(parsed);
                Ok(())
            }
            Err(EngineError::Parse(message)) | Err(EngineError::InvalidRequest(message)) => {
                tracing::info!("[CommandParsing] Rejected `{}`: {}", command, message);
                ctx.set_response(ToolResponse::rejected(format!(
                    "Could not parse command: {}",
                    message
                )))
            }
            Err(e) => Err(e),
        }
    }
}
