//! `PromptEngine`: the single entry point transports call.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{ExecutionRequest, ToolResponse};
use crate::pipeline::{default_stages, PipelineOrchestrator, PipelineRun, PipelineStage};
use crate::state::{EngineState, EngineStateInner};

pub struct PromptEngine {
    state: EngineState,
    orchestrator: PipelineOrchestrator,
}

impl PromptEngine {
    /// Engine with the default stage list.
    pub fn new(state: EngineState) -> Self {
        let stages = default_stages(&state);
        Self::with_stages(state, stages)
    }

    pub fn with_stages(state: EngineState, stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self {
            orchestrator: PipelineOrchestrator::new(stages),
            state,
        }
    }

    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self::new(EngineStateInner::builder(config).build()?))
    }

    /// Reload persisted sessions. Returns how many were restored.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let restored = self.state.sessions.restore().await?;
        if restored > 0 {
            tracing::info!("[PromptEngine] Restored {} session(s)", restored);
        }
        Ok(restored)
    }

    /// Handle one `prompt_engine` request. Faults become an error response;
    /// the detail stays in the log.
    pub async fn execute(&self, request: ExecutionRequest) -> ToolResponse {
        match self.orchestrator.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("[PromptEngine] Execution failed: {}", e);
                ToolResponse::failure(e.public_message())
            }
        }
    }

    pub async fn execute_with_metrics(&self, request: ExecutionRequest) -> PipelineRun {
        self.orchestrator.execute_with_metrics(request).await
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.orchestrator.stage_names()
    }
}
