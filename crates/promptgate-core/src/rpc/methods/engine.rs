//! `prompt_engine`: one pipeline pass. Params are the request object itself.

use crate::engine::PromptEngine;
use crate::models::{ExecutionRequest, ToolResponse};
use crate::rpc::error::RpcError;

pub async fn execute(engine: &PromptEngine, request: ExecutionRequest) -> Result<ToolResponse, RpcError> {
    Ok(engine.execute(request).await)
}
