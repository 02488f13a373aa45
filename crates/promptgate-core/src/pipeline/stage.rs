use async_trait::async_trait;

use super::context::ExecutionContext;
use crate::error::EngineError;

/// One step of the request pipeline.
///
/// A stage reads and writes [`ExecutionContext`] namespaces and may set the
/// response, which ends the pass. Returning an error aborts the pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError>;
}
