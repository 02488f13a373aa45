//! Request pipeline: an ordered list of stages sharing one context.

pub mod context;
pub mod orchestrator;
pub mod stage;
pub mod stages;

pub use context::{CleanupStack, ExecutionContext};
pub use orchestrator::{PipelineOrchestrator, PipelineRun, StageMetric};
pub use stage::PipelineStage;
pub use stages::default_stages;
