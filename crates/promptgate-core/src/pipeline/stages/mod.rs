//! The default pipeline stages, in execution order.

mod capture;
mod execution;
mod formatting;
mod framework;
mod gate_enhancement;
mod gate_extraction;
mod gate_review;
mod injection;
mod lifecycle;
mod operators;
mod parsing;
mod planning;
mod session;
pub(crate) mod support;

pub use capture::ResponseCaptureStage;
pub use execution::StepExecutionStage;
pub use formatting::FormattingStage;
pub use framework::FrameworkResolutionStage;
pub use gate_enhancement::GateEnhancementStage;
pub use gate_extraction::GateExtractionStage;
pub use gate_review::GateReviewStage;
pub use injection::InjectionControlStage;
pub use lifecycle::LifecycleStage;
pub use operators::OperatorValidationStage;
pub use parsing::CommandParsingStage;
pub use planning::PlanningStage;
pub use session::SessionManagementStage;

use super::stage::PipelineStage;
use crate::state::EngineState;

/// Stages of the default deployment.
pub fn default_stages(state: &EngineState) -> Vec<Box<dyn PipelineStage>> {
    vec![
        Box::new(LifecycleStage::new(state.clone())),
        Box::new(CommandParsingStage::new(state.clone())),
        Box::new(PlanningStage::new(state.clone())),
        Box::new(OperatorValidationStage::new(state.clone())),
        Box::new(SessionManagementStage::new(state.clone())),
        Box::new(GateExtractionStage::new(state.clone())),
        Box::new(GateReviewStage::new(state.clone())),
        Box::new(FrameworkResolutionStage::new(state.clone())),
        Box::new(GateEnhancementStage::new(state.clone())),
        Box::new(InjectionControlStage::new(state.clone())),
        Box::new(StepExecutionStage::new(state.clone())),
        Box::new(ResponseCaptureStage::new(state.clone())),
        Box::new(FormattingStage::new()),
    ]
}
