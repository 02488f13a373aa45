pub mod command;
pub mod gate;
pub mod request;
pub mod response;

pub use command::{
    ExecutionKind, ExecutionPlan, ParsedCommand, ParsedStep, PromptExecution, VerifyDirective,
};
pub use gate::{GateDefinition, GateMode, GateScope, GateSource, GateType};
pub use request::{CustomCheck, ExecutionRequest, GateAction, TemporaryGateInput};
pub use response::{
    EscalationPayload, GateResult, GateValidationPayload, ResponseStatus, SessionFooter,
    StructuredPayload, TextContent, ToolResponse,
};
