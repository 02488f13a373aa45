//! Quality gates: registry, reference resolution, criteria checks, verdicts,
//! retry/escalation, and shell verification.

pub mod criteria;
pub mod enforcement;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod verdict;
pub mod verification;

pub use criteria::{evaluate_gate, Criterion, GateEvaluation};
pub use enforcement::{ActionOutcome, FailureDecision, GateEnforcer};
pub use loader::{GateDefinitionLoader, StaticGateLoader, YamlGateLoader};
pub use registry::{GateRegistry, TemporaryGate};
pub use resolver::{GateReference, GateReferenceResolver};
pub use verdict::{parse_verdict, Verdict, VerdictOutcome};
pub use verification::{MarkerStore, ShellVerifier, VerificationMarker};
