//! Chain sessions: bridge stateless requests into continuous multi-step runs.

pub mod identity;
pub mod session;
pub mod store;

pub use identity::{compute_chain_id, generate_session_id, normalize_args, parse_args};
pub use session::{
    ChainSession, PendingReview, ReviewKind, SessionBlueprint, SessionSnapshot, StepResult,
    SNAPSHOT_VERSION,
};
pub use store::{ChainLockGuard, ChainSessionStore, SessionSummary};
