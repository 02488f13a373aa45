//! Chain session state.
//!
//! `current_step` always names the step whose answer is outstanding. When a
//! step renders, a placeholder result is recorded for it immediately because
//! the transport cannot observe the assistant's output. The next request
//! carrying `user_response` overwrites the placeholder and advances the
//! session by exactly one step. A session is complete once
//! `current_step > total_steps`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::{ExecutionKind, GateMode, ParsedStep};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Captured (or placeholder) output of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub content: String,
    pub is_placeholder: bool,
    pub captured_at: DateTime<Utc>,
}

impl StepResult {
    pub fn placeholder(step_number: u32) -> Self {
        Self {
            content: format!("[awaiting output of step {}]", step_number),
            is_placeholder: true,
            captured_at: Utc::now(),
        }
    }

    pub fn captured(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_placeholder: false,
            captured_at: Utc::now(),
        }
    }
}

/// What an outstanding review is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewKind {
    /// A gate verdict (`GATE_REVIEW: PASS|FAIL - reason`).
    Gate,
    /// A shell verification command that must exit 0.
    ShellVerify {
        command: String,
        timeout_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReview {
    pub step_number: u32,
    pub gate_ids: Vec<String>,
    /// Failed attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Set once the ceiling is reached; only `gate_action` is accepted then.
    pub escalated: bool,
    pub kind: ReviewKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_feedback: Option<String>,
}

impl PendingReview {
    pub fn gate(step_number: u32, gate_ids: Vec<String>, max_attempts: u32) -> Self {
        Self {
            step_number,
            gate_ids,
            attempts: 0,
            max_attempts,
            escalated: false,
            kind: ReviewKind::Gate,
            last_feedback: None,
        }
    }

    pub fn shell(
        step_number: u32,
        command: String,
        timeout_ms: u64,
        working_dir: Option<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            step_number,
            gate_ids: vec!["shell-verify".to_string()],
            attempts: 0,
            max_attempts,
            escalated: false,
            kind: ReviewKind::ShellVerify {
                command,
                timeout_ms,
                working_dir,
            },
            last_feedback: None,
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self.kind, ReviewKind::ShellVerify { .. })
    }

    pub fn primary_gate(&self) -> &str {
        self.gate_ids.first().map(String::as_str).unwrap_or("gate")
    }
}

/// Everything needed to rebuild the execution plan from a session alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlueprint {
    pub kind: ExecutionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_mode: Option<GateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl SessionBlueprint {
    pub fn steps(&self) -> Vec<&ParsedStep> {
        self.kind.steps()
    }

    /// `a-->b-->c`, used for display and chain pattern matching.
    pub fn chain_name(&self) -> String {
        self.kind
            .steps()
            .iter()
            .map(|s| s.prompt_id.as_str())
            .collect::<Vec<_>>()
            .join("-->")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSession {
    pub session_id: String,
    pub chain_id: String,
    pub blueprint: SessionBlueprint,
    pub current_step: u32,
    pub total_steps: u32,
    pub step_results: BTreeMap<u32, StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_review: Option<PendingReview>,
    /// Failed attempts keyed by gate id (or `shell-verify`), across the session.
    #[serde(default)]
    pub retry_counts: HashMap<String, u32>,
    /// Temporary gates owned by this session.
    #[serde(default)]
    pub gate_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainSession {
    pub fn new(session_id: String, chain_id: String, blueprint: SessionBlueprint) -> Self {
        let total_steps = blueprint.kind.total_steps();
        let now = Utc::now();
        Self {
            session_id,
            chain_id,
            blueprint,
            current_step: 1,
            total_steps,
            step_results: BTreeMap::new(),
            pending_review: None,
            retry_counts: HashMap::new(),
            gate_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_step > self.total_steps
    }

    pub fn is_awaiting_review(&self) -> bool {
        self.pending_review.is_some()
    }

    pub fn current_step_def(&self) -> Option<&ParsedStep> {
        self.blueprint.kind.step(self.current_step)
    }

    /// Record a placeholder for a step that was just rendered. Existing
    /// captured content is kept.
    pub fn record_placeholder(&mut self, step_number: u32) {
        let keep = self
            .step_results
            .get(&step_number)
            .map(|r| !r.is_placeholder)
            .unwrap_or(false);
        if !keep {
            self.step_results
                .insert(step_number, StepResult::placeholder(step_number));
        }
        self.touch();
    }

    /// Overwrite the result of a step with real content.
    pub fn capture(&mut self, step_number: u32, content: &str) {
        self.step_results
            .insert(step_number, StepResult::captured(content));
        self.touch();
    }

    pub fn step_result(&self, step_number: u32) -> Option<&StepResult> {
        self.step_results.get(&step_number)
    }

    /// Latest non-placeholder output before `step_number`.
    pub fn previous_output(&self, step_number: u32) -> Option<&str> {
        self.step_results
            .range(..step_number)
            .rev()
            .find(|(_, r)| !r.is_placeholder)
            .map(|(_, r)| r.content.as_str())
    }

    /// Move to the next step. Exactly one step per call; blocked while a
    /// review is outstanding.
    pub fn advance(&mut self) -> Result<u32, EngineError> {
        if self.is_complete() {
            return Err(EngineError::Conflict(format!(
                "Session {} is already complete",
                self.session_id
            )));
        }
        if self.pending_review.is_some() {
            return Err(EngineError::Conflict(format!(
                "Session {} has an outstanding review on step {}",
                self.session_id, self.current_step
            )));
        }
        self.current_step += 1;
        self.touch();
        Ok(self.current_step)
    }

    /// Back to step 1 with no results. Only used for explicit restarts.
    pub fn reset(&mut self) {
        self.current_step = 1;
        self.step_results.clear();
        self.pending_review = None;
        self.retry_counts.clear();
        self.touch();
    }

    pub fn bump_retry(&mut self, key: &str) -> u32 {
        let count = self.retry_counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Versioned persisted form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub version: u32,
    pub session: ChainSession,
}

impl SessionSnapshot {
    pub fn capture(session: &ChainSession) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            session: session.clone(),
        }
    }

    pub fn restore(self) -> Result<ChainSession, EngineError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(EngineError::Parse(format!(
                "Unsupported session snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        Ok(self.session)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_session(steps: usize) -> ChainSession {
        let steps = (1..=steps)
            .map(|i| ParsedStep::new(format!("step{}", i), ""))
            .collect();
        ChainSession::new(
            "sess-1".to_string(),
            "chain-1".to_string(),
            SessionBlueprint {
                kind: ExecutionKind::Chain { steps },
                framework: None,
                gate_mode: None,
                category: None,
            },
        )
    }

    #[test]
    fn test_new_session_starts_at_step_one() {
        let session = chain_session(3);
        assert_eq!(session.current_step, 1);
        assert_eq!(session.total_steps, 3);
        assert!(!session.is_complete());
        assert_eq!(session.blueprint.chain_name(), "step1-->step2-->step3");
    }

    #[test]
    fn test_placeholder_then_capture() {
        let mut session = chain_session(2);
        session.record_placeholder(1);
        assert!(session.step_result(1).unwrap().is_placeholder);
        assert!(session.previous_output(2).is_none());

        session.capture(1, "real answer");
        session.record_placeholder(1);
        assert!(!session.step_result(1).unwrap().is_placeholder);
        assert_eq!(session.previous_output(2), Some("real answer"));
    }

    #[test]
    fn test_advance_one_step_at_a_time() {
        let mut session = chain_session(2);
        assert_eq!(session.advance().unwrap(), 2);
        assert_eq!(session.advance().unwrap(), 3);
        assert!(session.is_complete());
        assert!(session.advance().is_err());
    }

    #[test]
    fn test_pending_review_blocks_advance() {
        let mut session = chain_session(2);
        session.pending_review = Some(PendingReview::gate(1, vec!["g".to_string()], 3));
        assert!(matches!(session.advance(), Err(EngineError::Conflict(_))));
        assert_eq!(session.current_step, 1);
    }

    #[test]
    fn test_snapshot_version_checked() {
        let session = chain_session(1);
        let json = SessionSnapshot::capture(&session).to_json().unwrap();
        let restored = SessionSnapshot::from_json(&json).unwrap().restore().unwrap();
        assert_eq!(restored, session);

        let mut future = SessionSnapshot::capture(&session);
        future.version = 99;
        assert!(future.restore().is_err());
    }
}
