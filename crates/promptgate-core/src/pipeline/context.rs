//! Execution context: the single mutable value threaded through one request.
//!
//! The inbound request is immutable; every other concern lives in its own
//! small namespace so stages can declare exactly what they read and write.
//! The response slot is set-once: after it is filled, the orchestrator stops
//! and no further stage runs.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::chain::{ChainLockGuard, ChainSession};
use crate::error::EngineError;
use crate::injection::InjectionDecision;
use crate::models::{
    ExecutionPlan, ExecutionRequest, GateMode, GateResult, GateScope, ParsedCommand, ToolResponse,
};

// ─── Lifecycle ─────────────────────────────────────────────────────────────

type CleanupFn = Box<dyn FnOnce() + Send + Sync>;

/// Deferred cleanup handlers, run LIFO exactly once.
///
/// The orchestrator drains the stack on every exit path; `Drop` runs
/// whatever is left if a drain never happened.
#[derive(Default)]
pub struct CleanupStack {
    handlers: Vec<(String, CleanupFn)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        label: impl Into<String>,
        handler: impl FnOnce() + Send + Sync + 'static,
    ) {
        self.handlers.push((label.into(), Box::new(handler)));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler, most recent first. Returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Some((label, handler)) = self.handlers.pop() {
            tracing::trace!("[Cleanup] Running {}", label);
            handler();
            ran += 1;
        }
        ran
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.handlers.is_empty() {
            tracing::debug!(
                "[Cleanup] Draining {} handler(s) on drop",
                self.handlers.len()
            );
            self.drain();
        }
    }
}

pub struct LifecycleState {
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    pub cleanup: CleanupStack,
}

// ─── Session ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SessionState {
    pub session: Option<ChainSession>,
    /// Created during this request.
    pub is_new: bool,
    /// A stored session was picked up (by id or chain id).
    pub resumed: bool,
    /// Scope id for session-scoped temporary gates.
    pub scope_id: Option<String>,
    /// Per-chain lock held for the whole pass.
    pub guard: Option<ChainLockGuard>,
    /// `user_response` was captured into the previous step.
    pub captured: bool,
    /// The session moved forward during this request.
    pub advanced: bool,
}

// ─── Gates ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GateGuidance {
    pub gate_id: String,
    pub name: String,
    pub guidance: String,
    pub criteria: Vec<String>,
}

#[derive(Debug, Default)]
pub struct GateState {
    /// Gate ids applying to the step being rendered, canonical and temporary.
    pub gate_ids: Vec<String>,
    /// Temporary gates created during this request.
    pub temporary_ids: Vec<String>,
    pub scope: GateScope,
    pub mode: GateMode,
    /// "Did you mean" hints for unknown gate references.
    pub suggestions: Vec<String>,
    /// Guidance blocks collected for the rendered step.
    pub guidance: Vec<GateGuidance>,
    /// Results of the last evaluation (gate review stage).
    pub results: Vec<GateResult>,
    /// Warnings appended in advise mode.
    pub advisories: Vec<String>,
    /// A review should be opened once the step renders.
    pub review_pending: bool,
}

// ─── Framework & injection ────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct FrameworkState {
    pub framework_id: Option<String>,
    pub system_prompt: Option<String>,
    pub style_guidance: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct InjectionState {
    pub decisions: Vec<InjectionDecision>,
    pub system_prompt: bool,
    pub gate_guidance: bool,
    pub style_guidance: bool,
}

// ─── Execution output ──────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct ExecutionOutput {
    /// 1-based step rendered during this request.
    pub step_number: u32,
    pub prompt_id: Option<String>,
    pub args: HashMap<String, String>,
    pub system_message: Option<String>,
    pub rendered: Option<String>,
    /// Step result recorded as a placeholder in the session.
    pub placeholder_recorded: bool,
}

// ─── Context ───────────────────────────────────────────────────────────────

pub struct ExecutionContext {
    /// Scope id for execution-scoped temporary gates.
    pub execution_id: String,
    request: ExecutionRequest,
    pub parsed: Option<ParsedCommand>,
    pub plan: Option<ExecutionPlan>,
    pub lifecycle: LifecycleState,
    pub session: SessionState,
    pub gates: GateState,
    pub framework: FrameworkState,
    pub injection: InjectionState,
    pub execution: ExecutionOutput,
    response: Option<ToolResponse>,
}

impl ExecutionContext {
    pub fn new(request: ExecutionRequest) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            execution_id: format!("exec-{}", &suffix[..12]),
            request,
            parsed: None,
            plan: None,
            lifecycle: LifecycleState {
                started: Instant::now(),
                started_at: Utc::now(),
                cleanup: CleanupStack::new(),
            },
            session: SessionState::default(),
            gates: GateState::default(),
            framework: FrameworkState::default(),
            injection: InjectionState::default(),
            execution: ExecutionOutput::default(),
            response: None,
        }
    }

    pub fn request(&self) -> &ExecutionRequest {
        &self.request
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn response(&self) -> Option<&ToolResponse> {
        self.response.as_ref()
    }

    /// Set the response. Fails if one is already set.
    pub fn set_response(&mut self, response: ToolResponse) -> Result<(), EngineError> {
        if self.response.is_some() {
            return Err(EngineError::ResponseAlreadySet);
        }
        self.response = Some(response);
        Ok(())
    }

    pub fn take_response(&mut self) -> Option<ToolResponse> {
        self.response.take()
    }

    pub fn require_plan(&self, stage: &str) -> Result<&ExecutionPlan, EngineError> {
        self.plan
            .as_ref()
            .ok_or_else(|| EngineError::precondition(stage, "execution plan missing"))
    }

    pub fn require_session(&self, stage: &str) -> Result<&ChainSession, EngineError> {
        self.session
            .session
            .as_ref()
            .ok_or_else(|| EngineError::precondition(stage, "chain session missing"))
    }

    pub fn require_session_mut(&mut self, stage: &str) -> Result<&mut ChainSession, EngineError> {
        self.session
            .session
            .as_mut()
            .ok_or_else(|| EngineError::precondition(stage, "chain session missing"))
    }

    /// Step number to render in this pass.
    pub fn current_step(&self) -> u32 {
        self.session
            .session
            .as_ref()
            .map(|s| s.current_step)
            .unwrap_or(1)
    }

    /// Top-level namespaces that currently hold data; diffed per stage.
    pub fn populated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.parsed.is_some() {
            fields.push("parsed");
        }
        if self.plan.is_some() {
            fields.push("plan");
        }
        if !self.lifecycle.cleanup.is_empty() {
            fields.push("lifecycle.cleanup");
        }
        if self.session.session.is_some() {
            fields.push("session");
        }
        if !self.gates.gate_ids.is_empty() || !self.gates.results.is_empty() {
            fields.push("gates");
        }
        if self.framework.framework_id.is_some() {
            fields.push("framework");
        }
        if !self.injection.decisions.is_empty() {
            fields.push("injection");
        }
        if self.execution.rendered.is_some() {
            fields.push("execution");
        }
        if self.response.is_some() {
            fields.push("response");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_cleanup_runs_lifo_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        for i in 0..3 {
            let order = order.clone();
            stack.push(format!("h{}", i), move || order.lock().unwrap().push(i));
        }
        assert_eq!(stack.drain(), 3);
        assert_eq!(stack.drain(), 0);
        drop(stack);
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn test_cleanup_runs_on_drop() {
        let hit = Arc::new(Mutex::new(false));
        {
            let mut stack = CleanupStack::new();
            let hit = hit.clone();
            stack.push("flag", move || *hit.lock().unwrap() = true);
        }
        assert!(*hit.lock().unwrap());
    }

    #[test]
    fn test_response_is_set_once() {
        let mut ctx = ExecutionContext::new(ExecutionRequest::command(">>a"));
        assert!(!ctx.has_response());
        ctx.set_response(ToolResponse::failure("x")).unwrap();
        assert!(matches!(
            ctx.set_response(ToolResponse::failure("y")),
            Err(EngineError::ResponseAlreadySet)
        ));
        assert_eq!(ctx.response().unwrap().text_body(), "x");
        assert!(ctx.populated_fields().contains(&"response"));
    }

    #[test]
    fn test_require_plan_is_precondition() {
        let ctx = ExecutionContext::new(ExecutionRequest::default());
        assert!(matches!(
            ctx.require_plan("planning"),
            Err(EngineError::Precondition { .. })
        ));
        assert_eq!(ctx.current_step(), 1);
    }
}
