//! Shell verification loop and its externally visible marker file.
//!
//! While a verification loop is outstanding a small JSON marker is kept on
//! disk so an out-of-process watcher can refuse to let the conversation end
//! before the check passes:
//!
//! ```json
//! {
//!   "config": { "command": "cargo test", "maxIterations": 5, "timeout": 300000, "workingDir": null },
//!   "state": { "iteration": 2, "sessionId": "sess-...", "lastResult": { ... } }
//! }
//! ```
//!
//! The marker is written when the step renders, updated after every run,
//! and removed on pass, skip or abort.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::chain::{PendingReview, ReviewKind};
use crate::error::EngineError;
use crate::scripts::{tail_chars, ScriptExecutor, ScriptInvocation, ScriptOutput};

/// Characters of error output echoed back in failure feedback.
pub const FEEDBACK_TAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerConfig {
    pub command: String,
    pub max_iterations: u32,
    pub timeout: u64,
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerState {
    pub iteration: u32,
    pub session_id: String,
    pub last_result: Option<ScriptOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMarker {
    pub config: MarkerConfig,
    pub state: MarkerState,
}

impl VerificationMarker {
    /// Marker for a shell review. `None` for gate reviews.
    pub fn for_review(
        review: &PendingReview,
        session_id: &str,
        last_result: Option<ScriptOutput>,
    ) -> Option<Self> {
        let ReviewKind::ShellVerify {
            command,
            timeout_ms,
            working_dir,
        } = &review.kind
        else {
            return None;
        };
        Some(Self {
            config: MarkerConfig {
                command: command.clone(),
                max_iterations: review.max_attempts,
                timeout: *timeout_ms,
                working_dir: working_dir.clone(),
            },
            state: MarkerState {
                iteration: review.attempts,
                session_id: session_id.to_string(),
                last_result,
            },
        })
    }
}

/// Reads and writes the marker file.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
}

impl MarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, marker: &VerificationMarker) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(marker)?;
        fs::write(&self.path, json)
            .await
            .map_err(|e| EngineError::Io(format!("Failed to write marker: {}", e)))?;
        tracing::debug!(
            "[Verification] Marker written (iteration {}) at {}",
            marker.state.iteration,
            self.path.display()
        );
        Ok(())
    }

    pub async fn read(&self) -> Option<VerificationMarker> {
        let text = fs::read_to_string(&self.path).await.ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Remove the marker. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, EngineError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("[Verification] Marker cleared at {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::Io(format!("Failed to clear marker: {}", e))),
        }
    }

    /// Clear only if the marker belongs to `session_id`.
    pub async fn clear_for_session(&self, session_id: &str) -> Result<bool, EngineError> {
        match self.read().await {
            Some(marker) if marker.state.session_id == session_id => self.clear().await,
            _ => Ok(false),
        }
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }
}

/// Runs verification commands and keeps the marker in sync.
#[derive(Clone)]
pub struct ShellVerifier {
    executor: Arc<dyn ScriptExecutor>,
    markers: MarkerStore,
}

impl ShellVerifier {
    pub fn new(executor: Arc<dyn ScriptExecutor>, markers: MarkerStore) -> Self {
        Self { executor, markers }
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Write the marker for a freshly started (or retried) loop.
    pub async fn begin(&self, review: &PendingReview, session_id: &str) -> Result<(), EngineError> {
        match VerificationMarker::for_review(review, session_id, None) {
            Some(marker) => self.markers.write(&marker).await,
            None => Ok(()),
        }
    }

    /// Run the review's command once.
    pub async fn run(&self, review: &PendingReview) -> Result<ScriptOutput, EngineError> {
        let ReviewKind::ShellVerify {
            command,
            timeout_ms,
            working_dir,
        } = &review.kind
        else {
            return Err(EngineError::precondition(
                "gate_review",
                "shell verification requested for a gate review",
            ));
        };
        self.executor
            .run(ScriptInvocation {
                command: command.clone(),
                working_dir: working_dir.as_ref().map(PathBuf::from),
                timeout_ms: *timeout_ms,
            })
            .await
    }

    /// Record the latest run in the marker.
    pub async fn update(
        &self,
        review: &PendingReview,
        session_id: &str,
        output: &ScriptOutput,
    ) -> Result<(), EngineError> {
        match VerificationMarker::for_review(review, session_id, Some(output.clone())) {
            Some(marker) => self.markers.write(&marker).await,
            None => Ok(()),
        }
    }

    pub async fn finish(&self, session_id: &str) -> Result<bool, EngineError> {
        self.markers.clear_for_session(session_id).await
    }
}

/// Failure feedback: command, exit code, timeout status and the tail of the
/// error output.
pub fn failure_feedback(command: &str, output: &ScriptOutput) -> String {
    let exit = output
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let mut text = format!(
        "Command: `{}`\nExit code: {}\nTimed out: {}",
        command,
        exit,
        if output.timed_out { "yes" } else { "no" }
    );
    let tail = tail_chars(output.error_output().trim(), FEEDBACK_TAIL_CHARS);
    if !tail.is_empty() {
        text.push_str("\n\nOutput:\n```\n");
        text.push_str(&tail);
        text.push_str("\n```");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingExecutor {
        runs: AtomicU32,
    }

    #[async_trait]
    impl ScriptExecutor for CountingExecutor {
        async fn run(&self, invocation: ScriptInvocation) -> Result<ScriptOutput, EngineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptOutput {
                passed: false,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("{} failed", invocation.command),
                timed_out: false,
                duration_ms: 1,
            })
        }
    }

    fn review() -> PendingReview {
        PendingReview::shell(1, "make check".to_string(), 1000, None, 5)
    }

    #[tokio::test]
    async fn test_marker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkerStore::new(dir.path().join("runtime-state/verify-active.json"));
        let verifier = ShellVerifier::new(
            Arc::new(CountingExecutor {
                runs: AtomicU32::new(0),
            }),
            store.clone(),
        );

        let review = review();
        verifier.begin(&review, "sess-1").await.unwrap();
        let marker = store.read().await.unwrap();
        assert_eq!(marker.config.command, "make check");
        assert_eq!(marker.config.max_iterations, 5);
        assert_eq!(marker.state.iteration, 0);

        let output = verifier.run(&review).await.unwrap();
        verifier.update(&review, "sess-1", &output).await.unwrap();
        assert!(store.read().await.unwrap().state.last_result.is_some());

        assert!(!verifier.finish("sess-other").await.unwrap());
        assert!(store.exists().await);
        assert!(verifier.finish("sess-1").await.unwrap());
        assert!(!store.exists().await);
        assert!(!store.clear().await.unwrap());
    }

    #[test]
    fn test_marker_json_shape() {
        let marker = VerificationMarker::for_review(&review(), "s", None).unwrap();
        let value = serde_json::to_value(&marker).unwrap();
        assert_eq!(value["config"]["maxIterations"], 5);
        assert_eq!(value["config"]["timeout"], 1000);
        assert_eq!(value["state"]["sessionId"], "s");
        assert!(value["config"]["workingDir"].is_null());
    }

    #[test]
    fn test_failure_feedback_tail() {
        let output = ScriptOutput {
            passed: false,
            exit_code: None,
            stdout: String::new(),
            stderr: "x".repeat(FEEDBACK_TAIL_CHARS + 100),
            timed_out: true,
            duration_ms: 10,
        };
        let text = failure_feedback("slow", &output);
        assert!(text.contains("Exit code: none"));
        assert!(text.contains("Timed out: yes"));
        assert!(!text.contains(&"x".repeat(FEEDBACK_TAIL_CHARS + 1)));
    }

    #[test]
    fn test_gate_review_has_no_marker() {
        let gate = PendingReview::gate(1, vec!["g".into()], 3);
        assert!(VerificationMarker::for_review(&gate, "s", None).is_none());
    }
}
