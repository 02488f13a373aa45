//! Script executor collaborator: runs shell verification commands.
//!
//! Commands run through `sh -c` with a minimal environment and a bounded
//! wait. A timeout is reported as a failed run (`timed_out = true`), never
//! as an error, so it flows through the normal retry policy.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::EngineError;

/// Characters of stdout/stderr kept (from the end) per run.
pub const OUTPUT_TAIL_CHARS: usize = 5000;

/// Environment variables passed through to verification commands.
const ENV_PASSTHROUGH: &[&str] = &["PATH", "HOME", "USER", "SHELL", "CI", "LANG", "TERM"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInvocation {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOutput {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ScriptOutput {
    /// Error text for feedback: stderr when present, otherwise stdout.
    pub fn error_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn run(&self, invocation: ScriptInvocation) -> Result<ScriptOutput, EngineError>;
}

/// Keep the last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

#[derive(Debug, Clone, Default)]
pub struct ProcessScriptExecutor;

#[async_trait]
impl ScriptExecutor for ProcessScriptExecutor {
    async fn run(&self, invocation: ScriptInvocation) -> Result<ScriptOutput, EngineError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&invocation.command)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in ENV_PASSTHROUGH {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(
            "[ScriptExecutor] Running `{}` (timeout {}ms)",
            invocation.command,
            invocation.timeout_ms
        );

        let started = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| EngineError::Io(format!("Failed to spawn `{}`: {}", invocation.command, e)))?;

        match tokio::time::timeout(
            Duration::from_millis(invocation.timeout_ms),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                tracing::info!(
                    "[ScriptExecutor] `{}` exited with {:?}",
                    invocation.command,
                    exit_code
                );
                Ok(ScriptOutput {
                    passed: output.status.success(),
                    exit_code,
                    stdout: tail_chars(&String::from_utf8_lossy(&output.stdout), OUTPUT_TAIL_CHARS),
                    stderr: tail_chars(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_CHARS),
                    timed_out: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(EngineError::Io(format!(
                "Failed to wait for `{}`: {}",
                invocation.command, e
            ))),
            Err(_) => {
                tracing::warn!(
                    "[ScriptExecutor] `{}` timed out after {}ms",
                    invocation.command,
                    invocation.timeout_ms
                );
                Ok(ScriptOutput {
                    passed: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Timed out after {}ms", invocation.timeout_ms),
                    timed_out: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(command: &str, timeout_ms: u64) -> ScriptInvocation {
        ScriptInvocation {
            command: command.to_string(),
            working_dir: None,
            timeout_ms,
        }
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[tokio::test]
    async fn test_successful_command() {
        let out = ProcessScriptExecutor
            .run(invocation("echo hello", 10_000))
            .await
            .unwrap();
        assert!(out.passed);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let out = ProcessScriptExecutor
            .run(invocation("echo broken >&2; exit 3", 10_000))
            .await
            .unwrap();
        assert!(!out.passed);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.error_output().trim(), "broken");
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_run() {
        let out = ProcessScriptExecutor
            .run(invocation("sleep 5", 100))
            .await
            .unwrap();
        assert!(!out.passed);
        assert!(out.timed_out);
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = invocation("pwd", 10_000);
        inv.working_dir = Some(dir.path().to_path_buf());
        let out = ProcessScriptExecutor.run(inv).await.unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
