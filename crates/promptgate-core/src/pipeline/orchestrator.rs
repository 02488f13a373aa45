//! Pipeline orchestrator: runs the ordered stage list against one context.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use sysinfo::System;

use super::context::ExecutionContext;
use super::stage::PipelineStage;
use crate::error::EngineError;
use crate::models::{ExecutionRequest, ToolResponse};

/// Memory reading taken around each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub used_memory_bytes: u64,
}

/// Source of resource snapshots. Disabled probes return `None`.
pub struct ResourceProbe {
    system: Option<Mutex<System>>,
}

impl ResourceProbe {
    pub fn enabled() -> Self {
        Self {
            system: Some(Mutex::new(System::new())),
        }
    }

    pub fn disabled() -> Self {
        Self { system: None }
    }

    pub fn snapshot(&self) -> Option<ResourceSnapshot> {
        let mut sys = self.system.as_ref()?.lock().ok()?;
        sys.refresh_memory();
        Some(ResourceSnapshot {
            used_memory_bytes: sys.used_memory(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetric {
    pub stage: &'static str,
    pub duration_ms: f64,
    /// Namespaces that became populated during this stage.
    pub populated: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_delta_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a full pass, kept for diagnostics.
#[derive(Debug)]
pub struct PipelineRun {
    pub result: Result<ToolResponse, EngineError>,
    pub metrics: Vec<StageMetric>,
    pub cleanup_ran: usize,
}

pub struct PipelineOrchestrator {
    stages: Vec<Box<dyn PipelineStage>>,
    probe: ResourceProbe,
}

impl PipelineOrchestrator {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self {
            stages,
            probe: ResourceProbe::enabled(),
        }
    }

    pub fn with_probe(mut self, probe: ResourceProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ToolResponse, EngineError> {
        self.execute_with_metrics(request).await.result
    }

    /// Run every stage in order until one produces a response.
    pub async fn execute_with_metrics(&self, request: ExecutionRequest) -> PipelineRun {
        let mut ctx = ExecutionContext::new(request);
        let mut metrics = Vec::with_capacity(self.stages.len());

        let result = self.run_stages(&mut ctx, &mut metrics).await;
        let cleanup_ran = ctx.lifecycle.cleanup.drain();
        let total_ms = ctx.lifecycle.started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => tracing::info!(
                "[Pipeline] {} completed in {:.1}ms ({} stages, {} cleanup) {}",
                ctx.execution_id,
                total_ms,
                metrics.len(),
                cleanup_ran,
                format_metrics(&metrics)
            ),
            Err(e) => tracing::error!(
                "[Pipeline] {} failed after {:.1}ms: {} {}",
                ctx.execution_id,
                total_ms,
                e,
                format_metrics(&metrics)
            ),
        }

        PipelineRun {
            result,
            metrics,
            cleanup_ran,
        }
    }

    async fn run_stages(
        &self,
        ctx: &mut ExecutionContext,
        metrics: &mut Vec<StageMetric>,
    ) -> Result<ToolResponse, EngineError> {
        for stage in &self.stages {
            let before_fields = ctx.populated_fields();
            let before_mem = self.probe.snapshot();
            let started = Instant::now();

            let outcome = stage.execute(ctx).await;

            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            let memory_delta_bytes = match (before_mem, self.probe.snapshot()) {
                (Some(a), Some(b)) => Some(b.used_memory_bytes as i64 - a.used_memory_bytes as i64),
                _ => None,
            };

            if let Err(e) = outcome {
                tracing::error!(
                    "[Pipeline] Stage '{}' failed after {:.1}ms: {}",
                    stage.name(),
                    duration_ms,
                    e
                );
                metrics.push(StageMetric {
                    stage: stage.name(),
                    duration_ms,
                    populated: Vec::new(),
                    memory_delta_bytes,
                    error: Some(e.to_string()),
                });
                return Err(e);
            }

            let populated: Vec<&'static str> = ctx
                .populated_fields()
                .into_iter()
                .filter(|f| !before_fields.contains(f))
                .collect();
            tracing::debug!(
                "[Pipeline] Stage '{}' took {:.1}ms, populated {:?}",
                stage.name(),
                duration_ms,
                populated
            );
            metrics.push(StageMetric {
                stage: stage.name(),
                duration_ms,
                populated,
                memory_delta_bytes,
                error: None,
            });

            if ctx.has_response() {
                break;
            }
        }

        ctx.take_response().ok_or(EngineError::NoResponse)
    }
}

fn format_metrics(metrics: &[StageMetric]) -> String {
    let parts: Vec<String> = metrics
        .iter()
        .map(|m| match &m.error {
            Some(_) => format!("{}={:.1}ms!", m.stage, m.duration_ms),
            None => format!("{}={:.1}ms", m.stage, m.duration_ms),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        respond: bool,
        fail: bool,
    }

    #[async_trait]
    impl PipelineStage for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let flag = Arc::new(AtomicUsize::new(0));
            ctx.lifecycle.cleanup.push(self.name, move || {
                flag.fetch_add(1, Ordering::SeqCst);
            });
            if self.fail {
                return Err(EngineError::StageFailed {
                    stage: self.name.to_string(),
                    message: "boom".to_string(),
                });
            }
            if self.respond {
                ctx.set_response(ToolResponse::text(self.name, ResponseStatus::Rendered))?;
            }
            Ok(())
        }
    }

    fn stage(name: &'static str, calls: &Arc<AtomicUsize>, respond: bool, fail: bool) -> Box<dyn PipelineStage> {
        Box::new(Recorder {
            name,
            calls: calls.clone(),
            respond,
            fail,
        })
    }

    #[tokio::test]
    async fn test_early_exit_on_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));
        let pipeline = PipelineOrchestrator::new(vec![
            stage("a", &calls, false, false),
            stage("b", &calls, true, false),
            stage("format", &later, true, false),
        ])
        .with_probe(ResourceProbe::disabled());

        let run = pipeline.execute_with_metrics(ExecutionRequest::default()).await;
        assert_eq!(run.result.unwrap().text_body(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(later.load(Ordering::SeqCst), 0);
        assert_eq!(run.metrics.len(), 2);
        assert!(run.metrics[1].populated.contains(&"response"));
        assert_eq!(run.cleanup_ran, 2);
    }

    #[tokio::test]
    async fn test_stage_error_aborts_and_still_cleans_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = PipelineOrchestrator::new(vec![
            stage("a", &calls, false, false),
            stage("b", &calls, false, true),
            stage("c", &calls, true, false),
        ]);

        let run = pipeline.execute_with_metrics(ExecutionRequest::default()).await;
        assert!(matches!(run.result, Err(EngineError::StageFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.cleanup_ran, 2);
        assert!(run.metrics[1].error.is_some());
    }

    #[tokio::test]
    async fn test_no_response_is_an_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = PipelineOrchestrator::new(vec![stage("a", &calls, false, false)]);
        let err = pipeline.execute(ExecutionRequest::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::NoResponse));
    }
}
