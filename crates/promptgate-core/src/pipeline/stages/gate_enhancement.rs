use async_trait::async_trait;

use super::gate_extraction::{from_inline, suggestion_note};
use super::support::{render_step, step_scope_id};
use crate::error::EngineError;
use crate::gates::GateReference;
use crate::models::{GateScope, GateType};
use crate::pipeline::context::{ExecutionContext, GateGuidance};
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Adds the gates that belong to the step being rendered.
///
/// Reads: `plan`, `session`, `gates.gate_ids`.
/// Writes: `gates.{gate_ids, temporary_ids, suggestions, guidance,
/// review_pending}`.
///
/// Prompt-declared gates must name a registered gate. Inline `::` criteria
/// on the step become step-scoped temporary gates.
pub struct GateEnhancementStage {
    state: EngineState,
}

impl GateEnhancementStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PipelineStage for GateEnhancementStage {
    fn name(&self) -> &'static str {
        "gate_enhancement"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let Some((number, step, prompt)) = render_step(ctx, &self.state.prompts) else {
            return Ok(());
        };
        let mut gate_ids = ctx.gates.gate_ids.clone();

        for reference in &prompt.gates {
            match self.state.gate_resolver.resolve(reference) {
                GateReference::Registered { gate_id } | GateReference::Temporary { gate_id } => {
                    if !gate_ids.contains(&gate_id) {
                        gate_ids.push(gate_id);
                    }
                }
                GateReference::Inline { suggestions, .. } => {
                    tracing::warn!(
                        "[GateEnhancement] Prompt `{}` declares unknown gate `{}`",
                        prompt.id,
                        reference
                    );
                    if !suggestions.is_empty() {
                        ctx.gates.suggestions.push(format!(
                            "Prompt `{}` declares unknown gate `{}`. Did you mean: {}?",
                            prompt.id,
                            reference,
                            suggestions.join(", ")
                        ));
                    }
                }
            }
        }

        let (scope, scope_id) = match ctx.session.session.as_ref() {
            Some(session) => (GateScope::Step, step_scope_id(&session.session_id, number)),
            None => (GateScope::Execution, ctx.execution_id.clone()),
        };
        for reference in &step.inline_gates {
            let gate_id = match self.state.gate_resolver.resolve(reference) {
                GateReference::Registered { gate_id } | GateReference::Temporary { gate_id } => gate_id,
                GateReference::Inline {
                    criteria,
                    suggestions,
                } => {
                    if !suggestions.is_empty() {
                        ctx.gates.suggestions.push(suggestion_note(&criteria, &suggestions));
                    }
                    let id = self
                        .state
                        .gate_registry
                        .register_temporary(from_inline(&criteria), scope, &scope_id);
                    ctx.gates.temporary_ids.push(id.clone());
                    id
                }
            };
            if !gate_ids.contains(&gate_id) {
                gate_ids.push(gate_id);
            }
        }

        let mut guidance = Vec::new();
        let mut validating = false;
        for gate_id in &gate_ids {
            let Some(gate) = self.state.gate_registry.get(gate_id) else {
                continue;
            };
            if gate.gate_type == GateType::Validation && !gate.pass_criteria.is_empty() {
                validating = true;
            }
            guidance.push(GateGuidance {
                gate_id: gate.id.clone(),
                name: gate.display_name().to_string(),
                guidance: if gate.guidance.trim().is_empty() {
                    gate.description.clone()
                } else {
                    gate.guidance.clone()
                },
                criteria: gate.pass_criteria.clone(),
            });
        }

        ctx.gates.review_pending = ctx.session.session.is_some() && (validating || step.verify.is_some());
        tracing::debug!(
            "[GateEnhancement] Step {} (`{}`): {} gate(s), review pending: {}",
            number,
            prompt.id,
            gate_ids.len(),
            ctx.gates.review_pending
        );
        ctx.gates.gate_ids = gate_ids;
        ctx.gates.guidance = guidance;
        Ok(())
    }
}
