use async_trait::async_trait;

use super::support::{next_render_step, step_scope_id};
use crate::error::EngineError;
use crate::gates::GateReference;
use crate::models::{
    CustomCheck, GateDefinition, GateScope, GateSource, TemporaryGateInput,
};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::stage::PipelineStage;
use crate::state::EngineState;

/// Request-level gates: `quality_gates`, `custom_checks`, `temporary_gates`.
///
/// Reads: `request`, `parsed`, `session`.
/// Writes: `gates.{mode, scope, gate_ids, temporary_ids, suggestions}`,
/// `session.session.gate_ids`.
///
/// Gates registered with a scope that outlives this pass are remembered on
/// the session so continuations keep applying them.
pub struct GateExtractionStage {
    state: EngineState,
}

impl GateExtractionStage {
    pub fn new(state: EngineState) -> Self {
        Self { state }
    }

    fn scope_id(ctx: &ExecutionContext, scope: GateScope) -> String {
        let Some(session) = ctx.session.session.as_ref() else {
            return ctx.execution_id.clone();
        };
        match scope {
            GateScope::Execution => ctx.execution_id.clone(),
            GateScope::Session => session.session_id.clone(),
            GateScope::Chain => session.chain_id.clone(),
            GateScope::Step => step_scope_id(
                &session.session_id,
                next_render_step(session, ctx.session.is_new),
            ),
        }
    }

    fn register(&self, ctx: &mut ExecutionContext, definition: GateDefinition, scope: GateScope) -> String {
        let scope_id = Self::scope_id(ctx, scope);
        let id = self
            .state
            .gate_registry
            .register_temporary(definition, scope, &scope_id);
        ctx.gates.temporary_ids.push(id.clone());
        id
    }
}

fn from_input(input: &TemporaryGateInput) -> GateDefinition {
    let mut definition = GateDefinition::new(
        input.id.clone().unwrap_or_default(),
        input.name.clone(),
    );
    definition.gate_type = input.gate_type;
    definition.description = input.description.clone();
    definition.guidance = input.guidance.clone();
    definition.pass_criteria = input
        .pass_criteria
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    definition.expires_at = input.expires_at;
    definition
}

fn from_custom_check(check: &CustomCheck) -> GateDefinition {
    let mut definition = GateDefinition::new(String::new(), check.name.trim());
    definition.description = check.description.clone();
    definition.guidance = check.description.clone();
    if !check.description.trim().is_empty() {
        definition.pass_criteria = vec![check.description.trim().to_string()];
    }
    definition
}

/// Free-text criteria become a temporary gate named after the text, so
/// resolving the same text again finds it.
pub(crate) fn from_inline(criteria: &str) -> GateDefinition {
    let mut definition = GateDefinition::new(String::new(), criteria);
    definition.pass_criteria = vec![criteria.to_string()];
    definition.source = GateSource::Automatic;
    definition
}

pub(crate) fn suggestion_note(reference: &str, suggestions: &[String]) -> String {
    format!(
        "Gate `{}` is not a registered gate and was applied as inline criteria. Did you mean: {}?",
        reference,
        suggestions.join(", ")
    )
}

#[async_trait]
impl PipelineStage for GateExtractionStage {
    fn name(&self) -> &'static str {
        "gate_extraction"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let request = ctx.request().clone();
        let blueprint_mode = ctx
            .session
            .session
            .as_ref()
            .and_then(|s| s.blueprint.gate_mode);
        let parsed_mode = ctx.parsed.as_ref().and_then(|p| p.gate_mode);
        let has_session = ctx.session.session.is_some();

        ctx.gates.mode = request
            .gate_mode
            .or(parsed_mode)
            .or(blueprint_mode)
            .unwrap_or(self.state.config.gates.default_mode);
        // Without a session nothing outlives the pass.
        ctx.gates.scope = match (request.gate_scope, has_session) {
            (_, false) => GateScope::Execution,
            (Some(scope), true) => scope,
            (None, true) => GateScope::Session,
        };
        let default_scope = ctx.gates.scope;

        let mut ids: Vec<(String, GateScope)> = Vec::new();

        for input in &request.temporary_gates {
            let scope = if has_session {
                input.scope.unwrap_or(default_scope)
            } else {
                GateScope::Execution
            };
            let id = self.register(ctx, from_input(input), scope);
            ids.push((id, scope));
        }

        for check in &request.custom_checks {
            let id = self.register(ctx, from_custom_check(check), default_scope);
            ids.push((id, default_scope));
        }

        for reference in &request.quality_gates {
            match self.state.gate_resolver.resolve(reference) {
                GateReference::Registered { gate_id } => ids.push((gate_id, GateScope::Session)),
                GateReference::Temporary { gate_id } => ids.push((gate_id, default_scope)),
                GateReference::Inline {
                    criteria,
                    suggestions,
                } => {
                    if !suggestions.is_empty() {
                        ctx.gates.suggestions.push(suggestion_note(&criteria, &suggestions));
                    }
                    let id = self.register(ctx, from_inline(&criteria), default_scope);
                    ids.push((id, default_scope));
                }
            }
        }

        let mut gate_ids: Vec<String> = Vec::new();
        if let Some(session) = ctx.session.session.as_mut() {
            for (id, scope) in &ids {
                if *scope != GateScope::Execution && !session.gate_ids.contains(id) {
                    session.gate_ids.push(id.clone());
                }
            }
            gate_ids.extend(session.gate_ids.iter().cloned());
        }
        for (id, _) in ids {
            if !gate_ids.contains(&id) {
                gate_ids.push(id);
            }
        }

        let registry = &self.state.gate_registry;
        gate_ids.retain(|id| registry.get(id).is_some());

        if !gate_ids.is_empty() {
            tracing::debug!(
                "[GateExtraction] {} request gate(s), mode {:?}, scope {}",
                gate_ids.len(),
                ctx.gates.mode,
                ctx.gates.scope
            );
        }
        ctx.gates.gate_ids = gate_ids;
        Ok(())
    }
}
