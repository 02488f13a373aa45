//! RPC methods for runtime injection control.
//!
//! Methods:
//! - `injection.setOverride`   : add an override (session, chain or step scope)
//! - `injection.clearOverrides`: drop overrides, all or one type
//! - `injection.inspect`       : resolved decisions for a hypothetical step

use serde::{Deserialize, Serialize};

use crate::engine::PromptEngine;
use crate::injection::{InjectionDecision, InjectionScope, InjectionType, OverrideScope, RuntimeOverride};
use crate::rpc::error::RpcError;

// ---------------------------------------------------------------------------
// injection.setOverride
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOverrideResult {
    #[serde(rename = "override")]
    pub entry: RuntimeOverride,
    pub active_overrides: usize,
}

pub async fn set_override(
    engine: &PromptEngine,
    params: RuntimeOverride,
) -> Result<SetOverrideResult, RpcError> {
    let needs_scope_id = params.scope != OverrideScope::Session;
    if needs_scope_id && params.scope_id.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err(RpcError::InvalidParams(
            "Chain and step overrides need a `scopeId`".to_string(),
        ));
    }
    let overrides = &engine.state().overrides;
    overrides.set(params.clone());
    tracing::info!(
        "[RPC] Injection override {} -> {} ({:?})",
        params.injection_type,
        params.enabled,
        params.scope
    );
    Ok(SetOverrideResult {
        entry: params,
        active_overrides: overrides.list().len(),
    })
}

// ---------------------------------------------------------------------------
// injection.clearOverrides
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClearParams {
    pub injection_type: Option<InjectionType>,
}

#[derive(Debug, Serialize)]
pub struct ClearResult {
    pub cleared: usize,
}

pub async fn clear_overrides(engine: &PromptEngine, params: ClearParams) -> Result<ClearResult, RpcError> {
    let cleared = engine.state().overrides.clear(params.injection_type);
    Ok(ClearResult { cleared })
}

// ---------------------------------------------------------------------------
// injection.inspect
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct InspectResult {
    pub scope: InjectionScope,
    pub decisions: Vec<InspectedDecision>,
    pub overrides: Vec<RuntimeOverride>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectedDecision {
    #[serde(flatten)]
    pub decision: InjectionDecision,
    /// Whether the injection fires for the inspected step.
    pub injects: bool,
}

pub async fn inspect(engine: &PromptEngine, scope: InjectionScope) -> Result<InspectResult, RpcError> {
    let state = engine.state();
    let is_chain = scope.total_steps > 1 || scope.chain_name.is_some();
    let decisions = state
        .injection
        .resolve_all(&scope)
        .into_iter()
        .map(|decision| InspectedDecision {
            injects: decision.should_inject(is_chain, scope.step_number),
            decision,
        })
        .collect();
    Ok(InspectResult {
        scope,
        decisions,
        overrides: state.overrides.list(),
    })
}
