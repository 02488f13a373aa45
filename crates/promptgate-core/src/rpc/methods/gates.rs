//! RPC methods for gate inspection.
//!
//! Methods:
//! - `gates.list`   : canonical gates plus live temporary gates
//! - `gates.resolve`: classify a reference as registered, temporary or inline

use serde::{Deserialize, Serialize};

use crate::engine::PromptEngine;
use crate::gates::{GateReference, TemporaryGate};
use crate::models::GateDefinition;
use crate::rpc::error::RpcError;

// ---------------------------------------------------------------------------
// gates.list
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListParams {
    /// Only temporaries bound to this scope id.
    pub scope_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResult {
    pub canonical: Vec<GateDefinition>,
    pub temporary: Vec<TemporaryGate>,
}

pub async fn list(engine: &PromptEngine, params: ListParams) -> Result<ListResult, RpcError> {
    let registry = &engine.state().gate_registry;
    let canonical = registry
        .canonical_ids()
        .iter()
        .filter_map(|id| registry.canonical(id))
        .collect();
    let temporary = match params.scope_id.as_deref() {
        Some(scope_id) => registry.temporaries_for_scope(scope_id),
        None => registry.list_temporary(),
    };
    Ok(ListResult {
        canonical,
        temporary,
    })
}

// ---------------------------------------------------------------------------
// gates.resolve
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveParams {
    pub reference: String,
}

pub async fn resolve(engine: &PromptEngine, params: ResolveParams) -> Result<GateReference, RpcError> {
    if params.reference.trim().is_empty() {
        return Err(RpcError::InvalidParams("`reference` must not be empty".to_string()));
    }
    Ok(engine.state().gate_resolver.resolve(&params.reference))
}
