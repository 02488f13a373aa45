//! RPC methods for chain session administration.
//!
//! Methods:
//! - `sessions.list` : summaries of every stored session
//! - `sessions.get`  : one session with step results and pending review
//! - `sessions.clear`: drop one session, or all of them

use serde::{Deserialize, Serialize};

use crate::chain::{ChainSession, SessionSummary};
use crate::engine::PromptEngine;
use crate::pipeline::stages::support::release_session_resources;
use crate::rpc::error::RpcError;

// ---------------------------------------------------------------------------
// sessions.list
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListParams {
    /// Include finished sessions.
    pub include_complete: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ListResult {
    pub sessions: Vec<SessionSummary>,
}

pub async fn list(engine: &PromptEngine, params: ListParams) -> Result<ListResult, RpcError> {
    let include_complete = params.include_complete.unwrap_or(true);
    let sessions = engine
        .state()
        .sessions
        .list()
        .await
        .into_iter()
        .filter(|s| include_complete || !s.complete)
        .collect();
    Ok(ListResult { sessions })
}

// ---------------------------------------------------------------------------
// sessions.get
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetParams {
    pub session_id: String,
}

pub async fn get(engine: &PromptEngine, params: GetParams) -> Result<ChainSession, RpcError> {
    engine
        .state()
        .sessions
        .get(&params.session_id)
        .await
        .ok_or_else(|| RpcError::NotFound(format!("Session {} not found", params.session_id)))
}

// ---------------------------------------------------------------------------
// sessions.clear
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClearParams {
    pub session_id: Option<String>,
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResult {
    pub cleared: usize,
}

pub async fn clear(engine: &PromptEngine, params: ClearParams) -> Result<ClearResult, RpcError> {
    let state = engine.state();
    let targets: Vec<ChainSession> = match (&params.session_id, params.all) {
        (Some(id), _) => match state.sessions.get(id).await {
            Some(session) => vec![session],
            None => return Err(RpcError::NotFound(format!("Session {} not found", id))),
        },
        (None, true) => {
            let mut all = Vec::new();
            for summary in state.sessions.list().await {
                if let Some(session) = state.sessions.get(&summary.session_id).await {
                    all.push(session);
                }
            }
            all
        }
        (None, false) => {
            return Err(RpcError::InvalidParams(
                "Pass `sessionId`, or `all: true` to clear every session".to_string(),
            ))
        }
    };

    let mut cleared = 0;
    for session in targets {
        let _guard = state.sessions.lock_chain(&session.chain_id).await;
        release_session_resources(state, &session).await?;
        if state.sessions.clear(&session.session_id).await? {
            cleared += 1;
        }
    }
    tracing::info!("[RPC] Cleared {} session(s)", cleared);
    Ok(ClearResult { cleared })
}
