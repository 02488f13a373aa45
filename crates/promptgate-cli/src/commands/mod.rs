//! CLI command implementations.
//!
//! Every command goes through the same `RpcRouter` the stdio server
//! exposes, so the CLI and remote clients see identical results.

pub mod exec;
pub mod gates;
pub mod rpc;
pub mod serve;
pub mod sessions;

use std::path::PathBuf;
use std::sync::Arc;

use promptgate_core::rpc::RpcRouter;
use promptgate_core::{EngineConfig, PromptEngine};

/// Where the engine reads its configuration and content from.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub gates_dir: Option<PathBuf>,
}

impl EngineOptions {
    /// Load the config file (or defaults) and apply command-line overrides.
    pub fn resolve(&self) -> Result<EngineConfig, String> {
        let mut config = EngineConfig::load(self.config.as_deref())
            .map_err(|e| format!("Failed to load config: {}", e))?;
        if let Some(dir) = &self.state_dir {
            config.state_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.prompts_dir {
            config.prompts_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.gates_dir {
            config.gates_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

/// Build the engine and restore persisted sessions.
pub async fn init_engine(options: &EngineOptions) -> Result<Arc<PromptEngine>, String> {
    let config = options.resolve()?;
    let engine = PromptEngine::from_config(config)
        .map_err(|e| format!("Failed to initialize engine: {}", e))?;
    engine
        .restore()
        .await
        .map_err(|e| format!("Failed to restore sessions: {}", e))?;
    Ok(Arc::new(engine))
}

/// Invoke one RPC method and return the raw JSON-RPC response.
pub async fn call_method(
    router: &RpcRouter,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    router
        .handle_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        }))
        .await
}

/// Split a JSON-RPC response into its result or a printable error.
pub fn into_result(response: serde_json::Value) -> Result<serde_json::Value, String> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(message.to_string());
    }
    Ok(response
        .get("result")
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
