//! `promptgate rpc`: Raw JSON-RPC invocation.

use promptgate_core::rpc::RpcRouter;

use super::{call_method, print_json};

pub async fn call(router: &RpcRouter, method: &str, params_str: &str) -> Result<(), String> {
    let params: serde_json::Value =
        serde_json::from_str(params_str).map_err(|e| format!("Invalid JSON params: {}", e))?;

    let response = call_method(router, method, params).await;
    print_json(&response);
    Ok(())
}
