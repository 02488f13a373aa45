//! `promptgate gates`: Inspect canonical and temporary gates.

use promptgate_core::rpc::RpcRouter;

use super::{call_method, into_result, print_json};

pub async fn list(router: &RpcRouter, scope_id: Option<&str>) -> Result<(), String> {
    let params = match scope_id {
        Some(id) => serde_json::json!({ "scopeId": id }),
        None => serde_json::json!({}),
    };
    let result = into_result(call_method(router, "gates.list", params).await)?;
    print_json(&result);
    Ok(())
}

pub async fn resolve(router: &RpcRouter, reference: &str) -> Result<(), String> {
    let result = into_result(
        call_method(
            router,
            "gates.resolve",
            serde_json::json!({ "reference": reference }),
        )
        .await,
    )?;
    print_json(&result);
    Ok(())
}
