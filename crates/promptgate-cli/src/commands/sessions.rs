//! `promptgate sessions`: Chain session administration.

use promptgate_core::rpc::RpcRouter;

use super::{call_method, into_result, print_json};

pub async fn list(router: &RpcRouter, active_only: bool) -> Result<(), String> {
    let result = into_result(
        call_method(
            router,
            "sessions.list",
            serde_json::json!({ "includeComplete": !active_only }),
        )
        .await,
    )?;
    print_json(&result);
    Ok(())
}

pub async fn get(router: &RpcRouter, session_id: &str) -> Result<(), String> {
    let result = into_result(
        call_method(
            router,
            "sessions.get",
            serde_json::json!({ "sessionId": session_id }),
        )
        .await,
    )?;
    print_json(&result);
    Ok(())
}

pub async fn clear(router: &RpcRouter, session_id: Option<&str>, all: bool) -> Result<(), String> {
    let params = match session_id {
        Some(id) => serde_json::json!({ "sessionId": id }),
        None => serde_json::json!({ "all": all }),
    };
    let result = into_result(call_method(router, "sessions.clear", params).await)?;
    print_json(&result);
    Ok(())
}
