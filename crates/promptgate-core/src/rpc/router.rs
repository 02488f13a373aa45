//! JSON-RPC 2.0 dispatcher over a shared [`PromptEngine`].
//!
//! Free of any transport so the CLI (stdio) and embedders can share it.

use std::sync::Arc;

use serde::Serialize;

use super::error::RpcError;
use super::methods;
use super::types::*;
use crate::engine::PromptEngine;

const SERIALIZE_FAILURE: &str =
    r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Failed to serialize response"},"id":null}"#;

#[derive(Clone)]
pub struct RpcRouter {
    engine: Arc<PromptEngine>,
}

impl RpcRouter {
    pub fn new(engine: Arc<PromptEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<PromptEngine> {
        &self.engine
    }

    /// Handle a raw JSON string (single request or batch) and return the
    /// serialized response.
    pub async fn handle_request(&self, raw: &str) -> String {
        if let Ok(batch) = serde_json::from_str::<Vec<JsonRpcRequest>>(raw) {
            let mut responses = Vec::with_capacity(batch.len());
            for req in batch {
                responses.push(self.dispatch(req).await);
            }
            return serde_json::to_string(&responses).unwrap_or_else(|_| SERIALIZE_FAILURE.into());
        }

        let request: JsonRpcRequest = match serde_json::from_str(raw) {
            Ok(req) => req,
            Err(e) => {
                return serde_json::to_string(&JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
                .unwrap_or_else(|_| SERIALIZE_FAILURE.into());
            }
        };

        let response = self.dispatch(request).await;
        serde_json::to_string(&response).unwrap_or_else(|_| SERIALIZE_FAILURE.into())
    }

    pub async fn handle_value(&self, value: serde_json::Value) -> serde_json::Value {
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(req) => req,
            Err(e) => {
                return serde_json::to_value(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Invalid request: {}", e),
                ))
                .unwrap_or_default();
            }
        };
        let response = self.dispatch(request).await;
        serde_json::to_value(response).unwrap_or_default()
    }

    pub async fn dispatch(&self, mut req: JsonRpcRequest) -> JsonRpcResponse {
        if !req.has_supported_version() {
            return JsonRpcResponse::error(
                req.id,
                INVALID_REQUEST,
                "Invalid JSON-RPC version, expected \"2.0\"",
            );
        }

        let id = req.id.clone();
        let params = req.params_or_empty();

        match self.route(&req.method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => err.to_response(id),
        }
    }

    async fn route(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let engine = self.engine.as_ref();
        match method {
            "prompt_engine" => to_json(methods::engine::execute(engine, parse_params(params)?).await?),

            // ----- Sessions -----
            "sessions.list" => to_json(methods::sessions::list(engine, parse_params(params)?).await?),
            "sessions.get" => to_json(methods::sessions::get(engine, parse_params(params)?).await?),
            "sessions.clear" => to_json(methods::sessions::clear(engine, parse_params(params)?).await?),

            // ----- Gates -----
            "gates.list" => to_json(methods::gates::list(engine, parse_params(params)?).await?),
            "gates.resolve" => to_json(methods::gates::resolve(engine, parse_params(params)?).await?),

            // ----- Injection -----
            "injection.setOverride" => {
                to_json(methods::injection::set_override(engine, parse_params(params)?).await?)
            }
            "injection.clearOverrides" => {
                to_json(methods::injection::clear_overrides(engine, parse_params(params)?).await?)
            }
            "injection.inspect" => to_json(methods::injection::inspect(engine, parse_params(params)?).await?),

            _ => Err(RpcError::MethodNotFound(method.to_string())),
        }
    }

    pub fn method_list(&self) -> Vec<&'static str> {
        vec![
            "prompt_engine",
            "sessions.list",
            "sessions.get",
            "sessions.clear",
            "gates.list",
            "gates.resolve",
            "injection.setOverride",
            "injection.clearOverrides",
            "injection.inspect",
        ]
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value, RpcError> {
    Ok(serde_json::to_value(value)?)
}
