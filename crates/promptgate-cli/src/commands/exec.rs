//! `promptgate exec`: run one `prompt_engine` request.

use promptgate_core::rpc::RpcRouter;

use super::{call_method, into_result, print_json};

/// Fields of a single request as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ExecArgs {
    pub command: Option<String>,
    pub session_id: Option<String>,
    pub chain_id: Option<String>,
    pub user_response: Option<String>,
    pub gate_verdict: Option<String>,
    pub gate_action: Option<String>,
    pub force_restart: bool,
    /// `key=value` pairs placed in `options`.
    pub options: Vec<String>,
    pub quality_gates: Vec<String>,
    pub gate_mode: Option<String>,
    /// Print the whole response instead of its text.
    pub json: bool,
}

/// Build the `prompt_engine` params object.
pub fn build_params(args: &ExecArgs) -> Result<serde_json::Value, String> {
    let mut options = serde_json::Map::new();
    for pair in &args.options {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid option '{}', expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid option '{}', key is empty", pair));
        }
        options.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }

    let mut params = serde_json::json!({
        "force_restart": args.force_restart,
        "options": options,
        "quality_gates": args.quality_gates,
    });
    let fields = [
        ("command", &args.command),
        ("session_id", &args.session_id),
        ("chain_id", &args.chain_id),
        ("user_response", &args.user_response),
        ("gate_verdict", &args.gate_verdict),
        ("gate_action", &args.gate_action),
        ("gate_mode", &args.gate_mode),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            params[name] = serde_json::Value::String(value.clone());
        }
    }
    Ok(params)
}

/// Concatenated text blocks of a serialized tool response.
pub fn response_text(result: &serde_json::Value) -> String {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default()
}

pub async fn run(router: &RpcRouter, args: &ExecArgs) -> Result<(), String> {
    let params = build_params(args)?;
    let result = into_result(call_method(router, "prompt_engine", params).await)?;

    if args.json {
        print_json(&result);
    } else {
        println!("{}", response_text(&result));
    }

    if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
        let status = result
            .pointer("/structuredContent/status")
            .and_then(|s| s.as_str())
            .unwrap_or("failed");
        return Err(format!("request ended with status '{}'", status));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_become_strings() {
        let args = ExecArgs {
            command: Some(">>analyze".to_string()),
            options: vec!["topic=rust".to_string(), "depth=2".to_string()],
            ..Default::default()
        };
        let params = build_params(&args).unwrap();
        assert_eq!(params["command"], ">>analyze");
        assert_eq!(params["options"]["topic"], "rust");
        assert_eq!(params["options"]["depth"], "2");
        assert!(params.get("session_id").is_none());
    }

    #[test]
    fn test_malformed_option_is_rejected() {
        let args = ExecArgs {
            options: vec!["no-equals".to_string()],
            ..Default::default()
        };
        assert!(build_params(&args).is_err());
    }

    #[test]
    fn test_response_text_joins_blocks() {
        let result = serde_json::json!({
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        });
        assert_eq!(response_text(&result), "a\n\nb");
    }
}
