//! Integration tests for the promptgate-cli commands.
//!
//! These drive the same code paths as the binary against a throwaway
//! state directory with prompt and gate files written on the fly.

use std::path::Path;

use promptgate_cli::commands::exec::{build_params, response_text, ExecArgs};
use promptgate_cli::commands::{call_method, init_engine, into_result, serve, EngineOptions};
use promptgate_core::rpc::RpcRouter;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
    }
    std::fs::write(path, content).expect("Failed to write fixture");
}

/// Prompt and gate fixtures plus an options block pointing at them.
fn fixture() -> (TempDir, EngineOptions) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let root = dir.path();

    write(
        &root.join("prompts/analyze.yaml"),
        r#"id: analyze
name: Analyze
template: "Analyze {{topic}}"
arguments:
  - name: topic
    required: true
"#,
    );
    write(
        &root.join("prompts/summarize.yaml"),
        r#"id: summarize
name: Summarize
template: "Summarize: {{previous_step_output}}"
"#,
    );
    write(
        &root.join("gates/code-quality.yaml"),
        r#"id: code-quality
name: Code Quality
guidance: Close with a summary section
pass_criteria:
  - "contains:## Summary"
"#,
    );

    let options = EngineOptions {
        config: None,
        state_dir: Some(root.join("state")),
        prompts_dir: Some(root.join("prompts")),
        gates_dir: Some(root.join("gates")),
    };
    (dir, options)
}

async fn router(options: &EngineOptions) -> RpcRouter {
    RpcRouter::new(init_engine(options).await.expect("Failed to initialize engine"))
}

async fn exec(router: &RpcRouter, args: ExecArgs) -> serde_json::Value {
    let params = build_params(&args).expect("Invalid exec args");
    into_result(call_method(router, "prompt_engine", params).await).expect("Expected result")
}

#[tokio::test]
async fn test_exec_chain_round_trip() {
    let (_dir, options) = fixture();
    let router = router(&options).await;

    let result = exec(
        &router,
        ExecArgs {
            command: Some(">>analyze topic=lifetimes --> >>summarize".to_string()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(result["isError"], false);
    assert!(response_text(&result).contains("Analyze lifetimes"));
    let session = &result["structuredContent"]["session"];
    assert_eq!(session["currentStep"], 1);
    assert_eq!(session["totalSteps"], 2);
    let session_id = session["sessionId"].as_str().unwrap().to_string();

    let result = exec(
        &router,
        ExecArgs {
            session_id: Some(session_id),
            user_response: Some("Borrowing rules explained".to_string()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(result["structuredContent"]["status"], "rendered");
    assert!(response_text(&result).contains("Summarize: Borrowing rules explained"));
}

#[tokio::test]
async fn test_exec_missing_argument_is_rejected() {
    let (_dir, options) = fixture();
    let router = router(&options).await;

    let result = exec(
        &router,
        ExecArgs {
            command: Some(">>analyze".to_string()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(result["isError"], true);
    assert_eq!(result["structuredContent"]["status"], "rejected");
    assert!(response_text(&result).contains("topic"));
}

#[tokio::test]
async fn test_exec_options_fill_arguments() {
    let (_dir, options) = fixture();
    let router = router(&options).await;

    let result = exec(
        &router,
        ExecArgs {
            command: Some(">>analyze".to_string()),
            options: vec!["topic=async traits".to_string()],
            ..Default::default()
        },
    )
    .await;
    assert_eq!(result["isError"], false);
    assert!(response_text(&result).contains("Analyze async traits"));
}

#[tokio::test]
async fn test_gates_list_and_resolve() {
    let (_dir, options) = fixture();
    let router = router(&options).await;

    let result = into_result(call_method(&router, "gates.list", serde_json::json!({})).await)
        .expect("Expected result");
    let canonical = result["canonical"].as_array().expect("Expected canonical array");
    assert_eq!(canonical.len(), 1);
    assert_eq!(canonical[0]["id"], "code-quality");

    let result = into_result(
        call_method(
            &router,
            "gates.resolve",
            serde_json::json!({ "reference": "code-quality" }),
        )
        .await,
    )
    .expect("Expected result");
    assert_eq!(result["kind"], "registered");

    let result = into_result(
        call_method(
            &router,
            "gates.resolve",
            serde_json::json!({ "reference": "code-qualty" }),
        )
        .await,
    )
    .expect("Expected result");
    assert_eq!(result["kind"], "inline");
    assert_eq!(result["suggestions"][0], "code-quality");
}

#[tokio::test]
async fn test_sessions_list_get_clear() {
    let (_dir, options) = fixture();
    let router = router(&options).await;

    let result = exec(
        &router,
        ExecArgs {
            command: Some(">>analyze topic=a --> >>summarize".to_string()),
            ..Default::default()
        },
    )
    .await;
    let session_id = result["structuredContent"]["session"]["sessionId"]
        .as_str()
        .unwrap()
        .to_string();

    let list = into_result(call_method(&router, "sessions.list", serde_json::json!({})).await)
        .expect("Expected result");
    assert_eq!(list["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(list["sessions"][0]["sessionId"], session_id.as_str());

    let session = into_result(
        call_method(
            &router,
            "sessions.get",
            serde_json::json!({ "sessionId": session_id }),
        )
        .await,
    )
    .expect("Expected result");
    assert_eq!(session["currentStep"], 1);

    let cleared = into_result(
        call_method(&router, "sessions.clear", serde_json::json!({ "all": true })).await,
    )
    .expect("Expected result");
    assert_eq!(cleared["cleared"], 1);

    let missing = into_result(
        call_method(
            &router,
            "sessions.get",
            serde_json::json!({ "sessionId": session_id }),
        )
        .await,
    );
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_sessions_survive_restart_when_persisted() {
    let (dir, mut options) = fixture();
    let config_path = dir.path().join("promptgate.yaml");
    write(&config_path, "persistence:\n  enabled: true\n");
    options.config = Some(config_path);

    let session_id = {
        let router = router(&options).await;
        let result = exec(
            &router,
            ExecArgs {
                command: Some(">>analyze topic=a --> >>summarize".to_string()),
                ..Default::default()
            },
        )
        .await;
        result["structuredContent"]["session"]["sessionId"]
            .as_str()
            .unwrap()
            .to_string()
    };

    let router = router(&options).await;
    let list = into_result(call_method(&router, "sessions.list", serde_json::json!({})).await)
        .expect("Expected result");
    assert_eq!(list["sessions"][0]["sessionId"], session_id.as_str());
}

#[tokio::test]
async fn test_serve_answers_each_line() {
    let (_dir, options) = fixture();
    let router = router(&options).await;

    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"sessions.list"}"#,
        "\n\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"nope"}"#,
        "\n",
        "not json\n",
    );
    let mut output: Vec<u8> = Vec::new();
    let handled = serve::serve_lines(&router, input.as_bytes(), &mut output)
        .await
        .expect("serve failed");
    assert_eq!(handled, 3);

    let text = String::from_utf8(output).unwrap();
    let responses: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).expect("response is JSON"))
        .collect();
    assert_eq!(responses.len(), 3);
    assert!(responses[0]["result"]["sessions"].is_array());
    assert_eq!(responses[1]["error"]["code"], -32601);
    assert_eq!(responses[2]["error"]["code"], -32700);
}

#[tokio::test]
async fn test_rpc_unknown_method_is_error() {
    let (_dir, options) = fixture();
    let router = router(&options).await;

    let response = call_method(&router, "does.not.exist", serde_json::json!({})).await;
    let err = into_result(response).unwrap_err();
    assert!(err.contains("does.not.exist"));
}
