//! Tool response shape returned to the LLM client.

use serde::{Deserialize, Serialize};

/// A single text content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Coarse outcome of a pipeline pass, mirrored in the structured payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Rendered,
    ChainComplete,
    AlreadyComplete,
    BounceBack,
    Escalation,
    ReviewPending,
    Aborted,
    Rejected,
    Failed,
}

/// Result of evaluating one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate_id: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_criteria: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateValidationPayload {
    pub passed: bool,
    pub retry_required: bool,
    pub gate_results: Vec<GateResult>,
    pub failed_gates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_hints: Vec<String>,
}

impl GateValidationPayload {
    pub fn from_results(results: Vec<GateResult>, retry_required: bool) -> Self {
        let failed_gates: Vec<String> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.gate_id.clone())
            .collect();
        let retry_hints = results.iter().filter_map(|r| r.hint.clone()).collect();
        Self {
            passed: failed_gates.is_empty(),
            retry_required,
            gate_results: results,
            failed_gates,
            retry_hints,
        }
    }
}

/// Session/footer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFooter {
    pub session_id: String,
    pub chain_id: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub next_action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationPayload {
    pub gate_id: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPayload {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_validation: Option<GateValidationPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationPayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl StructuredPayload {
    pub fn new(status: ResponseStatus) -> Self {
        Self {
            status,
            gate_validation: None,
            session: None,
            escalation: None,
            suggestions: Vec::new(),
        }
    }
}

/// Response body returned for one `prompt_engine` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub content: Vec<TextContent>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<StructuredPayload>,
}

impl ToolResponse {
    pub fn text(text: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            content: vec![TextContent::new(text)],
            is_error: false,
            structured_content: Some(StructuredPayload::new(status)),
        }
    }

    /// A user-input rejection (conflict, unknown reference). Not a fault.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent::new(message)],
            is_error: true,
            structured_content: Some(StructuredPayload::new(ResponseStatus::Rejected)),
        }
    }

    /// Generic execution failure surfaced at the top level.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent::new(message)],
            is_error: true,
            structured_content: Some(StructuredPayload::new(ResponseStatus::Failed)),
        }
    }

    pub fn with_payload(mut self, f: impl FnOnce(&mut StructuredPayload)) -> Self {
        if let Some(payload) = self.structured_content.as_mut() {
            f(payload);
        }
        self
    }

    /// All text blocks joined with blank lines.
    pub fn text_body(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn status(&self) -> Option<ResponseStatus> {
        self.structured_content.as_ref().map(|p| p.status)
    }

    pub fn payload(&self) -> Option<&StructuredPayload> {
        self.structured_content.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_payload_from_results() {
        let payload = GateValidationPayload::from_results(
            vec![
                GateResult {
                    gate_id: "a".to_string(),
                    passed: true,
                    failed_criteria: vec![],
                    hint: None,
                },
                GateResult {
                    gate_id: "b".to_string(),
                    passed: false,
                    failed_criteria: vec!["min_words:50".to_string()],
                    hint: Some("Write at least 50 words".to_string()),
                },
            ],
            true,
        );
        assert!(!payload.passed);
        assert!(payload.retry_required);
        assert_eq!(payload.failed_gates, vec!["b".to_string()]);
        assert_eq!(payload.retry_hints.len(), 1);
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let response = ToolResponse::text("hi", ResponseStatus::BounceBack).with_payload(|p| {
            p.gate_validation = Some(GateValidationPayload::from_results(vec![], true));
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["structuredContent"]["status"], "bounce_back");
        assert_eq!(
            value["structuredContent"]["gateValidation"]["retryRequired"],
            true
        );
        assert_eq!(value["content"][0]["type"], "text");
    }
}
