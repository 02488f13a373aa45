//! Mechanical pass-criteria checks.
//!
//! Criteria with a known prefix are evaluated directly against a step's
//! captured output. Anything else is free text that needs a verdict.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{GateDefinition, GateResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    Contains(String),
    NotContains(String),
    Regex(String),
    MinLength(usize),
    MaxLength(usize),
    MinWords(usize),
    /// Needs a human or LLM verdict.
    Manual(String),
}

impl Criterion {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let Some((prefix, value)) = raw.split_once(':') else {
            return Criterion::Manual(raw.to_string());
        };
        let value = value.trim();
        let number = || value.parse::<usize>().ok();

        match prefix.trim().to_lowercase().as_str() {
            "contains" if !value.is_empty() => Criterion::Contains(value.to_string()),
            "not_contains" if !value.is_empty() => Criterion::NotContains(value.to_string()),
            "regex" if !value.is_empty() => Criterion::Regex(value.to_string()),
            "min_length" => number().map(Criterion::MinLength).unwrap_or_else(|| Criterion::Manual(raw.to_string())),
            "max_length" => number().map(Criterion::MaxLength).unwrap_or_else(|| Criterion::Manual(raw.to_string())),
            "min_words" => number().map(Criterion::MinWords).unwrap_or_else(|| Criterion::Manual(raw.to_string())),
            _ => Criterion::Manual(raw.to_string()),
        }
    }

    pub fn is_mechanical(&self) -> bool {
        !matches!(self, Criterion::Manual(_))
    }

    /// `Some(None)` on pass, `Some(Some(hint))` on failure, `None` when a
    /// verdict is required.
    pub fn check(&self, output: &str) -> Option<Option<String>> {
        let failed = |hint: String| Some(Some(hint));
        match self {
            Criterion::Contains(text) => {
                if output.to_lowercase().contains(&text.to_lowercase()) {
                    Some(None)
                } else {
                    failed(format!("Include \"{}\"", text))
                }
            }
            Criterion::NotContains(text) => {
                if output.to_lowercase().contains(&text.to_lowercase()) {
                    failed(format!("Remove \"{}\"", text))
                } else {
                    Some(None)
                }
            }
            Criterion::Regex(pattern) => match Regex::new(pattern) {
                Ok(re) if re.is_match(output) => Some(None),
                Ok(_) => failed(format!("Output must match /{}/", pattern)),
                Err(e) => failed(format!("Invalid pattern /{}/: {}", pattern, e)),
            },
            Criterion::MinLength(n) => {
                let len = output.trim().chars().count();
                if len >= *n {
                    Some(None)
                } else {
                    failed(format!("Write at least {} characters (got {})", n, len))
                }
            }
            Criterion::MaxLength(n) => {
                let len = output.trim().chars().count();
                if len <= *n {
                    Some(None)
                } else {
                    failed(format!("Keep it under {} characters (got {})", n, len))
                }
            }
            Criterion::MinWords(n) => {
                let words = output.split_whitespace().count();
                if words >= *n {
                    Some(None)
                } else {
                    failed(format!("Write at least {} words (got {})", n, words))
                }
            }
            Criterion::Manual(_) => None,
        }
    }
}

/// Outcome of checking one gate against captured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateEvaluation {
    pub gate_id: String,
    pub failed_criteria: Vec<String>,
    pub hints: Vec<String>,
    /// Free-text criteria that still need a verdict.
    pub manual_criteria: Vec<String>,
}

impl GateEvaluation {
    pub fn mechanically_failed(&self) -> bool {
        !self.failed_criteria.is_empty()
    }

    pub fn needs_verdict(&self) -> bool {
        self.failed_criteria.is_empty() && !self.manual_criteria.is_empty()
    }

    pub fn to_result(&self) -> GateResult {
        GateResult {
            gate_id: self.gate_id.clone(),
            passed: self.failed_criteria.is_empty(),
            failed_criteria: self.failed_criteria.clone(),
            hint: (!self.hints.is_empty()).then(|| self.hints.join("; ")),
        }
    }
}

pub fn evaluate_gate(gate: &GateDefinition, output: &str) -> GateEvaluation {
    let mut evaluation = GateEvaluation {
        gate_id: gate.id.clone(),
        failed_criteria: Vec::new(),
        hints: Vec::new(),
        manual_criteria: Vec::new(),
    };

    for raw in &gate.pass_criteria {
        match Criterion::parse(raw).check(output) {
            Some(None) => {}
            Some(Some(hint)) => {
                evaluation.failed_criteria.push(raw.clone());
                evaluation.hints.push(hint);
            }
            None => evaluation.manual_criteria.push(raw.clone()),
        }
    }
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefixes() {
        assert_eq!(Criterion::parse("contains:## Summary"), Criterion::Contains("## Summary".into()));
        assert_eq!(Criterion::parse("min_words: 50"), Criterion::MinWords(50));
        assert_eq!(
            Criterion::parse("min_words:lots"),
            Criterion::Manual("min_words:lots".into())
        );
        assert_eq!(
            Criterion::parse("Note: mention tests"),
            Criterion::Manual("Note: mention tests".into())
        );
        assert!(!Criterion::parse("Mentions error handling").is_mechanical());
    }

    #[test]
    fn test_checks() {
        assert_eq!(Criterion::Contains("rust".into()).check("I like Rust"), Some(None));
        assert!(Criterion::NotContains("todo".into()).check("TODO later").unwrap().is_some());
        assert_eq!(Criterion::Regex(r"^\d+$".into()).check("123"), Some(None));
        assert!(Criterion::MaxLength(3).check("abcd").unwrap().is_some());
        assert!(Criterion::MinWords(3).check("one two").unwrap().is_some());
        assert_eq!(Criterion::Manual("x".into()).check("y"), None);
    }

    #[test]
    fn test_evaluate_gate() {
        let gate = GateDefinition::new("g", "G").with_criteria(&[
            "contains:summary",
            "min_words:5",
            "Explains trade-offs",
        ]);

        let eval = evaluate_gate(&gate, "too short");
        assert!(eval.mechanically_failed());
        assert_eq!(eval.failed_criteria.len(), 2);
        assert!(!eval.to_result().passed);

        let eval = evaluate_gate(&gate, "A summary with more than five words here.");
        assert!(!eval.mechanically_failed());
        assert!(eval.needs_verdict());
        assert!(eval.to_result().passed);
    }
}
