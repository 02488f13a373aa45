//! Command parser collaborator.
//!
//! The default grammar is small:
//!
//! ```text
//! [@FRAMEWORK] >>prompt_id args [:: "criteria" | :: gate_id | :: verify:"cmd" max:N timeout:S | :: mode:advise]
//!     [--> >>next_prompt args ...]
//! ```
//!
//! The pipeline only relies on the [`CommandParser`] contract; the grammar
//! itself can be swapped out.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::EngineError;
use crate::models::{GateMode, ParsedCommand, ParsedStep, VerifyDirective};

const CHAIN_SEPARATOR: &str = "-->";
const GATE_SEPARATOR: &str = "::";

pub trait CommandParser: Send + Sync {
    fn parse(&self, command: &str) -> Result<ParsedCommand, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct SymbolicCommandParser;

fn prompt_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:>>)?\s*([A-Za-z0-9_][A-Za-z0-9_\-]*)(?:\s+|$)")
            .unwrap_or_else(|e| panic!("invalid prompt id regex: {}", e))
    })
}

fn verify_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^verify\s*:\s*(?:"([^"]*)"|'([^']*)'|(\S+))(.*)$"#)
            .unwrap_or_else(|e| panic!("invalid verify regex: {}", e))
    })
}

fn option_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(max|timeout|cwd)\s*:\s*(?:"([^"]*)"|'([^']*)'|(\S+))"#)
            .unwrap_or_else(|e| panic!("invalid option regex: {}", e))
    })
}

/// Split on `delim` while ignoring delimiters inside single or double quotes.
fn split_outside_quotes<'a>(input: &'a str, delim: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut iter = input.char_indices().peekable();

    while let Some((idx, ch)) = iter.next() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if input[idx..].starts_with(delim) => {
                parts.push(&input[start..idx]);
                start = idx + delim.len();
                // skip the rest of the delimiter
                for _ in 1..delim.chars().count() {
                    iter.next();
                }
            }
            None => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn parse_verify(segment: &str) -> Result<Option<VerifyDirective>, EngineError> {
    let Some(caps) = verify_regex().captures(segment) else {
        return Ok(None);
    };
    let command = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    if command.is_empty() {
        return Err(EngineError::Parse("verify: requires a command".to_string()));
    }

    let mut directive = VerifyDirective {
        command,
        max_attempts: None,
        timeout_ms: None,
        working_dir: None,
    };

    let rest = caps.get(4).map(|m| m.as_str()).unwrap_or("");
    for opt in option_regex().captures_iter(rest) {
        let value = opt
            .get(2)
            .or_else(|| opt.get(3))
            .or_else(|| opt.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        match &opt[1] {
            "max" => {
                let n = value
                    .parse::<u32>()
                    .map_err(|_| EngineError::Parse(format!("Invalid verify max: {}", value)))?;
                directive.max_attempts = Some(n.max(1));
            }
            "timeout" => {
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| EngineError::Parse(format!("Invalid verify timeout: {}", value)))?;
                directive.timeout_ms = Some(secs * 1000);
            }
            "cwd" => directive.working_dir = Some(value),
            _ => {}
        }
    }
    Ok(Some(directive))
}

impl SymbolicCommandParser {
    fn parse_step(&self, text: &str, command: &mut ParsedCommand) -> Result<ParsedStep, EngineError> {
        let segments = split_outside_quotes(text, GATE_SEPARATOR);
        let head = segments.first().map(|s| s.trim()).unwrap_or("");

        let caps = prompt_id_regex()
            .captures(head)
            .ok_or_else(|| EngineError::Parse(format!("Expected a prompt id in '{}'", head)))?;
        let prompt_id = caps[1].to_string();
        let raw_args = head[caps[0].len()..].trim().to_string();
        let mut step = ParsedStep::new(prompt_id, raw_args);

        for segment in segments.iter().skip(1) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            if let Some(verify) = parse_verify(segment)? {
                step.verify = Some(verify);
                continue;
            }
            if let Some(mode) = segment.strip_prefix("mode:") {
                let mode = unquote(mode)
                    .parse::<GateMode>()
                    .map_err(EngineError::Parse)?;
                command.gate_mode = Some(mode);
                continue;
            }
            let criteria = unquote(segment);
            if !criteria.is_empty() {
                step.inline_gates.push(criteria.to_string());
            }
        }
        Ok(step)
    }
}

impl CommandParser for SymbolicCommandParser {
    fn parse(&self, command: &str) -> Result<ParsedCommand, EngineError> {
        let mut text = command.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidRequest("Command is empty".to_string()));
        }

        let mut parsed = ParsedCommand::default();
        if let Some(rest) = text.strip_prefix('@') {
            let end = rest
                .find(|c: char| c.is_whitespace())
                .unwrap_or(rest.len());
            let framework = &rest[..end];
            if framework.is_empty() {
                return Err(EngineError::Parse("Expected a framework name after '@'".to_string()));
            }
            parsed.framework = Some(framework.to_string());
            text = rest[end..].trim_start();
        }

        for part in split_outside_quotes(text, CHAIN_SEPARATOR) {
            let part = part.trim();
            if part.is_empty() {
                return Err(EngineError::Parse("Empty step in chain".to_string()));
            }
            let step = self.parse_step(part, &mut parsed)?;
            parsed.steps.push(step);
        }

        tracing::debug!(
            "[CommandParser] Parsed {} step(s), framework={:?}",
            parsed.steps.len(),
            parsed.framework
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_prompt() {
        let parsed = SymbolicCommandParser.parse(">>summarize text=\"a b\"").unwrap();
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].prompt_id, "summarize");
        assert_eq!(parsed.steps[0].raw_args, "text=\"a b\"");
        assert!(!parsed.is_chain());
    }

    #[test]
    fn test_parse_chain_with_framework_and_gates() {
        let parsed = SymbolicCommandParser
            .parse("@CAGEERF >>analyze topic=x --> >>review :: code-quality :: \"mentions tests\" --> summarize")
            .unwrap();
        assert_eq!(parsed.framework.as_deref(), Some("CAGEERF"));
        assert_eq!(parsed.steps.len(), 3);
        assert_eq!(
            parsed.steps[1].inline_gates,
            vec!["code-quality".to_string(), "mentions tests".to_string()]
        );
        assert_eq!(parsed.steps[2].prompt_id, "summarize");
    }

    #[test]
    fn test_separators_inside_quotes_are_literal() {
        let parsed = SymbolicCommandParser
            .parse(">>explain text=\"a --> b :: c\"")
            .unwrap();
        assert_eq!(parsed.steps.len(), 1);
        assert!(parsed.steps[0].inline_gates.is_empty());
    }

    #[test]
    fn test_parse_verify_and_mode() {
        let parsed = SymbolicCommandParser
            .parse(">>implement :: verify:\"cargo test\" max:4 timeout:30 :: mode:advise")
            .unwrap();
        let verify = parsed.steps[0].verify.clone().unwrap();
        assert_eq!(verify.command, "cargo test");
        assert_eq!(verify.max_attempts, Some(4));
        assert_eq!(verify.timeout_ms, Some(30_000));
        assert_eq!(parsed.gate_mode, Some(GateMode::Advise));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SymbolicCommandParser.parse("   "),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(SymbolicCommandParser.parse(">>a --> ").is_err());
        assert!(SymbolicCommandParser.parse(">>a :: verify:\"\"").is_err());
    }
}
