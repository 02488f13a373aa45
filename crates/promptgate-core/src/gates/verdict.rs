//! Verdict parsing.
//!
//! Accepted forms (case-insensitive):
//!
//! ```text
//! GATE_REVIEW: PASS - all criteria met
//! GATE_REVIEW: FAIL - missing tests (confidence: 80%)
//! PASS: looks good
//! FAIL - too short, confidence: low
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Confidence assumed when the verdict does not state one.
pub const DEFAULT_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: VerdictOutcome,
    pub reason: String,
    /// 0.0 to 1.0
    pub confidence: f64,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.outcome == VerdictOutcome::Pass
    }
}

fn verdict_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*(?:gate_review\s*:\s*)?(pass|fail)\b\s*[-:–]?\s*(.*)$")
            .unwrap_or_else(|e| panic!("invalid verdict regex: {}", e))
    })
}

fn confidence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\(?\s*confidence\s*[:=]\s*(?:(\d+(?:\.\d+)?)\s*(%)?|(high|medium|low))\s*\)?")
            .unwrap_or_else(|e| panic!("invalid confidence regex: {}", e))
    })
}

fn parse_confidence(text: &str) -> (f64, String) {
    let Some(caps) = confidence_regex().captures(text) else {
        return (DEFAULT_CONFIDENCE, text.trim().to_string());
    };

    let confidence = if let Some(number) = caps.get(1) {
        let value: f64 = number.as_str().parse().unwrap_or(DEFAULT_CONFIDENCE);
        if caps.get(2).is_some() || value > 1.0 {
            value / 100.0
        } else {
            value
        }
    } else {
        match caps.get(3).map(|m| m.as_str().to_lowercase()).as_deref() {
            Some("high") => 0.9,
            Some("low") => 0.3,
            _ => DEFAULT_CONFIDENCE,
        }
    };

    let reason = confidence_regex().replace(text, "");
    let reason = reason
        .trim()
        .trim_end_matches(&[',', ';', '-'][..])
        .trim()
        .to_string();
    (confidence.clamp(0.0, 1.0), reason)
}

/// Parse a verdict string. Returns `None` when it does not follow the grammar.
pub fn parse_verdict(text: &str) -> Option<Verdict> {
    let caps = verdict_regex().captures(text)?;
    let outcome = match caps[1].to_lowercase().as_str() {
        "pass" => VerdictOutcome::Pass,
        _ => VerdictOutcome::Fail,
    };
    let rest = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let (confidence, reason) = parse_confidence(rest);
    Some(Verdict {
        outcome,
        reason,
        confidence,
    })
}

/// Text shown when a verdict could not be parsed.
pub const VERDICT_FORMAT_HINT: &str =
    "Respond with `GATE_REVIEW: PASS - <reason>` or `GATE_REVIEW: FAIL - <reason>`.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_review_forms() {
        let v = parse_verdict("GATE_REVIEW: PASS - all criteria met").unwrap();
        assert!(v.passed());
        assert_eq!(v.reason, "all criteria met");
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);

        let v = parse_verdict("gate_review: fail - missing tests (confidence: 80%)").unwrap();
        assert_eq!(v.outcome, VerdictOutcome::Fail);
        assert_eq!(v.reason, "missing tests");
        assert!((v.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_bare_forms_and_keywords() {
        let v = parse_verdict("PASS: looks good").unwrap();
        assert!(v.passed());
        assert_eq!(v.reason, "looks good");

        let v = parse_verdict("FAIL - too short, confidence: low").unwrap();
        assert_eq!(v.reason, "too short");
        assert!((v.confidence - 0.3).abs() < 1e-9);

        let v = parse_verdict("fail confidence=0.95").unwrap();
        assert!((v.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_unparseable() {
        assert!(parse_verdict("looks fine to me").is_none());
        assert!(parse_verdict("passable work").is_none());
        assert!(parse_verdict("").is_none());
    }
}
