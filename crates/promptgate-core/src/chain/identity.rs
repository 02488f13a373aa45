//! Chain identity: stable ids for step lists and fresh session ids.
//!
//! A chain id is derived only from the ordered `(prompt_id, arguments)`
//! pairs, so the same chain definition always maps to the same id no matter
//! how its arguments were ordered or spaced. That lets a request without a
//! session id rediscover the active session for its chain.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::ParsedStep;

pub const CHAIN_ID_PREFIX: &str = "chain-";

/// Hex characters kept from the digest.
const CHAIN_HASH_LEN: usize = 16;

/// Key used for free text that is not part of a `key=value` pair.
const POSITIONAL_KEY: &str = "_";

fn arg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_\-]*)\s*[=:]\s*(?:"([^"]*)"|'([^']*)'|(\S+))"#)
            .unwrap_or_else(|e| panic!("invalid argument regex: {}", e))
    })
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a raw argument string into key/value pairs.
///
/// Supports `key=value`, `key:value` and quoted values. Text outside any
/// pair is collected under the `_` key with whitespace collapsed.
pub fn parse_args(raw: &str) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    let mut leftover = String::new();
    let mut last_end = 0;

    for caps in arg_regex().captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        leftover.push_str(&raw[last_end..whole.start()]);
        leftover.push(' ');
        last_end = whole.end();

        let key = caps[1].to_string();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        args.insert(key, value);
    }
    leftover.push_str(&raw[last_end..]);

    let positional = collapse_whitespace(&leftover);
    if !positional.is_empty() {
        args.insert(POSITIONAL_KEY.to_string(), positional);
    }
    args
}

/// Canonical `key=value key2=value2` form with keys sorted.
pub fn normalize_args(raw: &str) -> String {
    parse_args(raw)
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the stable chain id for an ordered list of steps.
pub fn compute_chain_id(steps: &[ParsedStep]) -> String {
    let canonical = steps
        .iter()
        .map(|s| format!("{}:{}", s.prompt_id.trim(), normalize_args(&s.raw_args)))
        .collect::<Vec<_>>()
        .join("|");

    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    format!("{}{}", CHAIN_ID_PREFIX, &digest[..CHAIN_HASH_LEN])
}

/// Generate a random, time-prefixed session id.
pub fn generate_session_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    let entropy = uuid::Uuid::new_v4().simple().to_string();
    format!("sess-{}-{}", stamp, &entropy[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, args: &str) -> ParsedStep {
        ParsedStep::new(id, args)
    }

    #[test]
    fn test_parse_args_forms() {
        let args = parse_args(r#"topic="rust async" depth=3 style:'terse'  extra words"#);
        assert_eq!(args.get("topic").map(String::as_str), Some("rust async"));
        assert_eq!(args.get("depth").map(String::as_str), Some("3"));
        assert_eq!(args.get("style").map(String::as_str), Some("terse"));
        assert_eq!(args.get("_").map(String::as_str), Some("extra words"));
    }

    #[test]
    fn test_normalize_sorts_keys() {
        assert_eq!(normalize_args("b=2 a=1"), "a=1 b=2");
        assert_eq!(normalize_args("  a = 1   b=2 "), "a=1 b=2");
        assert_eq!(normalize_args(""), "");
    }

    #[test]
    fn test_chain_id_ignores_order_and_spacing() {
        let a = compute_chain_id(&[step("analyze", "topic=x depth=2"), step("summarize", "")]);
        let b = compute_chain_id(&[
            step("analyze", "  depth=2    topic=x "),
            step("summarize", "   "),
        ]);
        assert_eq!(a, b);
        assert!(a.starts_with(CHAIN_ID_PREFIX));
        assert_eq!(a.len(), CHAIN_ID_PREFIX.len() + CHAIN_HASH_LEN);
    }

    #[test]
    fn test_chain_id_changes_with_content() {
        let base = compute_chain_id(&[step("analyze", "topic=x"), step("summarize", "")]);
        let other_value = compute_chain_id(&[step("analyze", "topic=y"), step("summarize", "")]);
        let other_prompt = compute_chain_id(&[step("analyse", "topic=x"), step("summarize", "")]);
        let reordered = compute_chain_id(&[step("summarize", ""), step("analyze", "topic=x")]);
        assert_ne!(base, other_value);
        assert_ne!(base, other_prompt);
        assert_ne!(base, reordered);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("sess-"));
        assert_ne!(a, b);
    }
}
