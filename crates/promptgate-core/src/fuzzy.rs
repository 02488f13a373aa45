//! Edit-distance helpers for "did you mean" suggestions.

/// Maximum edit distance still considered a near miss.
pub const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Maximum number of suggestions surfaced.
pub const MAX_SUGGESTIONS: usize = 3;

/// Candidates within `1..=MAX_SUGGESTION_DISTANCE` of `input`
/// (case-insensitive), closest first, ties broken by name, capped at
/// `MAX_SUGGESTIONS`.
pub fn suggest<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .map(|c| (strsim::levenshtein(&needle, &c.to_lowercase()), c))
        .filter(|(d, _)| *d > 0 && *d <= MAX_SUGGESTION_DISTANCE)
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, c)| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_match() {
        let ids = ["Code-Quality"];
        assert_eq!(suggest("code-qualty", ids.iter().copied()), vec!["Code-Quality".to_string()]);
    }

    #[test]
    fn test_suggest_sorted_and_capped() {
        let ids = ["tests", "test", "text", "tent", "best", "unrelated"];
        let hits = suggest("tesx", ids.iter().copied());
        // distance 1: test; distance 2: best, tent, tests, text
        assert_eq!(hits, vec!["test", "best", "tent"]);
    }

    #[test]
    fn test_suggest_excludes_exact_and_far() {
        let ids = ["security", "performance"];
        assert!(suggest("security", ids.iter().copied()).is_empty());
        assert!(suggest("documentation", ids.iter().copied()).is_empty());
        assert_eq!(suggest("secruity", ids.iter().copied()), vec!["security".to_string()]);
    }
}
