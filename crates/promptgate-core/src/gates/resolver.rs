//! Gate reference resolution.
//!
//! A criterion string attached to a step is either a reference to a known
//! gate or free-text inline criteria. Temporary gates are matched first and
//! never memoized (they come and go with their scope). Canonical matches and
//! inline classifications are memoized per input for the resolver's life.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::registry::GateRegistry;
use crate::fuzzy;

fn slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+$").unwrap_or_else(|e| panic!("invalid slug regex: {}", e))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateReference {
    /// Matches a live temporary gate.
    Temporary { gate_id: String },
    /// Matches a canonical gate.
    Registered { gate_id: String },
    /// Free-text criteria. `suggestions` holds near-miss canonical ids when
    /// the text looked like an identifier.
    Inline {
        criteria: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },
}

impl GateReference {
    pub fn gate_id(&self) -> Option<&str> {
        match self {
            GateReference::Temporary { gate_id } | GateReference::Registered { gate_id } => {
                Some(gate_id)
            }
            GateReference::Inline { .. } => None,
        }
    }

    pub fn suggestions(&self) -> &[String] {
        match self {
            GateReference::Inline { suggestions, .. } => suggestions,
            _ => &[],
        }
    }
}

pub fn is_slug(text: &str) -> bool {
    slug_regex().is_match(text)
}

pub struct GateReferenceResolver {
    registry: Arc<GateRegistry>,
    cache: RwLock<HashMap<String, GateReference>>,
}

impl GateReferenceResolver {
    pub fn new(registry: Arc<GateRegistry>) -> Self {
        Self {
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<GateRegistry> {
        &self.registry
    }

    pub fn resolve(&self, input: &str) -> GateReference {
        let text = input.trim();

        if let Some(temp) = self.registry.find_temporary(text) {
            return GateReference::Temporary {
                gate_id: temp.definition.id,
            };
        }

        if let Some(hit) = self.cache.read().ok().and_then(|c| c.get(text).cloned()) {
            return hit;
        }

        let resolved = self.resolve_uncached(text);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(text.to_string(), resolved.clone());
        }
        resolved
    }

    fn resolve_uncached(&self, text: &str) -> GateReference {
        if !is_slug(text) {
            return GateReference::Inline {
                criteria: text.to_string(),
                suggestions: Vec::new(),
            };
        }

        let lower = text.to_lowercase();
        let candidates = if lower == text {
            vec![text.to_string()]
        } else {
            vec![text.to_string(), lower]
        };
        for candidate in candidates {
            if self.registry.canonical(&candidate).is_some() {
                return GateReference::Registered { gate_id: candidate };
            }
        }

        let ids = self.registry.canonical_ids();
        let suggestions = fuzzy::suggest(text, ids.iter().map(String::as_str));
        if !suggestions.is_empty() {
            tracing::info!(
                "[GateResolver] Unknown gate '{}', did you mean: {}",
                text,
                suggestions.join(", ")
            );
        }
        GateReference::Inline {
            criteria: text.to_string(),
            suggestions,
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::loader::StaticGateLoader;
    use crate::models::{GateDefinition, GateScope};

    fn resolver() -> GateReferenceResolver {
        let loader = StaticGateLoader::new(vec![
            GateDefinition::new("code-quality", "Code Quality"),
            GateDefinition::new("security", "Security"),
            GateDefinition::new("secure-defaults", "Secure Defaults"),
        ]);
        GateReferenceResolver::new(Arc::new(GateRegistry::new(Arc::new(loader))))
    }

    #[test]
    fn test_exact_canonical_id_is_registered() {
        let r = resolver();
        assert_eq!(
            r.resolve("security"),
            GateReference::Registered {
                gate_id: "security".to_string()
            }
        );
        assert_eq!(r.resolve("SECURITY").gate_id(), Some("security"));
    }

    #[test]
    fn test_near_miss_gets_sorted_suggestions() {
        let r = resolver();
        let reference = r.resolve("securty");
        assert_eq!(reference.gate_id(), None);
        assert_eq!(reference.suggestions(), &["security".to_string()]);

        let far = r.resolve("documentation");
        assert!(far.suggestions().is_empty());
    }

    #[test]
    fn test_free_text_is_inline_without_suggestions() {
        let r = resolver();
        let reference = r.resolve("  Mentions error handling ");
        assert_eq!(
            reference,
            GateReference::Inline {
                criteria: "Mentions error handling".to_string(),
                suggestions: vec![]
            }
        );
    }

    #[test]
    fn test_temporary_first_and_not_memoized() {
        let r = resolver();
        assert_eq!(r.resolve("tone").gate_id(), None);
        assert_eq!(r.cached_len(), 1);

        r.registry()
            .register_temporary(GateDefinition::new("tone", "Tone"), GateScope::Execution, "e1");
        assert_eq!(
            r.resolve("tone"),
            GateReference::Temporary {
                gate_id: "tone".to_string()
            }
        );

        r.registry().cleanup_scope("e1");
        assert_eq!(r.resolve("tone").gate_id(), None);
    }
}
