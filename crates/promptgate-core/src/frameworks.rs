//! Framework manager collaborator.
//!
//! A framework is a named methodology (CAGEERF, ReACT, 5W1H ...) that
//! contributes a system prompt and style guidance to template executions.
//! Only the lookup contract matters to the pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub style_guidance: String,
}

impl FrameworkDefinition {
    pub fn new(id: &str, name: &str, system_prompt: &str, style_guidance: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            system_prompt: system_prompt.to_string(),
            style_guidance: style_guidance.to_string(),
        }
    }

    /// Frameworks available when configuration declares none.
    pub fn builtin() -> Vec<FrameworkDefinition> {
        vec![
            Self::new(
                "CAGEERF",
                "CAGEERF",
                "Work through Context, Analysis, Goals, Execution, Evaluation, Refinement and Framework in order. State which phase you are in.",
                "Use a heading per phase and close with a short evaluation of the result.",
            ),
            Self::new(
                "ReACT",
                "ReACT",
                "Alternate between Reasoning about the problem and Acting on it. Record each observation before the next thought.",
                "Label each block as Thought, Action or Observation.",
            ),
            Self::new(
                "5W1H",
                "5W1H",
                "Answer Who, What, When, Where, Why and How before drawing conclusions.",
                "Use one short section per question.",
            ),
        ]
    }
}

pub trait FrameworkManager: Send + Sync {
    fn active_framework(&self) -> Option<String>;
    fn has_framework(&self, id: &str) -> bool;
    fn system_prompt(&self, id: &str) -> Option<String>;
    fn style_guidance(&self, id: &str) -> Option<String>;
    fn framework_ids(&self) -> Vec<String>;
}

/// Framework manager backed by a fixed list of definitions.
#[derive(Debug, Clone)]
pub struct StaticFrameworkManager {
    frameworks: Vec<FrameworkDefinition>,
    active: Option<String>,
}

impl StaticFrameworkManager {
    pub fn new(frameworks: Vec<FrameworkDefinition>, active: Option<String>) -> Self {
        let frameworks = if frameworks.is_empty() {
            FrameworkDefinition::builtin()
        } else {
            frameworks
        };
        Self { frameworks, active }
    }

    fn find(&self, id: &str) -> Option<&FrameworkDefinition> {
        let lower = id.to_lowercase();
        self.frameworks.iter().find(|f| f.id.to_lowercase() == lower)
    }
}

impl FrameworkManager for StaticFrameworkManager {
    fn active_framework(&self) -> Option<String> {
        self.active
            .as_deref()
            .and_then(|id| self.find(id))
            .map(|f| f.id.clone())
    }

    fn has_framework(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    fn system_prompt(&self, id: &str) -> Option<String> {
        self.find(id)
            .map(|f| f.system_prompt.clone())
            .filter(|s| !s.trim().is_empty())
    }

    fn style_guidance(&self, id: &str) -> Option<String> {
        self.find(id)
            .map(|f| f.style_guidance.clone())
            .filter(|s| !s.trim().is_empty())
    }

    fn framework_ids(&self) -> Vec<String> {
        self.frameworks.iter().map(|f| f.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_frameworks_when_unconfigured() {
        let manager = StaticFrameworkManager::new(vec![], Some("react".to_string()));
        assert_eq!(manager.active_framework().as_deref(), Some("ReACT"));
        assert!(manager.has_framework("cageerf"));
        assert!(manager.system_prompt("5W1H").is_some());
        assert_eq!(manager.framework_ids().len(), 3);
    }

    #[test]
    fn test_unknown_active_framework_is_ignored() {
        let manager = StaticFrameworkManager::new(
            vec![FrameworkDefinition::new("custom", "Custom", "sys", "")],
            Some("missing".to_string()),
        );
        assert!(manager.active_framework().is_none());
        assert!(manager.style_guidance("custom").is_none());
    }
}
