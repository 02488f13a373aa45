//! Layered injection configuration as read from the engine config file.
//!
//! ```yaml
//! injection:
//!   defaults:
//!     system_prompt: { enabled: true, frequency: { mode: every, interval: 2 } }
//!   categories:
//!     analysis:
//!       style_guidance: { enabled: false }
//!   chains:
//!     - pattern: "chain-7f*"
//!       system_prompt: { frequency: { mode: first_only } }
//!   steps:
//!     - target: last
//!       gate_guidance: { enabled: true, target: steps }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{InjectionFrequency, InjectionTarget, InjectionType};

/// Partial settings for one injection type. Unset fields fall through to
/// the next tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<InjectionFrequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<InjectionTarget>,
}

impl TypeConfig {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.frequency.is_none() && self.target.is_none()
    }
}

/// Per-type settings of one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<TypeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_guidance: Option<TypeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_guidance: Option<TypeConfig>,
}

impl TypeRules {
    pub fn get(&self, ty: InjectionType) -> Option<&TypeConfig> {
        let config = match ty {
            InjectionType::SystemPrompt => self.system_prompt.as_ref(),
            InjectionType::GateGuidance => self.gate_guidance.as_ref(),
            InjectionType::StyleGuidance => self.style_guidance.as_ref(),
        };
        config.filter(|c| !c.is_empty())
    }

    pub fn set(&mut self, ty: InjectionType, config: TypeConfig) {
        let slot = match ty {
            InjectionType::SystemPrompt => &mut self.system_prompt,
            InjectionType::GateGuidance => &mut self.gate_guidance,
            InjectionType::StyleGuidance => &mut self.style_guidance,
        };
        *slot = Some(config);
    }
}

/// Which steps a step rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StepTargetRepr", into = "StepTargetRepr")]
pub enum StepTarget {
    Number(u32),
    First,
    Last,
    Odd,
    Even,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StepTargetRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<StepTargetRepr> for StepTarget {
    type Error = String;

    fn try_from(repr: StepTargetRepr) -> Result<Self, Self::Error> {
        match repr {
            StepTargetRepr::Number(n) => Ok(StepTarget::Number(n)),
            StepTargetRepr::Text(text) => text.parse(),
        }
    }
}

impl From<StepTarget> for StepTargetRepr {
    fn from(target: StepTarget) -> Self {
        match target {
            StepTarget::Number(n) => StepTargetRepr::Number(n),
            StepTarget::First => StepTargetRepr::Text("first".to_string()),
            StepTarget::Last => StepTargetRepr::Text("last".to_string()),
            StepTarget::Odd => StepTargetRepr::Text("odd".to_string()),
            StepTarget::Even => StepTargetRepr::Text("even".to_string()),
        }
    }
}

impl std::str::FromStr for StepTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "first" => Ok(StepTarget::First),
            "last" => Ok(StepTarget::Last),
            "odd" => Ok(StepTarget::Odd),
            "even" => Ok(StepTarget::Even),
            other => other
                .parse::<u32>()
                .map(StepTarget::Number)
                .map_err(|_| format!("Invalid step target: {}", other)),
        }
    }
}

impl StepTarget {
    pub fn matches(&self, step_number: u32, total_steps: u32) -> bool {
        match self {
            StepTarget::Number(n) => *n == step_number,
            StepTarget::First => step_number == 1,
            StepTarget::Last => total_steps > 0 && step_number == total_steps,
            StepTarget::Odd => step_number % 2 == 1,
            StepTarget::Even => step_number > 0 && step_number % 2 == 0,
        }
    }

    pub fn label(&self) -> String {
        match self {
            StepTarget::Number(n) => n.to_string(),
            StepTarget::First => "first".to_string(),
            StepTarget::Last => "last".to_string(),
            StepTarget::Odd => "odd".to_string(),
            StepTarget::Even => "even".to_string(),
        }
    }
}

/// Glob form of a chain rule pattern. Variants are listed in match priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl ChainPattern {
    pub fn parse(pattern: &str) -> Self {
        let p = pattern.trim();
        let starts = p.starts_with('*');
        let ends = p.len() > 1 && p.ends_with('*');
        match (starts, ends) {
            (true, true) => ChainPattern::Contains(p[1..p.len() - 1].to_string()),
            (true, false) if p.len() == 1 => ChainPattern::Contains(String::new()),
            (true, false) => ChainPattern::Suffix(p[1..].to_string()),
            (false, true) => ChainPattern::Prefix(p[..p.len() - 1].to_string()),
            (false, false) => ChainPattern::Exact(p.to_string()),
        }
    }

    /// Lower is checked first.
    pub fn priority(&self) -> u8 {
        match self {
            ChainPattern::Exact(_) => 0,
            ChainPattern::Prefix(_) => 1,
            ChainPattern::Suffix(_) => 2,
            ChainPattern::Contains(_) => 3,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            ChainPattern::Exact(p) => key == p,
            ChainPattern::Prefix(p) => key.starts_with(p.as_str()),
            ChainPattern::Suffix(p) => key.ends_with(p.as_str()),
            ChainPattern::Contains(p) => key.contains(p.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRule {
    pub pattern: String,
    #[serde(flatten)]
    pub rules: TypeRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRule {
    pub target: StepTarget,
    /// Restrict the rule to chains matching this pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(flatten)]
    pub rules: TypeRules,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Global defaults.
    pub defaults: TypeRules,
    pub categories: HashMap<String, TypeRules>,
    pub chains: Vec<ChainRule>,
    pub steps: Vec<StepRule>,
}

impl InjectionConfig {
    /// Best chain rule for any of `keys`, honoring pattern priority, then
    /// declaration order. Only rules defining `ty` are considered.
    pub fn chain_rule_for(&self, ty: InjectionType, keys: &[&str]) -> Option<(&ChainRule, &TypeConfig)> {
        let mut best: Option<(u8, usize)> = None;
        for (idx, rule) in self.chains.iter().enumerate() {
            if rule.rules.get(ty).is_none() {
                continue;
            }
            let pattern = ChainPattern::parse(&rule.pattern);
            if !keys.iter().any(|k| pattern.matches(k)) {
                continue;
            }
            let rank = (pattern.priority(), idx);
            if best.map(|b| rank < b).unwrap_or(true) {
                best = Some(rank);
            }
        }
        best.and_then(|(_, idx)| {
            let rule = &self.chains[idx];
            rule.rules.get(ty).map(|c| (rule, c))
        })
    }

    /// First step rule matching the step (and its optional chain filter).
    pub fn step_rule_for(
        &self,
        ty: InjectionType,
        keys: &[&str],
        step_number: u32,
        total_steps: u32,
    ) -> Option<(&StepRule, &TypeConfig)> {
        self.steps
            .iter()
            .filter(|rule| rule.target.matches(step_number, total_steps))
            .filter(|rule| match &rule.chain {
                Some(p) => {
                    let pattern = ChainPattern::parse(p);
                    keys.iter().any(|k| pattern.matches(k))
                }
                None => true,
            })
            .find_map(|rule| rule.rules.get(ty).map(|c| (rule, c)))
    }

    pub fn category_rule_for(&self, ty: InjectionType, category: &str) -> Option<&TypeConfig> {
        self.categories
            .get(category)
            .or_else(|| {
                let lower = category.to_lowercase();
                self.categories
                    .iter()
                    .find(|(k, _)| k.to_lowercase() == lower)
                    .map(|(_, v)| v)
            })
            .and_then(|rules| rules.get(ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_pattern_forms() {
        assert_eq!(ChainPattern::parse("chain-abc"), ChainPattern::Exact("chain-abc".into()));
        assert_eq!(ChainPattern::parse("chain-*"), ChainPattern::Prefix("chain-".into()));
        assert_eq!(ChainPattern::parse("*abc"), ChainPattern::Suffix("abc".into()));
        assert_eq!(ChainPattern::parse("*ab*"), ChainPattern::Contains("ab".into()));
        assert!(ChainPattern::parse("*").matches("anything"));
    }

    #[test]
    fn test_chain_rule_priority() {
        let yaml = r#"
chains:
  - pattern: "*review*"
    system_prompt: { enabled: false }
  - pattern: "code*"
    system_prompt: { enabled: true }
  - pattern: "code-review"
    system_prompt: { frequency: { mode: never } }
"#;
        let config: InjectionConfig = serde_yaml::from_str(yaml).unwrap();
        let (rule, _) = config
            .chain_rule_for(InjectionType::SystemPrompt, &["code-review"])
            .unwrap();
        assert_eq!(rule.pattern, "code-review");

        let (rule, _) = config
            .chain_rule_for(InjectionType::SystemPrompt, &["code-style"])
            .unwrap();
        assert_eq!(rule.pattern, "code*");

        assert!(config
            .chain_rule_for(InjectionType::StyleGuidance, &["code-review"])
            .is_none());
    }

    #[test]
    fn test_step_targets() {
        let yaml = r#"
steps:
  - target: 2
    gate_guidance: { enabled: false }
  - target: last
    style_guidance: { enabled: true }
  - target: even
    system_prompt: { enabled: false }
"#;
        let config: InjectionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.steps[0].target, StepTarget::Number(2));
        assert!(config
            .step_rule_for(InjectionType::GateGuidance, &[], 2, 3)
            .is_some());
        assert!(config
            .step_rule_for(InjectionType::StyleGuidance, &[], 3, 3)
            .is_some());
        assert!(config
            .step_rule_for(InjectionType::StyleGuidance, &[], 2, 3)
            .is_none());
        assert!(StepTarget::Odd.matches(3, 4));
        assert!(!StepTarget::Even.matches(3, 4));
        assert!("sixth".parse::<StepTarget>().is_err());
    }
}
