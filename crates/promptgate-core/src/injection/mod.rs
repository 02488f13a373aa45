//! Injection control: decides when guidance text is added to a rendered step.
//!
//! Three kinds of guidance can be injected: the framework system prompt,
//! gate guidance, and style guidance. Each kind is resolved independently
//! through a layered hierarchy (runtime override, step rule, chain rule,
//! category rule, global default, system default) by [`InjectionResolver`].

pub mod config;
pub mod overrides;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use config::{ChainPattern, ChainRule, InjectionConfig, StepRule, StepTarget, TypeConfig, TypeRules};
pub use overrides::{OverrideScope, OverrideStore, RuntimeOverride};
pub use resolver::{InjectionResolver, InjectionScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionType {
    SystemPrompt,
    GateGuidance,
    StyleGuidance,
}

impl InjectionType {
    pub fn all() -> [InjectionType; 3] {
        [
            InjectionType::SystemPrompt,
            InjectionType::GateGuidance,
            InjectionType::StyleGuidance,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionType::SystemPrompt => "system_prompt",
            InjectionType::GateGuidance => "gate_guidance",
            InjectionType::StyleGuidance => "style_guidance",
        }
    }
}

impl std::fmt::Display for InjectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InjectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "system_prompt" => Ok(InjectionType::SystemPrompt),
            "gate_guidance" => Ok(InjectionType::GateGuidance),
            "style_guidance" => Ok(InjectionType::StyleGuidance),
            other => Err(format!("Unknown injection type: {}", other)),
        }
    }
}

/// How often an enabled injection fires across the steps of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InjectionFrequency {
    /// Fire on step 1 and then every `interval` steps.
    Every {
        #[serde(default = "default_interval")]
        interval: u32,
    },
    FirstOnly,
    Never,
}

fn default_interval() -> u32 {
    1
}

impl InjectionFrequency {
    pub fn fires_on(&self, step_number: u32) -> bool {
        let step = step_number.max(1);
        match self {
            InjectionFrequency::Every { interval } => (step - 1) % (*interval).max(1) == 0,
            InjectionFrequency::FirstOnly => step == 1,
            InjectionFrequency::Never => false,
        }
    }
}

/// Where an injection lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionTarget {
    /// Individual chain steps only.
    Steps,
    /// The top-level execution: a single prompt, or the opening step of a chain.
    Parent,
    Both,
}

impl InjectionTarget {
    pub fn applies_to(&self, is_chain: bool, step_number: u32) -> bool {
        match self {
            InjectionTarget::Both => true,
            InjectionTarget::Steps => is_chain,
            InjectionTarget::Parent => !is_chain || step_number <= 1,
        }
    }
}

/// Precedence tier that supplied a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionSource {
    RuntimeOverride,
    StepRule,
    ChainRule,
    Category,
    Global,
    SystemDefault,
}

impl InjectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionSource::RuntimeOverride => "runtime_override",
            InjectionSource::StepRule => "step_rule",
            InjectionSource::ChainRule => "chain_rule",
            InjectionSource::Category => "category",
            InjectionSource::Global => "global",
            InjectionSource::SystemDefault => "system_default",
        }
    }
}

/// Fully resolved configuration for one injection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInjection {
    pub enabled: bool,
    pub frequency: InjectionFrequency,
    pub target: InjectionTarget,
}

/// One entry of the resolution trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionStep {
    pub tier: InjectionSource,
    /// True when this tier supplied at least one field.
    pub contributed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of resolving one injection type. Produced per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionDecision {
    pub injection_type: InjectionType,
    pub config: ResolvedInjection,
    /// Tier that decided the enabled flag.
    pub source: InjectionSource,
    pub frequency_source: InjectionSource,
    pub target_source: InjectionSource,
    pub resolution_path: Vec<ResolutionStep>,
}

impl InjectionDecision {
    /// Whether the injection fires for a concrete step.
    pub fn should_inject(&self, is_chain: bool, step_number: u32) -> bool {
        self.config.enabled
            && self.config.frequency.fires_on(step_number)
            && self.config.target.applies_to(is_chain, step_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_every() {
        let every_two = InjectionFrequency::Every { interval: 2 };
        let fired: Vec<u32> = (1..=5).filter(|s| every_two.fires_on(*s)).collect();
        assert_eq!(fired, vec![1, 3, 5]);

        let zero = InjectionFrequency::Every { interval: 0 };
        assert!(zero.fires_on(4));
        assert!(!InjectionFrequency::Never.fires_on(1));
        assert!(InjectionFrequency::FirstOnly.fires_on(1));
        assert!(!InjectionFrequency::FirstOnly.fires_on(2));
    }

    #[test]
    fn test_target_applies() {
        assert!(InjectionTarget::Parent.applies_to(false, 1));
        assert!(InjectionTarget::Parent.applies_to(true, 1));
        assert!(!InjectionTarget::Parent.applies_to(true, 2));
        assert!(!InjectionTarget::Steps.applies_to(false, 1));
        assert!(InjectionTarget::Steps.applies_to(true, 3));
    }

    #[test]
    fn test_frequency_yaml_shape() {
        let freq: InjectionFrequency = serde_yaml::from_str("mode: every\ninterval: 3\n").unwrap();
        assert_eq!(freq, InjectionFrequency::Every { interval: 3 });
        let freq: InjectionFrequency = serde_yaml::from_str("mode: first_only\n").unwrap();
        assert_eq!(freq, InjectionFrequency::FirstOnly);
        assert_eq!("gate-guidance".parse::<InjectionType>().unwrap(), InjectionType::GateGuidance);
    }
}
