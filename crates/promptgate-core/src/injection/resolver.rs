use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{InjectionConfig, TypeConfig};
use super::overrides::OverrideStore;
use super::{
    InjectionDecision, InjectionFrequency, InjectionSource, InjectionTarget, InjectionType,
    ResolutionStep, ResolvedInjection,
};

/// Where in an execution an injection question is being asked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    /// Human-readable chain name (`a-->b-->c`); chain patterns match it too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default = "one")]
    pub step_number: u32,
    #[serde(default = "one")]
    pub total_steps: u32,
}

fn one() -> u32 {
    1
}

impl InjectionScope {
    fn chain_keys(&self) -> Vec<&str> {
        self.chain_id
            .iter()
            .chain(self.chain_name.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Built-in behavior when no configured tier says anything.
pub fn system_default(ty: InjectionType) -> ResolvedInjection {
    let frequency = match ty {
        InjectionType::SystemPrompt => InjectionFrequency::Every { interval: 2 },
        InjectionType::GateGuidance => InjectionFrequency::Every { interval: 1 },
        InjectionType::StyleGuidance => InjectionFrequency::FirstOnly,
    };
    ResolvedInjection {
        enabled: true,
        frequency,
        target: InjectionTarget::Both,
    }
}

#[derive(Default)]
struct Accumulator {
    enabled: Option<(bool, InjectionSource)>,
    frequency: Option<(InjectionFrequency, InjectionSource)>,
    target: Option<(InjectionTarget, InjectionSource)>,
}

impl Accumulator {
    fn absorb(&mut self, config: &TypeConfig, source: InjectionSource) -> bool {
        let mut contributed = false;
        if self.enabled.is_none() {
            if let Some(v) = config.enabled {
                self.enabled = Some((v, source));
                contributed = true;
            }
        }
        if self.frequency.is_none() {
            if let Some(v) = config.frequency {
                self.frequency = Some((v, source));
                contributed = true;
            }
        }
        if self.target.is_none() {
            if let Some(v) = config.target {
                self.target = Some((v, source));
                contributed = true;
            }
        }
        contributed
    }

    /// A configured tier that defines the type decides `enabled` outright
    /// (unset means on). Frequency and target may still come from below.
    fn absorb_rule(&mut self, config: &TypeConfig, source: InjectionSource) -> bool {
        let rule = TypeConfig {
            enabled: Some(config.enabled.unwrap_or(true)),
            frequency: config.frequency,
            target: config.target,
        };
        self.absorb(&rule, source)
    }

    fn complete(&self) -> bool {
        self.enabled.is_some() && self.frequency.is_some() && self.target.is_some()
    }
}

/// Walks the injection hierarchy for one type at a time.
#[derive(Clone)]
pub struct InjectionResolver {
    config: InjectionConfig,
    overrides: Arc<OverrideStore>,
}

impl InjectionResolver {
    pub fn new(config: InjectionConfig, overrides: Arc<OverrideStore>) -> Self {
        Self { config, overrides }
    }

    pub fn overrides(&self) -> &Arc<OverrideStore> {
        &self.overrides
    }

    pub fn resolve(&self, ty: InjectionType, scope: &InjectionScope) -> InjectionDecision {
        self.resolve_at(ty, scope, Utc::now())
    }

    pub fn resolve_all(&self, scope: &InjectionScope) -> Vec<InjectionDecision> {
        let now = Utc::now();
        InjectionType::all()
            .into_iter()
            .map(|ty| self.resolve_at(ty, scope, now))
            .collect()
    }

    pub fn resolve_at(
        &self,
        ty: InjectionType,
        scope: &InjectionScope,
        now: DateTime<Utc>,
    ) -> InjectionDecision {
        let mut acc = Accumulator::default();
        let mut path = Vec::with_capacity(6);
        let keys = scope.chain_keys();

        // 1. runtime override
        match self
            .overrides
            .active(ty, scope.chain_id.as_deref(), scope.step_number, now)
        {
            Some(o) => {
                let config = TypeConfig {
                    enabled: Some(o.enabled),
                    frequency: None,
                    target: o.target,
                };
                let contributed = acc.absorb(&config, InjectionSource::RuntimeOverride);
                path.push(ResolutionStep {
                    tier: InjectionSource::RuntimeOverride,
                    contributed,
                    detail: Some(format!("scope={:?}", o.scope).to_lowercase()),
                });
            }
            None => path.push(ResolutionStep {
                tier: InjectionSource::RuntimeOverride,
                contributed: false,
                detail: None,
            }),
        }

        // 2. step rule
        let step = self
            .config
            .step_rule_for(ty, &keys, scope.step_number, scope.total_steps);
        path.push(match step {
            Some((rule, config)) => ResolutionStep {
                tier: InjectionSource::StepRule,
                contributed: !acc.complete() && acc.absorb_rule(config, InjectionSource::StepRule),
                detail: Some(format!("target={}", rule.target.label())),
            },
            None => ResolutionStep {
                tier: InjectionSource::StepRule,
                contributed: false,
                detail: None,
            },
        });

        // 3. chain rule
        let chain = if keys.is_empty() {
            None
        } else {
            self.config.chain_rule_for(ty, &keys)
        };
        path.push(match chain {
            Some((rule, config)) => ResolutionStep {
                tier: InjectionSource::ChainRule,
                contributed: !acc.complete() && acc.absorb_rule(config, InjectionSource::ChainRule),
                detail: Some(format!("pattern={}", rule.pattern)),
            },
            None => ResolutionStep {
                tier: InjectionSource::ChainRule,
                contributed: false,
                detail: None,
            },
        });

        // 4. category
        let category = scope
            .category
            .as_deref()
            .and_then(|c| self.config.category_rule_for(ty, c).map(|cfg| (c, cfg)));
        path.push(match category {
            Some((name, config)) => ResolutionStep {
                tier: InjectionSource::Category,
                contributed: !acc.complete() && acc.absorb_rule(config, InjectionSource::Category),
                detail: Some(format!("category={}", name)),
            },
            None => ResolutionStep {
                tier: InjectionSource::Category,
                contributed: false,
                detail: None,
            },
        });

        // 5. global defaults
        let global = self.config.defaults.get(ty);
        path.push(ResolutionStep {
            tier: InjectionSource::Global,
            contributed: match global {
                Some(config) => !acc.complete() && acc.absorb_rule(config, InjectionSource::Global),
                None => false,
            },
            detail: None,
        });

        // 6. system default
        let fallback = system_default(ty);
        let system = TypeConfig {
            enabled: Some(fallback.enabled),
            frequency: Some(fallback.frequency),
            target: Some(fallback.target),
        };
        path.push(ResolutionStep {
            tier: InjectionSource::SystemDefault,
            contributed: acc.absorb(&system, InjectionSource::SystemDefault),
            detail: None,
        });

        let (enabled, source) = acc
            .enabled
            .unwrap_or((fallback.enabled, InjectionSource::SystemDefault));
        let (frequency, frequency_source) = acc
            .frequency
            .unwrap_or((fallback.frequency, InjectionSource::SystemDefault));
        let (target, target_source) = acc
            .target
            .unwrap_or((fallback.target, InjectionSource::SystemDefault));

        tracing::debug!(
            "[InjectionResolver] {} -> enabled={} (source={}, frequency from {}, target from {})",
            ty,
            enabled,
            source.as_str(),
            frequency_source.as_str(),
            target_source.as_str()
        );

        InjectionDecision {
            injection_type: ty,
            config: ResolvedInjection {
                enabled,
                frequency,
                target,
            },
            source,
            frequency_source,
            target_source,
            resolution_path: path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::overrides::RuntimeOverride;
    use chrono::Duration;

    fn resolver(yaml: &str) -> InjectionResolver {
        let config: InjectionConfig = serde_yaml::from_str(yaml).unwrap();
        InjectionResolver::new(config, Arc::new(OverrideStore::new()))
    }

    fn scope(chain: &str, step: u32, total: u32) -> InjectionScope {
        InjectionScope {
            chain_id: Some(chain.to_string()),
            step_number: step,
            total_steps: total,
            ..Default::default()
        }
    }

    #[test]
    fn test_system_defaults() {
        let r = resolver("{}");
        let d = r.resolve(InjectionType::SystemPrompt, &InjectionScope::default());
        assert_eq!(d.source, InjectionSource::SystemDefault);
        assert_eq!(d.config.frequency, InjectionFrequency::Every { interval: 2 });

        let style = r.resolve(InjectionType::StyleGuidance, &InjectionScope::default());
        assert_eq!(style.config.frequency, InjectionFrequency::FirstOnly);
        assert_eq!(style.resolution_path.len(), 6);
    }

    #[test]
    fn test_step_rule_beats_chain_rule_and_global() {
        let r = resolver(
            r#"
defaults:
  gate_guidance: { enabled: true }
chains:
  - pattern: "chain-*"
    gate_guidance: { enabled: true }
steps:
  - target: 2
    gate_guidance: { enabled: false }
"#,
        );
        let d = r.resolve(InjectionType::GateGuidance, &scope("chain-abc", 2, 3));
        assert!(!d.config.enabled);
        assert_eq!(d.source, InjectionSource::StepRule);

        let d = r.resolve(InjectionType::GateGuidance, &scope("chain-abc", 1, 3));
        assert!(d.config.enabled);
        assert_eq!(d.source, InjectionSource::ChainRule);
    }

    #[test]
    fn test_step_rule_decides_enabled_without_setting_it() {
        let r = resolver(
            r#"
defaults:
  gate_guidance: { enabled: true }
chains:
  - pattern: "chain-*"
    gate_guidance: { enabled: false, target: steps }
steps:
  - target: 2
    gate_guidance: { frequency: { mode: every, interval: 1 } }
"#,
        );
        let d = r.resolve(InjectionType::GateGuidance, &scope("chain-abc", 2, 3));
        assert!(d.config.enabled);
        assert_eq!(d.source, InjectionSource::StepRule);
        assert_eq!(d.frequency_source, InjectionSource::StepRule);
        assert_eq!(d.target_source, InjectionSource::ChainRule);

        let d = r.resolve(InjectionType::GateGuidance, &scope("chain-abc", 1, 3));
        assert!(!d.config.enabled);
        assert_eq!(d.source, InjectionSource::ChainRule);
    }

    #[test]
    fn test_fields_resolved_independently() {
        let r = resolver(
            r#"
defaults:
  system_prompt: { frequency: { mode: first_only } }
categories:
  analysis:
    system_prompt: { target: steps }
"#,
        );
        r.overrides()
            .set(RuntimeOverride::new(InjectionType::SystemPrompt, true));
        let mut s = scope("chain-z", 1, 2);
        s.category = Some("analysis".to_string());

        let d = r.resolve(InjectionType::SystemPrompt, &s);
        assert_eq!(d.source, InjectionSource::RuntimeOverride);
        assert_eq!(d.target_source, InjectionSource::Category);
        assert_eq!(d.frequency_source, InjectionSource::Global);
        assert_eq!(d.config.frequency, InjectionFrequency::FirstOnly);
        assert!(d.resolution_path[0].contributed);
        assert!(!d.resolution_path[5].contributed);
    }

    #[test]
    fn test_expired_override_skipped() {
        let r = resolver("defaults:\n  style_guidance: { enabled: true }\n");
        r.overrides().set(
            RuntimeOverride::new(InjectionType::StyleGuidance, false)
                .expiring_at(Utc::now() - Duration::minutes(1)),
        );
        let d = r.resolve(InjectionType::StyleGuidance, &InjectionScope::default());
        assert!(d.config.enabled);
        assert_eq!(d.source, InjectionSource::Global);
    }

    #[test]
    fn test_should_inject_every_two() {
        let r = resolver("{}");
        let d = r.resolve(InjectionType::SystemPrompt, &scope("chain-a", 1, 3));
        assert!(d.should_inject(true, 1));
        assert!(!d.should_inject(true, 2));
        assert!(d.should_inject(true, 3));
    }
}
