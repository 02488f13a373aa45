//! Runtime injection overrides, set through the JSON-RPC surface.
//!
//! An override only carries an enabled flag and an optional target; the
//! frequency always comes from the configured tiers below it.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InjectionTarget, InjectionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrideScope {
    /// Applies to every request until cleared.
    #[default]
    Session,
    /// Applies only when the current chain id equals `scope_id`.
    Chain,
    /// Applies only when `chainId:stepNumber` equals `scope_id`.
    Step,
}

impl OverrideScope {
    fn specificity(&self) -> u8 {
        match self {
            OverrideScope::Session => 0,
            OverrideScope::Chain => 1,
            OverrideScope::Step => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOverride {
    pub injection_type: InjectionType,
    #[serde(default)]
    pub scope: OverrideScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<InjectionTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl RuntimeOverride {
    pub fn new(injection_type: InjectionType, enabled: bool) -> Self {
        Self {
            injection_type,
            scope: OverrideScope::Session,
            scope_id: None,
            enabled,
            target: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_chain(mut self, chain_id: impl Into<String>) -> Self {
        self.scope = OverrideScope::Chain;
        self.scope_id = Some(chain_id.into());
        self
    }

    pub fn for_step(mut self, chain_id: &str, step_number: u32) -> Self {
        self.scope = OverrideScope::Step;
        self.scope_id = Some(format!("{}:{}", chain_id, step_number));
        self
    }

    pub fn with_target(mut self, target: InjectionTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn matches(&self, chain_id: Option<&str>, step_number: u32) -> bool {
        match self.scope {
            OverrideScope::Session => true,
            OverrideScope::Chain => {
                matches!((self.scope_id.as_deref(), chain_id), (Some(a), Some(b)) if a == b)
            }
            OverrideScope::Step => match (self.scope_id.as_deref(), chain_id) {
                (Some(id), Some(chain)) => id == format!("{}:{}", chain, step_number),
                _ => false,
            },
        }
    }

    fn same_slot(&self, other: &RuntimeOverride) -> bool {
        self.injection_type == other.injection_type
            && self.scope == other.scope
            && self.scope_id == other.scope_id
    }
}

/// Process-wide store of runtime overrides.
pub struct OverrideStore {
    overrides: RwLock<HashMap<InjectionType, Vec<RuntimeOverride>>>,
}

impl Default for OverrideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OverrideStore {
    pub fn new() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Add an override, replacing any existing one for the same type and scope.
    pub fn set(&self, entry: RuntimeOverride) {
        if let Ok(mut map) = self.overrides.write() {
            let list = map.entry(entry.injection_type).or_default();
            list.retain(|o| !o.same_slot(&entry));
            tracing::info!(
                "[InjectionOverrides] Set {} override (scope={:?}, enabled={})",
                entry.injection_type,
                entry.scope,
                entry.enabled
            );
            list.push(entry);
        }
    }

    /// Remove overrides for one type, or all of them. Returns how many were removed.
    pub fn clear(&self, ty: Option<InjectionType>) -> usize {
        let Ok(mut map) = self.overrides.write() else {
            return 0;
        };
        match ty {
            Some(ty) => map.remove(&ty).map(|v| v.len()).unwrap_or(0),
            None => {
                let count = map.values().map(Vec::len).sum();
                map.clear();
                count
            }
        }
    }

    /// Most specific, most recent unexpired override matching the scope.
    pub fn active(
        &self,
        ty: InjectionType,
        chain_id: Option<&str>,
        step_number: u32,
        now: DateTime<Utc>,
    ) -> Option<RuntimeOverride> {
        let map = self.overrides.read().ok()?;
        map.get(&ty)?
            .iter()
            .filter(|o| !o.is_expired(now))
            .filter(|o| o.matches(chain_id, step_number))
            .max_by(|a, b| {
                a.scope
                    .specificity()
                    .cmp(&b.scope.specificity())
                    .then(a.created_at.cmp(&b.created_at))
            })
            .cloned()
    }

    /// All stored overrides, expired ones included.
    pub fn list(&self) -> Vec<RuntimeOverride> {
        let Ok(map) = self.overrides.read() else {
            return Vec::new();
        };
        let mut all: Vec<RuntimeOverride> = map.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut map) = self.overrides.write() else {
            return 0;
        };
        let mut removed = 0;
        for list in map.values_mut() {
            let before = list.len();
            list.retain(|o| !o.is_expired(now));
            removed += before - list.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_scope_matching() {
        let session = RuntimeOverride::new(InjectionType::SystemPrompt, false);
        assert!(session.matches(None, 1));

        let chain = RuntimeOverride::new(InjectionType::SystemPrompt, false).for_chain("chain-a");
        assert!(chain.matches(Some("chain-a"), 2));
        assert!(!chain.matches(Some("chain-b"), 2));
        assert!(!chain.matches(None, 1));

        let step = RuntimeOverride::new(InjectionType::SystemPrompt, false).for_step("chain-a", 2);
        assert!(step.matches(Some("chain-a"), 2));
        assert!(!step.matches(Some("chain-a"), 3));
    }

    #[test]
    fn test_expired_override_never_selected() {
        let store = OverrideStore::new();
        let now = Utc::now();
        store.set(
            RuntimeOverride::new(InjectionType::GateGuidance, false)
                .expiring_at(now - Duration::seconds(5)),
        );
        assert!(store
            .active(InjectionType::GateGuidance, None, 1, now)
            .is_none());
        assert_eq!(store.prune_expired(now), 1);
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_most_specific_wins_and_set_replaces() {
        let store = OverrideStore::new();
        let now = Utc::now();
        store.set(RuntimeOverride::new(InjectionType::StyleGuidance, true));
        store.set(RuntimeOverride::new(InjectionType::StyleGuidance, false).for_chain("chain-x"));

        let active = store
            .active(InjectionType::StyleGuidance, Some("chain-x"), 1, now)
            .unwrap();
        assert_eq!(active.scope, OverrideScope::Chain);
        assert!(!active.enabled);

        store.set(RuntimeOverride::new(InjectionType::StyleGuidance, false));
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.clear(Some(InjectionType::StyleGuidance)), 2);
        assert_eq!(store.clear(None), 0);
    }
}
