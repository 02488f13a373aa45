//! Two-tier gate registry.
//!
//! Canonical gates come from a [`GateDefinitionLoader`] and are cached for
//! the process lifetime. Temporary gates are created at run time, each bound
//! to a scope kind and a scope id; all gates of a scope are dropped together
//! by [`GateRegistry::cleanup_scope`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::loader::GateDefinitionLoader;
use crate::models::{GateDefinition, GateScope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryGate {
    pub definition: GateDefinition,
    pub scope: GateScope,
    pub scope_id: String,
    pub created_at: DateTime<Utc>,
}

pub struct GateRegistry {
    loader: Arc<dyn GateDefinitionLoader>,
    canonical: RwLock<HashMap<String, GateDefinition>>,
    temporary: RwLock<HashMap<String, TemporaryGate>>,
}

impl GateRegistry {
    pub fn new(loader: Arc<dyn GateDefinitionLoader>) -> Self {
        Self {
            loader,
            canonical: RwLock::new(HashMap::new()),
            temporary: RwLock::new(HashMap::new()),
        }
    }

    // ─── Canonical ─────────────────────────────────────────────────────────

    /// Exact-id canonical lookup, cached after the first load.
    pub fn canonical(&self, id: &str) -> Option<GateDefinition> {
        if let Some(gate) = self.canonical.read().ok()?.get(id) {
            return Some(gate.clone());
        }
        let gate = self.loader.load(id)?;
        if let Ok(mut cache) = self.canonical.write() {
            cache.insert(id.to_string(), gate.clone());
        }
        tracing::debug!("[GateRegistry] Cached canonical gate {}", id);
        Some(gate)
    }

    pub fn canonical_ids(&self) -> Vec<String> {
        self.loader.list_ids()
    }

    // ─── Temporary ─────────────────────────────────────────────────────────

    /// Register a temporary gate. The definition id is kept when non-empty
    /// and unused, otherwise a fresh `temp-` id is assigned.
    pub fn register_temporary(
        &self,
        mut definition: GateDefinition,
        scope: GateScope,
        scope_id: &str,
    ) -> String {
        let Ok(mut temporary) = self.temporary.write() else {
            return definition.id;
        };

        if definition.id.trim().is_empty() || temporary.contains_key(&definition.id) {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            definition.id = format!("temp-{}", &suffix[..8]);
        }
        if definition.name.trim().is_empty() {
            definition.name = definition.id.clone();
        }
        definition.scope = scope;

        let id = definition.id.clone();
        tracing::debug!(
            "[GateRegistry] Registered temporary gate {} ({} scope {})",
            id,
            scope,
            scope_id
        );
        temporary.insert(
            id.clone(),
            TemporaryGate {
                definition,
                scope,
                scope_id: scope_id.to_string(),
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Unexpired temporary gate matched by exact id or display name.
    pub fn find_temporary(&self, id_or_name: &str) -> Option<TemporaryGate> {
        let now = Utc::now();
        let temporary = self.temporary.read().ok()?;
        if let Some(gate) = temporary.get(id_or_name) {
            return (!gate.definition.is_expired(now)).then(|| gate.clone());
        }
        temporary
            .values()
            .filter(|g| !g.definition.is_expired(now))
            .find(|g| g.definition.name == id_or_name)
            .cloned()
    }

    pub fn temporaries_for_scope(&self, scope_id: &str) -> Vec<TemporaryGate> {
        let Ok(temporary) = self.temporary.read() else {
            return Vec::new();
        };
        let mut gates: Vec<TemporaryGate> = temporary
            .values()
            .filter(|g| g.scope_id == scope_id)
            .cloned()
            .collect();
        gates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        gates
    }

    /// Drop every temporary gate of a scope. Returns how many were removed.
    pub fn cleanup_scope(&self, scope_id: &str) -> usize {
        let Ok(mut temporary) = self.temporary.write() else {
            return 0;
        };
        let before = temporary.len();
        temporary.retain(|_, g| g.scope_id != scope_id);
        let removed = before - temporary.len();
        if removed > 0 {
            tracing::debug!(
                "[GateRegistry] Cleaned up {} temporary gate(s) for scope {}",
                removed,
                scope_id
            );
        }
        removed
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut temporary) = self.temporary.write() else {
            return 0;
        };
        let before = temporary.len();
        temporary.retain(|_, g| !g.definition.is_expired(now));
        before - temporary.len()
    }

    pub fn temporary_count(&self) -> usize {
        self.temporary.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn list_temporary(&self) -> Vec<TemporaryGate> {
        let Ok(temporary) = self.temporary.read() else {
            return Vec::new();
        };
        let mut gates: Vec<TemporaryGate> = temporary.values().cloned().collect();
        gates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        gates
    }

    // ─── Combined ──────────────────────────────────────────────────────────

    /// Temporary first, then canonical.
    pub fn get(&self, id: &str) -> Option<GateDefinition> {
        self.find_temporary(id)
            .map(|g| g.definition)
            .or_else(|| self.canonical(id))
    }
}
