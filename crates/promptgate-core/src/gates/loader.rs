//! Canonical gate definition sources.
//!
//! Gate files are YAML, one gate per file. A gate can live at
//! `<dir>/<id>.yaml` or inside its own folder as `<dir>/<id>/gate.yaml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::GateDefinition;

pub trait GateDefinitionLoader: Send + Sync {
    fn load(&self, id: &str) -> Option<GateDefinition>;
    fn list_ids(&self) -> Vec<String>;
}

/// Loads gates from a directory of YAML files.
#[derive(Debug, Clone)]
pub struct YamlGateLoader {
    dir: PathBuf,
}

impl YamlGateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidate_paths(&self, id: &str) -> Vec<PathBuf> {
        vec![
            self.dir.join(format!("{}.yaml", id)),
            self.dir.join(format!("{}.yml", id)),
            self.dir.join(id).join("gate.yaml"),
            self.dir.join(id).join("gate.yml"),
        ]
    }

    fn read(path: &Path) -> Option<GateDefinition> {
        let content = std::fs::read_to_string(path).ok()?;
        match GateDefinition::from_yaml(&content) {
            Ok(gate) => Some(gate),
            Err(e) => {
                tracing::warn!("[GateLoader] Skipping {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Every parseable gate file in the directory.
    fn scan(&self) -> Vec<GateDefinition> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut gates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                for name in ["gate.yaml", "gate.yml"] {
                    if let Some(gate) = Self::read(&path.join(name)) {
                        gates.push(gate);
                        break;
                    }
                }
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(ext, "yaml" | "yml") {
                if let Some(gate) = Self::read(&path) {
                    gates.push(gate);
                }
            }
        }
        gates
    }
}

impl GateDefinitionLoader for YamlGateLoader {
    fn load(&self, id: &str) -> Option<GateDefinition> {
        if id.contains('/') || id.contains("..") {
            return None;
        }
        for path in self.candidate_paths(id) {
            if path.is_file() {
                if let Some(gate) = Self::read(&path) {
                    return Some(gate);
                }
            }
        }
        // File names need not match ids.
        self.scan().into_iter().find(|g| g.id == id)
    }

    fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scan().into_iter().map(|g| g.id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// In-memory gate source, mainly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticGateLoader {
    gates: HashMap<String, GateDefinition>,
}

impl StaticGateLoader {
    pub fn new(gates: Vec<GateDefinition>) -> Self {
        Self {
            gates: gates.into_iter().map(|g| (g.id.clone(), g)).collect(),
        }
    }
}

impl GateDefinitionLoader for StaticGateLoader {
    fn load(&self, id: &str) -> Option<GateDefinition> {
        self.gates.get(id).cloned()
    }

    fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.gates.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_loader_file_and_folder_layouts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("code-quality.yaml"),
            "id: code-quality\nname: Code Quality\npass_criteria:\n  - \"min_words:10\"\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("security")).unwrap();
        std::fs::write(
            dir.path().join("security/gate.yaml"),
            "id: security\nguidance: Validate inputs.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("renamed.yml"), "id: tone\n").unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "id: [").unwrap();

        let loader = YamlGateLoader::new(dir.path());
        assert_eq!(
            loader.list_ids(),
            vec!["code-quality".to_string(), "security".to_string(), "tone".to_string()]
        );
        assert_eq!(loader.load("security").unwrap().guidance, "Validate inputs.");
        assert_eq!(loader.load("tone").unwrap().name, "tone");
        assert!(loader.load("missing").is_none());
        assert!(loader.load("../etc").is_none());
    }

    #[test]
    fn test_static_loader() {
        let loader = StaticGateLoader::new(vec![GateDefinition::new("a", "A")]);
        assert!(loader.load("a").is_some());
        assert_eq!(loader.list_ids(), vec!["a".to_string()]);
    }
}
