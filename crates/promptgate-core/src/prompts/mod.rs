//! Prompt definitions: load prompt templates from YAML or Markdown files.
//!
//! The prompt library is an external collaborator of the pipeline: the core
//! only asks it for a definition by id. Definitions live in a directory that
//! can be redirected with `PROMPTGATE_PROMPTS_PATH`.
//!
//! ```yaml
//! id: "code_review"
//! name: "Code Review"
//! category: "development"
//! execution: template
//! system_message: "You are a meticulous reviewer."
//! template: |
//!   Review the following code for {{focus}}:
//!   {{code}}
//! arguments:
//!   - name: code
//!     required: true
//!   - name: focus
//!     default: "correctness"
//! gates:
//!   - code-quality
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::fuzzy;
use crate::models::PromptExecution;

/// Environment variable that redirects where prompt definitions are read from.
pub const PROMPTS_PATH_ENV: &str = "PROMPTGATE_PROMPTS_PATH";

/// A declared prompt argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A step of a prompt that is itself a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStepRef {
    pub prompt_id: String,
    #[serde(default)]
    pub args: String,
}

/// A prompt definition loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Category used by category-level injection rules.
    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub execution: PromptExecution,

    #[serde(default)]
    pub system_message: Option<String>,

    /// User message template with `{{name}}` placeholders.
    #[serde(default)]
    pub template: String,

    #[serde(default)]
    pub arguments: Vec<PromptArgument>,

    /// Canonical gate ids always attached to this prompt.
    #[serde(default)]
    pub gates: Vec<String>,

    /// When non-empty, running this prompt runs these steps as a chain.
    #[serde(default)]
    pub chain_steps: Vec<ChainStepRef>,
}

impl PromptDefinition {
    pub fn new(id: impl Into<String>, template: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            category: None,
            execution: PromptExecution::Template,
            system_message: None,
            template: template.into(),
            arguments: Vec::new(),
            gates: Vec::new(),
            chain_steps: Vec::new(),
        }
    }

    /// Parse a prompt definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse prompt YAML: {}", e))
    }

    /// Load a prompt definition from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read prompt file '{}': {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Parse a prompt from a Markdown file with YAML frontmatter; the body
    /// becomes the template and the id is derived from the file name.
    pub fn from_markdown(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read prompt markdown '{}': {}", path.display(), e))?;

        let parts: Vec<&str> = content.splitn(3, "---").collect();
        if parts.len() < 3 {
            return Err(format!(
                "Invalid prompt markdown '{}': missing YAML frontmatter",
                path.display()
            ));
        }

        #[derive(Deserialize)]
        struct FrontMatter {
            name: Option<String>,
            description: Option<String>,
            category: Option<String>,
            #[serde(default)]
            execution: PromptExecution,
            system_message: Option<String>,
            #[serde(default)]
            arguments: Vec<PromptArgument>,
            #[serde(default)]
            gates: Vec<String>,
        }

        let fm: FrontMatter = serde_yaml::from_str(parts[1].trim()).map_err(|e| {
            format!("Failed to parse frontmatter in '{}': {}", path.display(), e)
        })?;

        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            name: fm.name.unwrap_or_else(|| id.clone()),
            id,
            description: fm.description,
            category: fm.category,
            execution: fm.execution,
            system_message: fm.system_message,
            template: parts[2].trim().to_string(),
            arguments: fm.arguments,
            gates: fm.gates,
            chain_steps: Vec::new(),
        })
    }

    /// Declared defaults for arguments that have one.
    pub fn default_arguments(&self) -> HashMap<String, String> {
        self.arguments
            .iter()
            .filter_map(|a| a.default.clone().map(|d| (a.name.clone(), d)))
            .collect()
    }

    pub fn missing_required(&self, provided: &HashMap<String, String>) -> Vec<String> {
        self.arguments
            .iter()
            .filter(|a| a.required && a.default.is_none())
            .filter(|a| provided.get(&a.name).map(|v| v.is_empty()).unwrap_or(true))
            .map(|a| a.name.clone())
            .collect()
    }
}

/// In-memory registry of prompt definitions.
pub struct PromptLibrary {
    prompts: RwLock<HashMap<String, PromptDefinition>>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self {
            prompts: RwLock::new(HashMap::new()),
        }
    }

    /// Load all prompts from a directory (`.yaml`, `.yml`, `.md`).
    pub fn load_dir(&self, dir: &Path) -> Result<usize, String> {
        if !dir.is_dir() {
            return Err(format!("Prompt directory '{}' does not exist", dir.display()));
        }

        let mut loaded = Vec::new();
        for entry in std::fs::read_dir(dir)
            .map_err(|e| format!("Failed to read directory '{}': {}", dir.display(), e))?
        {
            let entry = entry.map_err(|e| format!("Directory entry error: {}", e))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

            let prompt = match ext {
                "yaml" | "yml" => PromptDefinition::from_file(&path)?,
                "md" => PromptDefinition::from_markdown(&path)?,
                _ => continue,
            };

            tracing::debug!("[PromptLibrary] Loaded prompt: {} ({})", prompt.id, prompt.name);
            loaded.push(prompt);
        }

        let count = loaded.len();
        let mut prompts = self
            .prompts
            .write()
            .map_err(|e| format!("Prompt library lock poisoned: {}", e))?;
        for prompt in loaded {
            prompts.insert(prompt.id.clone(), prompt);
        }
        Ok(count)
    }

    /// Load from `PROMPTGATE_PROMPTS_PATH` when set, otherwise from the
    /// configured directory. Missing directories are not an error.
    pub fn load_default(&self, configured_dir: Option<&Path>) -> usize {
        let from_env = std::env::var(PROMPTS_PATH_ENV).ok().filter(|s| !s.is_empty());
        let dir = match (&from_env, configured_dir) {
            (Some(env_dir), _) => Path::new(env_dir).to_path_buf(),
            (None, Some(dir)) => dir.to_path_buf(),
            (None, None) => return 0,
        };

        if !dir.is_dir() {
            tracing::warn!("[PromptLibrary] Prompt directory '{}' not found", dir.display());
            return 0;
        }

        match self.load_dir(&dir) {
            Ok(n) => {
                tracing::info!("[PromptLibrary] Loaded {} prompts from '{}'", n, dir.display());
                n
            }
            Err(e) => {
                tracing::warn!("[PromptLibrary] Failed to load from '{}': {}", dir.display(), e);
                0
            }
        }
    }

    pub fn insert(&self, prompt: PromptDefinition) {
        if let Ok(mut prompts) = self.prompts.write() {
            prompts.insert(prompt.id.clone(), prompt);
        }
    }

    /// Get a prompt by id, falling back to a case-insensitive match.
    pub fn get(&self, id: &str) -> Option<PromptDefinition> {
        let prompts = self.prompts.read().ok()?;
        if let Some(p) = prompts.get(id) {
            return Some(p.clone());
        }
        let lower = id.to_lowercase();
        prompts
            .values()
            .find(|p| p.id.to_lowercase() == lower)
            .cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .prompts
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.prompts.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// "Did you mean" candidates for an unknown prompt id.
    pub fn suggest(&self, id: &str) -> Vec<String> {
        fuzzy::suggest(id, self.ids().iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_yaml() {
        let yaml = r#"
id: "code_review"
name: "Code Review"
category: "development"
template: "Review {{code}}"
arguments:
  - name: code
    required: true
  - name: focus
    default: "correctness"
gates:
  - code-quality
"#;
        let prompt = PromptDefinition::from_yaml(yaml).unwrap();
        assert_eq!(prompt.id, "code_review");
        assert_eq!(prompt.execution, PromptExecution::Template);
        assert_eq!(prompt.gates, vec!["code-quality".to_string()]);
        assert_eq!(
            prompt.default_arguments().get("focus").map(String::as_str),
            Some("correctness")
        );
        assert_eq!(prompt.missing_required(&HashMap::new()), vec!["code".to_string()]);
    }

    #[test]
    fn test_load_dir_yaml_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("summarize.yaml"),
            "id: summarize\nname: Summarize\ntemplate: \"Summarize {{text}}\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("analyze.md"),
            "---\nname: Analyze\ncategory: analysis\n---\nAnalyze {{topic}} carefully.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let library = PromptLibrary::new();
        assert_eq!(library.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(library.ids(), vec!["analyze".to_string(), "summarize".to_string()]);

        let analyze = library.get("ANALYZE").unwrap();
        assert_eq!(analyze.category.as_deref(), Some("analysis"));
        assert_eq!(analyze.template, "Analyze {{topic}} carefully.");
    }

    #[test]
    fn test_suggest_unknown_prompt() {
        let library = PromptLibrary::new();
        library.insert(PromptDefinition::new("summarize", "x"));
        library.insert(PromptDefinition::new("analyze", "y"));
        assert_eq!(library.suggest("sumarize"), vec!["summarize".to_string()]);
        assert!(library.suggest("completely-different").is_empty());
    }
}
