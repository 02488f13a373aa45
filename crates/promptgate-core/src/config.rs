//! Engine configuration.
//!
//! Loaded from an explicit path, then `PROMPTGATE_CONFIG`, then built-in
//! defaults. Every field has a default so partial files are fine. Files
//! ending in `.json` are read as JSON, everything else as YAML.
//!
//! ```yaml
//! prompts_dir: ./prompts
//! gates_dir: ./gates
//! retry:
//!   gate_review_max_attempts: 3
//!   shell_verify_max_attempts: 5
//! gates:
//!   default_mode: enforce
//! frameworks:
//!   active: CAGEERF
//! persistence:
//!   enabled: true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::frameworks::FrameworkDefinition;
use crate::injection::InjectionConfig;
use crate::models::GateMode;

pub const CONFIG_PATH_ENV: &str = "PROMPTGATE_CONFIG";
pub const STATE_DIR_ENV: &str = "PROMPTGATE_STATE_DIR";

const DEFAULT_STATE_DIR_NAME: &str = ".promptgate";

/// Named retry ceilings. Gate reviews and shell verification loops have
/// separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed gate verdicts tolerated before escalation.
    pub gate_review_max_attempts: u32,
    /// Failed verification runs tolerated before escalation.
    pub shell_verify_max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            gate_review_max_attempts: 3,
            shell_verify_max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub default_timeout_ms: u64,
    /// Marker file path, relative to the state dir unless absolute.
    pub marker_file: PathBuf,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 300_000,
            marker_file: PathBuf::from("runtime-state").join("verify-active.json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    pub default_mode: GateMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworksConfig {
    pub active: Option<String>,
    pub definitions: Vec<FrameworkDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// SQLite file, relative to the state dir unless absolute.
    pub database_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_file: PathBuf::from("sessions.db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub state_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub gates_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub verification: VerificationConfig,
    pub gates: GatesConfig,
    pub injection: InjectionConfig,
    pub frameworks: FrameworksConfig,
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Parse from YAML or JSON text. `format_hint` is a file extension.
    pub fn from_str_with_hint(text: &str, format_hint: Option<&str>) -> Result<Self, EngineError> {
        match format_hint {
            Some("json") => serde_json::from_str(text)
                .map_err(|e| EngineError::Parse(format!("Invalid config JSON: {}", e))),
            _ => serde_yaml::from_str(text)
                .map_err(|e| EngineError::Parse(format!("Invalid config YAML: {}", e))),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Io(format!("Failed to read config '{}': {}", path.display(), e))
        })?;
        let ext = path.extension().and_then(|e| e.to_str());
        let mut config = Self::from_str_with_hint(&text, ext)?;

        // Relative directories in a config file are relative to that file.
        if let Some(base) = path.parent() {
            for dir in [&mut config.state_dir, &mut config.prompts_dir, &mut config.gates_dir] {
                if let Some(d) = dir.as_mut() {
                    if d.is_relative() {
                        *d = base.join(&*d);
                    }
                }
            }
        }
        Ok(config)
    }

    /// Explicit path, then `PROMPTGATE_CONFIG`, then defaults. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let from_env = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let mut config = match (path, from_env) {
            (Some(p), _) => {
                tracing::info!("[Config] Loading {}", p.display());
                Self::from_file(p)?
            }
            (None, Some(p)) => {
                tracing::info!("[Config] Loading {} (from {})", p.display(), CONFIG_PATH_ENV);
                Self::from_file(&p)?
            }
            (None, None) => Self::default(),
        };

        if let Some(dir) = std::env::var(STATE_DIR_ENV).ok().filter(|s| !s.trim().is_empty()) {
            config.state_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    /// Resolved state directory (`~/.promptgate` by default).
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|h| h.join(DEFAULT_STATE_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR_NAME))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.resolve_in_state_dir(&self.verification.marker_file)
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_in_state_dir(&self.persistence.database_file)
    }

    fn resolve_in_state_dir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.state_dir().join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.gate_review_max_attempts, 3);
        assert_eq!(config.retry.shell_verify_max_attempts, 5);
        assert_eq!(config.verification.default_timeout_ms, 300_000);
        assert_eq!(config.gates.default_mode, GateMode::Enforce);
        assert!(!config.persistence.enabled);
    }

    #[test]
    fn test_partial_yaml() {
        let config = EngineConfig::from_str_with_hint(
            "retry:\n  shell_verify_max_attempts: 2\ngates:\n  default_mode: advise\n",
            Some("yaml"),
        )
        .unwrap();
        assert_eq!(config.retry.shell_verify_max_attempts, 2);
        assert_eq!(config.retry.gate_review_max_attempts, 3);
        assert_eq!(config.gates.default_mode, GateMode::Advise);
    }

    #[test]
    fn test_json_and_state_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promptgate.json");
        std::fs::write(
            &path,
            r#"{"state_dir": "state", "persistence": {"enabled": true}}"#,
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.state_dir(), dir.path().join("state"));
        assert_eq!(
            config.marker_path(),
            dir.path().join("state/runtime-state/verify-active.json")
        );
        assert_eq!(config.database_path(), dir.path().join("state/sessions.db"));
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let err = EngineConfig::from_str_with_hint("retry: [", None).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }
}
