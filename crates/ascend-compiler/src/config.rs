//! Compiler configuration, loadable from TOML

use std::path::{Path, PathBuf};

use ascend_core::WarningLevel;
use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// What to do with a simulation whose instantiation reported errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstantiationPolicy {
    /// Destroy the partial tree and return the diagnostics as an error.
    #[default]
    FailFast,
    /// Keep everything that did instantiate and hand back an incomplete
    /// simulation together with its diagnostics.
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Fold constants and constant subexpressions when relations are built.
    #[serde(default = "default_true")]
    pub simplify_relations: bool,
    #[serde(default)]
    pub warning_level: WarningLevel,
    #[serde(default)]
    pub policy: InstantiationPolicy,
    /// Directories searched for library files.
    #[serde(default)]
    pub library_path: Vec<PathBuf>,
    #[serde(default = "default_max_while_iterations")]
    pub max_while_iterations: usize,
    /// Run `on_load` on every new simulation when its type defines one.
    #[serde(default = "default_true")]
    pub default_on_load: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_while_iterations() -> usize {
    10_000
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            simplify_relations: true,
            warning_level: WarningLevel::default(),
            policy: InstantiationPolicy::default(),
            library_path: Vec::new(),
            max_while_iterations: default_max_while_iterations(),
            default_on_load: true,
        }
    }
}

impl CompilerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CompileError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, CompileError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_simplify(mut self, simplify: bool) -> Self {
        self.simplify_relations = simplify;
        self
    }

    pub fn with_policy(mut self, policy: InstantiationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Find `file` in the library path. Absolute or directly reachable paths
    /// are returned unchanged.
    pub fn find_library_file(&self, file: &Path) -> Option<PathBuf> {
        if file.is_file() {
            return Some(file.to_path_buf());
        }
        self.library_path
            .iter()
            .map(|dir| dir.join(file))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = CompilerConfig::from_toml_str("").unwrap();
        assert!(config.simplify_relations);
        assert_eq!(config.policy, InstantiationPolicy::FailFast);
        assert_eq!(config.warning_level, WarningLevel::All);
        assert_eq!(config.max_while_iterations, 10_000);
    }

    #[test]
    fn test_full_toml() {
        let config = CompilerConfig::from_toml_str(
            r#"
simplify_relations = false
warning_level = "errors"
policy = "best-effort"
library_path = ["models", "/usr/share/ascend"]
max_while_iterations = 50
default_on_load = false
"#,
        )
        .unwrap();
        assert!(!config.simplify_relations);
        assert_eq!(config.warning_level, WarningLevel::Errors);
        assert_eq!(config.policy, InstantiationPolicy::BestEffort);
        assert_eq!(config.library_path.len(), 2);
        assert_eq!(config.max_while_iterations, 50);
        assert!(!config.default_on_load);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            CompilerConfig::from_toml_str("policy = \"sometimes\""),
            Err(CompileError::Config(_))
        ));
    }

    #[test]
    fn test_library_path_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("system.json")).unwrap();
        writeln!(f, "{{\"types\": []}}").unwrap();

        let config = CompilerConfig {
            library_path: vec![dir.path().to_path_buf()],
            ..CompilerConfig::default()
        };
        let found = config.find_library_file(Path::new("system.json")).unwrap();
        assert_eq!(found, dir.path().join("system.json"));
        assert!(config.find_library_file(Path::new("missing.json")).is_none());
    }
}
