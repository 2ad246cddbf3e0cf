//! Loader configuration.
//!
//! ```toml
//! [store.retry]
//! max_attempts = 5
//! backoff_ms = 250
//!
//! [linker]
//! edge_policy = "exact_set"
//!
//! [inputs]
//! geography = ["data/states.json", "data/regions.json"]
//! taxonomy = ["data/products.json"]
//! entities = ["data/usda_entities.json"]
//! crosswalk = "data/crosswalk.json"
//! enrichments = ["data/bfa_enrichment.json"]
//! rules = "data/rules.json"
//!
//! [logging]
//! json = false
//! filter = "info,fielder_graph=debug"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::linker::EdgePolicy;
use crate::storage::RetryPolicy;
use crate::{Error, Result};

/// Environment variable naming the config file (read by the CLI).
pub const CONFIG_ENV: &str = "FIELDER_CONFIG";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub store: StoreConfig,
    pub linker: LinkerConfig,
    pub inputs: InputPaths,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub edge_policy: EdgePolicy,
}

/// Input files. Empty lists are allowed; a missing `rules` file means the
/// built-in default rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub geography: Vec<PathBuf>,
    pub taxonomy: Vec<PathBuf>,
    pub entities: Vec<PathBuf>,
    pub crosswalk: Option<PathBuf>,
    pub enrichments: Vec<PathBuf>,
    pub rules: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human format.
    pub json: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { json: false, filter: "info".into() }
    }
}

impl LoaderConfig {
    /// Load configuration from a TOML file. Relative input paths are
    /// resolved against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.inputs.rebase(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: LoaderConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.retry.max_attempts == 0 {
            return Err(Error::Config("store.retry.max_attempts must be > 0".into()));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(Error::Config("logging.filter must not be empty".into()));
        }
        Ok(())
    }
}

impl InputPaths {
    fn rebase(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.geography.iter_mut().for_each(fix);
        self.taxonomy.iter_mut().for_each(fix);
        self.entities.iter_mut().for_each(fix);
        self.enrichments.iter_mut().for_each(fix);
        self.crosswalk.iter_mut().for_each(fix);
        self.rules.iter_mut().for_each(fix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = LoaderConfig::from_toml("").unwrap();
        assert_eq!(config, LoaderConfig::default());
        assert_eq!(config.store.retry.max_attempts, 3);
        assert_eq!(config.linker.edge_policy, EdgePolicy::Cumulative);
    }

    #[test]
    fn test_parse_sections() {
        let config = LoaderConfig::from_toml(
            r#"
            [store.retry]
            max_attempts = 5

            [linker]
            edge_policy = "exact_set"

            [inputs]
            entities = ["entities.json"]
            crosswalk = "crosswalk.json"

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.store.retry.max_attempts, 5);
        assert_eq!(config.store.retry.backoff_ms, 200);
        assert_eq!(config.linker.edge_policy, EdgePolicy::ExactSet);
        assert_eq!(config.inputs.crosswalk, Some(PathBuf::from("crosswalk.json")));
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            LoaderConfig::from_toml("[store.retry]\nmax_attempts = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LoaderConfig::from_toml("[linker]\nedge_policy = \"sometimes\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rebase_relative_paths() {
        let mut inputs = InputPaths {
            entities: vec![PathBuf::from("e.json"), PathBuf::from("/abs/e.json")],
            rules: Some(PathBuf::from("rules.json")),
            ..Default::default()
        };
        inputs.rebase(Path::new("/etc/fielder"));
        assert_eq!(inputs.entities[0], PathBuf::from("/etc/fielder/e.json"));
        assert_eq!(inputs.entities[1], PathBuf::from("/abs/e.json"));
        assert_eq!(inputs.rules, Some(PathBuf::from("/etc/fielder/rules.json")));
    }
}
