//! Configuration loader with layered merging.
//!
//! Layers, lowest to highest priority: built-in defaults, the YAML file, and
//! `TW_*` environment variables.

use super::merge::{deep_merge_all, leaf_paths, nest};
use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of every override variable.
pub const ENV_PREFIX: &str = "TW_";
/// Explicit config file location.
pub const CONFIG_PATH_ENV: &str = "TW_CONFIG_PATH";
/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Configuration layer priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    File = 1,
    Environment = 2,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::File => write!(f, "file"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Environment variable that overrides the leaf at `path`.
pub fn env_var_name(path: &[String]) -> String {
    format!("{}{}", ENV_PREFIX, path.join("_").to_ascii_uppercase())
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: Config,
    config_path: Option<PathBuf>,
    env_overrides: Vec<String>,
}

impl ConfigLoader {
    /// Load using the process environment. `explicit` wins over `TW_CONFIG_PATH`,
    /// which wins over `./config.yaml` (used only when present).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with_env(explicit, |name| std::env::var(name).ok())
    }

    /// Load with a custom environment lookup.
    pub fn load_with_env<F>(explicit: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => match env(CONFIG_PATH_ENV) {
                Some(p) => Some(PathBuf::from(p)),
                None => {
                    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                    default.exists().then_some(default)
                }
            },
        };

        let mut layers: Vec<Value> = Vec::new();

        let defaults = serde_json::to_value(Config::default())?;
        let paths = leaf_paths(&defaults);
        layers.push(defaults);

        if let Some(path) = &config_path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            let file_layer: Value = serde_yaml::from_str(&content)
                .with_context(|| format!("parsing config file {}", path.display()))?;
            debug!(tier = %ConfigTier::File, path = %path.display(), "Loaded config layer");
            layers.push(file_layer);
        }

        let mut env_overrides = Vec::new();
        for path in paths {
            let name = env_var_name(&path);
            let Some(raw) = env(&name) else {
                continue;
            };
            // Values are YAML scalars: "8080" is a number, "true" a bool, "5m" a string.
            let leaf: Value = serde_yaml::from_str(&raw)
                .unwrap_or_else(|_| Value::String(raw.clone()));
            debug!(tier = %ConfigTier::Environment, var = %name, "Applied config override");
            layers.push(nest(&path, leaf));
            env_overrides.push(name);
        }

        let merged = deep_merge_all(layers);
        let config: Config =
            serde_json::from_value(merged).context("invalid configuration")?;
        config.validate()?;

        Ok(Self {
            config,
            config_path,
            env_overrides,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// The config file that was read, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Names of the environment variables that changed a value.
    pub fn env_overrides(&self) -> &[String] {
        &self.env_overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Period;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn env_names_follow_the_path() {
        let path = vec!["scheduler_jobs".to_string(), "due_frequency".to_string()];
        assert_eq!(env_var_name(&path), "TW_SCHEDULER_JOBS_DUE_FREQUENCY");
    }

    #[test]
    fn empty_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "{}\n").unwrap();

        let loader = ConfigLoader::load_with_env(Some(&path), env_of(&[])).unwrap();
        assert_eq!(loader.config(), &Config::default());
        assert!(loader.env_overrides().is_empty());
    }

    #[test]
    fn config_path_env_is_used() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.yaml");
        std::fs::write(&path, "server:\n  host: 0.0.0.0\n").unwrap();

        let loader = ConfigLoader::load_with_env(
            None,
            env_of(&[("TW_CONFIG_PATH", path.to_str().unwrap())]),
        )
        .unwrap();
        assert_eq!(loader.config().server.host, "0.0.0.0");
    }

    #[test]
    fn file_overrides_defaults_field_by_field() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "server:\n  port: 8080\nscheduler_jobs:\n  due_frequency: 1m\n",
        )
        .unwrap();

        let loader = ConfigLoader::load_with_env(Some(&path), env_of(&[])).unwrap();
        let config = loader.config();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.scheduler_jobs.due_frequency, Period::from_secs(60));
        assert_eq!(
            config.scheduler_jobs.overdue_frequency,
            Period::from_secs(86_400)
        );
        assert_eq!(loader.config_path(), Some(path.as_path()));
    }

    #[test]
    fn env_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 8080\n").unwrap();

        let loader = ConfigLoader::load_with_env(
            Some(&path),
            env_of(&[
                ("TW_SERVER_PORT", "9090"),
                ("TW_DATABASE_PATH", "/tmp/tw.db"),
                ("TW_SCHEDULER_JOBS_OVERDUE_SYNTHESIS", "false"),
                ("TW_SCHEDULER_JOBS_NOTIFICATION_CLEANUP", "15m"),
            ]),
        )
        .unwrap();
        let config = loader.config();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.path, PathBuf::from("/tmp/tw.db"));
        assert!(!config.scheduler_jobs.overdue_synthesis);
        assert_eq!(
            config.scheduler_jobs.notification_cleanup,
            Some(Period::from_secs(900))
        );
        assert_eq!(loader.env_overrides().len(), 4);
    }

    #[test]
    fn invalid_values_are_reported() {
        let result = ConfigLoader::load_with_env(
            Some(Path::new("/nonexistent/dir/config.yaml")),
            env_of(&[]),
        );
        assert!(result.is_err());

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "database:\n  driver: mysql\n").unwrap();
        assert!(ConfigLoader::load_with_env(Some(&path), env_of(&[])).is_err());
    }
}
