//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DOCWIRE_CONFIG or --config)
//! 3. Environment variables

use crate::node::{parse_address, NodeOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seed addresses (`host[:port]`) used to discover the replica set.
    pub seeds: Vec<String>,
    /// Replica set name, used in error messages.
    pub replica_set: Option<String>,
    /// Timeouts and intervals.
    pub options: ReplicaSetOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            seeds: vec!["127.0.0.1:27017".to_string()],
            replica_set: None,
            options: ReplicaSetOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DOCWIRE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Yaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(seeds) = var("DOCWIRE_SEEDS") {
            let seeds = parse_seed_list(&seeds);
            if !seeds.is_empty() {
                self.seeds = seeds;
            }
        }

        if let Some(name) = var("DOCWIRE_REPLICA_SET") {
            let name = name.trim();
            self.replica_set = (!name.is_empty()).then(|| name.to_string());
        }

        self.options.apply_overrides(var);
    }

    /// Checks that there is at least one seed and that every seed parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one seed address is required".to_string(),
            ));
        }
        for seed in &self.seeds {
            parse_address(seed).map_err(|_| {
                ConfigError::Invalid(format!("invalid seed address '{seed}'"))
            })?;
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Yaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

/// Timeouts and intervals of a replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSetOptions {
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-operation socket timeout in milliseconds.
    pub timeout_ms: u64,
    /// How long a down node is skipped before it is tried again.
    pub down_interval_ms: u64,
    /// How long a node's role information is trusted.
    pub refresh_interval_ms: u64,
}

impl Default for ReplicaSetOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            timeout_ms: 5_000,
            down_interval_ms: 30_000,
            refresh_interval_ms: 300_000,
        }
    }
}

impl ReplicaSetOptions {
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let millis = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(ms) = millis("DOCWIRE_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = millis("DOCWIRE_TIMEOUT_MS") {
            self.timeout_ms = ms;
        }
        if let Some(ms) = millis("DOCWIRE_DOWN_INTERVAL_MS") {
            self.down_interval_ms = ms;
        }
        if let Some(ms) = millis("DOCWIRE_REFRESH_INTERVAL_MS") {
            self.refresh_interval_ms = ms;
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn down_interval(&self) -> Duration {
        Duration::from_millis(self.down_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Options for each node of the set.
    pub fn node_options(&self) -> NodeOptions {
        NodeOptions::default()
            .with_connect_timeout(self.connect_timeout())
            .with_timeout(self.timeout())
    }
}

/// Splits a comma-separated seed list, dropping empty entries.
pub fn parse_seed_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Problems loading, saving or validating driver settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access driver settings at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("driver settings at {} are not valid YAML: {message}", path.display())]
    Yaml { path: PathBuf, message: String },

    #[error("unusable driver settings: {0}")]
    Invalid(String),
}
