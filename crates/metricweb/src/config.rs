// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.

use crate::error::SessionId;
use crate::source::SourceSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Directory holding the archives served to clients
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,

    /// Upper bound (and default) for a session's poll timeout, in seconds
    #[serde(default = "default_max_poll_timeout")]
    pub max_poll_timeout_secs: u64,

    /// Allow clients to create contexts on demand
    #[serde(default = "default_true")]
    pub allow_new_contexts: bool,

    /// Allow local-mode contexts
    #[serde(default)]
    pub allow_local: bool,

    /// Every new context must carry credentials
    #[serde(default)]
    pub require_credentials: bool,

    /// Worker threads per fetch batch, in addition to the calling thread
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// Upper bound on points per rendered series
    #[serde(default = "default_max_data_points")]
    pub max_data_points: u64,

    /// Minimum step between points, in seconds
    #[serde(default = "default_step")]
    pub default_step_secs: u64,

    /// Random draws before session-id allocation gives up
    #[serde(default = "default_id_attempts")]
    pub id_allocation_attempts: u32,

    /// Sources bound at start-up; they never expire
    #[serde(default)]
    pub permanent_contexts: Vec<SourceSpec>,

    /// Session id of the first permanent context
    #[serde(default = "default_first_permanent_id")]
    pub first_permanent_id: SessionId,
}

fn default_archive_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_poll_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_fetch_workers() -> usize {
    4
}

fn default_max_data_points() -> u64 {
    1024
}

fn default_step() -> u64 {
    60
}

fn default_id_attempts() -> u32 {
    100
}

fn default_first_permanent_id() -> SessionId {
    1
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            archive_root: default_archive_root(),
            max_poll_timeout_secs: default_max_poll_timeout(),
            allow_new_contexts: true,
            allow_local: false,
            require_credentials: false,
            fetch_workers: default_fetch_workers(),
            max_data_points: default_max_data_points(),
            default_step_secs: default_step(),
            id_allocation_attempts: default_id_attempts(),
            permanent_contexts: Vec::new(),
            first_permanent_id: default_first_permanent_id(),
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn max_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.max_poll_timeout_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_poll_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "max_poll_timeout_secs cannot be 0".into(),
            ));
        }
        if self.id_allocation_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "id_allocation_attempts cannot be 0".into(),
            ));
        }
        if self.max_data_points == 0 {
            return Err(ConfigError::InvalidValue("max_data_points cannot be 0".into()));
        }
        if self.default_step_secs == 0 {
            return Err(ConfigError::InvalidValue("default_step_secs cannot be 0".into()));
        }
        if self.first_permanent_id <= 0 {
            return Err(ConfigError::InvalidValue(
                "first_permanent_id must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: BridgeConfig,
}

impl ConfigBuilder {
    pub fn archive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.archive_root = root.into();
        self
    }

    pub fn max_poll_timeout_secs(mut self, secs: u64) -> Self {
        self.config.max_poll_timeout_secs = secs;
        self
    }

    pub fn allow_new_contexts(mut self, allow: bool) -> Self {
        self.config.allow_new_contexts = allow;
        self
    }

    pub fn allow_local(mut self, allow: bool) -> Self {
        self.config.allow_local = allow;
        self
    }

    pub fn require_credentials(mut self, require: bool) -> Self {
        self.config.require_credentials = require;
        self
    }

    pub fn fetch_workers(mut self, workers: usize) -> Self {
        self.config.fetch_workers = workers;
        self
    }

    pub fn max_data_points(mut self, points: u64) -> Self {
        self.config.max_data_points = points;
        self
    }

    pub fn default_step_secs(mut self, secs: u64) -> Self {
        self.config.default_step_secs = secs;
        self
    }

    pub fn id_allocation_attempts(mut self, attempts: u32) -> Self {
        self.config.id_allocation_attempts = attempts;
        self
    }

    /// Add a context bound at start-up.
    pub fn permanent_context(mut self, spec: SourceSpec) -> Self {
        self.config.permanent_contexts.push(spec);
        self
    }

    pub fn first_permanent_id(mut self, id: SessionId) -> Self {
        self.config.first_permanent_id = id;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.max_poll_timeout_secs, 300);
        assert_eq!(config.max_data_points, 1024);
        assert_eq!(config.default_step_secs, 60);
        assert_eq!(config.id_allocation_attempts, 100);
        assert_eq!(config.first_permanent_id, 1);
        assert!(config.allow_new_contexts);
        assert!(!config.allow_local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfig::builder()
            .archive_root("/srv/archives")
            .max_poll_timeout_secs(60)
            .allow_local(true)
            .fetch_workers(0)
            .permanent_context(SourceSpec::Local)
            .build();
        assert_eq!(config.archive_root, PathBuf::from("/srv/archives"));
        assert_eq!(config.max_poll_timeout(), Duration::from_secs(60));
        assert!(config.allow_local);
        assert_eq!(config.fetch_workers, 0);
        assert_eq!(config.permanent_contexts, vec![SourceSpec::Local]);
    }

    #[test]
    fn test_config_validate() {
        assert!(BridgeConfig::builder()
            .max_poll_timeout_secs(0)
            .build()
            .validate()
            .is_err());
        assert!(BridgeConfig::builder()
            .id_allocation_attempts(0)
            .build()
            .validate()
            .is_err());
        assert!(BridgeConfig::builder()
            .first_permanent_id(0)
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.json");
        let config = BridgeConfig::builder()
            .permanent_context(SourceSpec::Host("db1".into()))
            .build();
        config.to_file(&path).unwrap();
        let loaded = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.permanent_contexts, config.permanent_contexts);
        assert_eq!(loaded.max_poll_timeout_secs, 300);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, r#"{"allow_local": true, "permanent_contexts": ["local:"]}"#).unwrap();
        let loaded = BridgeConfig::from_file(&path).unwrap();
        assert!(loaded.allow_local);
        assert_eq!(loaded.fetch_workers, 4);
        assert_eq!(loaded.permanent_contexts, vec![SourceSpec::Local]);
    }
}
