//! Configuration Management
//!
//! Handles persistent configuration storage for tazure.

use crate::azure::client::DEFAULT_MANAGEMENT_ENDPOINT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment override for the management endpoint (sovereign clouds)
pub const MANAGEMENT_ENDPOINT_ENV: &str = "AZURE_MANAGEMENT_ENDPOINT";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// ARM endpoint, e.g. `https://management.usgovcloudapi.net`
    #[serde(default)]
    pub management_endpoint: Option<String>,
    /// Per-request HTTP timeout
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Deadline for a whole node expansion
    #[serde(default)]
    pub expand_timeout_secs: Option<u64>,
    /// Last expanded node id
    #[serde(default)]
    pub last_node: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tazure").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file: {:#}", e);
                Self::default()
            }
        }
    }

    /// Load from an explicit path; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective endpoint (CLI > environment > config > public cloud)
    pub fn effective_endpoint(&self, cli: Option<&str>) -> String {
        self.resolve_endpoint(cli, std::env::var(MANAGEMENT_ENDPOINT_ENV).ok())
    }

    fn resolve_endpoint(&self, cli: Option<&str>, env: Option<String>) -> String {
        cli.map(str::to_string)
            .or(env)
            .or_else(|| self.management_endpoint.clone())
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MANAGEMENT_ENDPOINT.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// No deadline unless configured
    pub fn expand_timeout(&self) -> Option<Duration> {
        self.expand_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    /// Set last node and save
    pub fn set_last_node(&mut self, node_id: &str) -> Result<()> {
        self.last_node = Some(node_id.to_string());
        self.save()
    }
}
