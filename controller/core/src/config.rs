// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Controller configuration: YAML file plus `FLOTILLA_*` environment
//! overrides, with working defaults for local development.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// HTTP bind address.
    pub bind_addr: String,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Static bearer secret for admin-tier endpoints.
    pub admin_token: String,
    /// Static bearer secret gating agent self-registration.
    pub registration_token: String,
    /// Health probe interval in seconds.
    pub probe_interval_secs: u64,
    /// Per-probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Default timeout forwarded with exec requests when the caller
    /// supplies none.
    pub default_exec_timeout_ms: u64,
    /// Feature flag gating ssh-kind execution.
    pub ssh_exec_enabled: bool,
    /// Fleet event bus buffer capacity.
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8700".to_string(),
            database_url: "postgres://localhost/flotilla".to_string(),
            admin_token: String::new(),
            registration_token: String::new(),
            probe_interval_secs: 15,
            probe_timeout_ms: 3_000,
            default_exec_timeout_ms: 120_000,
            ssh_exec_enabled: false,
            event_capacity: 1024,
        }
    }
}

impl ControllerConfig {
    /// Load from a YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FLOTILLA_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("FLOTILLA_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("FLOTILLA_ADMIN_TOKEN") {
            self.admin_token = v;
        }
        if let Ok(v) = std::env::var("FLOTILLA_REGISTRATION_TOKEN") {
            self.registration_token = v;
        }
        if let Ok(v) = std::env::var("FLOTILLA_PROBE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.probe_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("FLOTILLA_SSH_EXEC_ENABLED") {
            self.ssh_exec_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = ControllerConfig::default();
        assert_eq!(config.probe_interval_secs, 15);
        assert!(!config.ssh_exec_enabled);
    }

    #[test]
    fn loads_partial_yaml_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "admin_token: s3cret\nprobe_interval_secs: 5").unwrap();
        let config = ControllerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.admin_token, "s3cret");
        assert_eq!(config.probe_interval_secs, 5);
        assert_eq!(config.bind_addr, ControllerConfig::default().bind_addr);
    }
}
