//! Node configuration: a single JSON document, immutable after load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub network: NetworkConfig,
    pub storages: BTreeMap<String, ComponentConfig>,
    pub loggers: BTreeMap<String, ComponentConfig>,
    pub services: BTreeMap<String, ComponentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub config: PathBuf,
    pub plugins: PathBuf,
    pub runtime: PathBuf,
    pub spool: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config: PathBuf::new(),
            plugins: PathBuf::from(paths::DEFAULT_PLUGINS_DIR),
            runtime: PathBuf::from(paths::DEFAULT_RUNTIME_DIR),
            spool: PathBuf::from(paths::DEFAULT_SPOOL_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub hostname: String,
    /// Inclusive port range handed to the port allocator.
    pub ports: (u16, u16),
    pub threads: u32,
    /// Control endpoints to bind; relative names live under the runtime dir.
    pub endpoints: Vec<String>,
    pub announce: Option<AnnounceConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            ports: (32_000, 32_999),
            threads: 1,
            endpoints: vec!["control.sock".to_string()],
            announce: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceConfig {
    pub endpoint: String,
    #[serde(default = "default_announce_interval")]
    pub interval_secs: u64,
}

fn default_announce_interval() -> u64 {
    5
}

/// One pluggable component instance: its registered type plus free-form args.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Value,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ConfigError::Invalid(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: Config = serde_json::from_str(&contents).map_err(|e| {
            ConfigError::Invalid(format!("failed to parse {}: {e}", path.display()))
        })?;

        config.paths.config = path.to_path_buf();
        config.normalize()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        let (lo, hi) = self.network.ports;
        if lo > hi {
            return Err(ConfigError::Invalid(format!(
                "invalid port range: {lo} > {hi}"
            )));
        }
        if self.network.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one control endpoint is required".to_string(),
            ));
        }
        if self.network.hostname.is_empty() {
            self.network.hostname =
                whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
        }
        Ok(())
    }

    /// Storage instance backing the app catalog, when one is configured.
    ///
    /// The catalog persists through the instance named `core`.
    pub fn core_storage(&self) -> Option<&ComponentConfig> {
        self.storages.get("core")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.json");
        fs::write(&path, contents).expect("write config");
        (dir, path)
    }

    #[test]
    fn full_document_roundtrip() {
        let (_dir, path) = write_config(
            r#"{
                "paths": {"runtime": "/tmp/node-run", "spool": "/tmp/node-spool"},
                "network": {
                    "hostname": "node-1",
                    "ports": [41000, 41099],
                    "threads": 4,
                    "endpoints": ["control.sock"],
                    "announce": {"endpoint": "239.0.0.1:5001", "interval_secs": 7}
                },
                "storages": {"core": {"type": "memory", "args": {}}},
                "loggers": {"core": {"type": "core", "args": {"verbosity": "info"}}},
                "services": {"logging": {"type": "logging", "args": {}}}
            }"#,
        );

        let config = Config::load(&path).expect("load config");
        assert_eq!(config.network.hostname, "node-1");
        assert_eq!(config.network.ports, (41_000, 41_099));
        assert_eq!(config.network.threads, 4);
        assert_eq!(config.paths.runtime, PathBuf::from("/tmp/node-run"));
        assert_eq!(config.core_storage().map(|c| c.kind.as_str()), Some("memory"));
        assert_eq!(config.loggers["core"].args["verbosity"], "info");
        let announce = config.network.announce.expect("announce section");
        assert_eq!(announce.interval_secs, 7);
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let (_dir, path) = write_config(r#"{"network": {"hostname": "n"}}"#);
        let config = Config::load(&path).expect("load config");
        assert_eq!(config.network.ports, (32_000, 32_999));
        assert_eq!(config.network.endpoints, vec!["control.sock".to_string()]);
        assert!(config.storages.is_empty());
        assert!(config.network.announce.is_none());
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let (_dir, path) =
            write_config(r#"{"network": {"hostname": "n", "ports": [4000, 3000]}}"#);
        let err = Config::load(&path).expect_err("range must be rejected");
        assert!(err.to_string().contains("invalid port range"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let (_dir, path) = write_config("{not json");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn empty_hostname_gets_a_default() {
        let (_dir, path) = write_config("{}");
        let config = Config::load(&path).expect("load config");
        assert!(!config.network.hostname.is_empty());
    }
}
