//! Tool configuration: `caravan.yaml` at the project root.
//!
//! Connection entries for each target instance, the migrations and state
//! locations, and the defaults used when flags are omitted. Credentials may
//! be left out of the file and supplied through environment variables.

use crate::error::{CaravanError, Result};
use crate::io;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// InstanceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Base URL of the instance's resource API.
    pub url: String,

    /// Bearer token for the instance API. Left empty in committed config;
    /// `CARAVAN_TOKEN` or `CARAVAN_TOKEN_<NAME>` overrides at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl InstanceConfig {
    /// Token resolution order: instance-specific env var, shared env var,
    /// then the configured value.
    pub fn resolved_token(&self, name: &str) -> Option<String> {
        let specific = format!(
            "CARAVAN_TOKEN_{}",
            name.to_uppercase().replace('-', "_")
        );
        std::env::var(&specific)
            .ok()
            .or_else(|| std::env::var("CARAVAN_TOKEN").ok())
            .or_else(|| self.token.clone())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Target instances, keyed by name.
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceConfig>,

    /// Instance used when `--instance` is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_instance: Option<String>,

    /// Plain migrations root, relative to the project root.
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,

    /// Instance state directory. Relative paths resolve against the
    /// project root; `~` resolves against the home directory so teams can
    /// point every checkout at one shared store.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_version() -> u32 {
    1
}

fn default_migrations_dir() -> String {
    paths::MIGRATIONS_DIR.to_string()
}

fn default_state_dir() -> String {
    paths::STATE_DIR.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            instances: BTreeMap::new(),
            default_instance: None,
            migrations_dir: default_migrations_dir(),
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CaravanError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&path, data.as_bytes())
    }

    pub fn instance(&self, name: &str) -> Result<&InstanceConfig> {
        self.instances
            .get(name)
            .ok_or_else(|| CaravanError::InstanceNotFound(name.to_string()))
    }

    /// Pick the instance to target: the explicit flag, else the configured
    /// default.
    pub fn select_instance<'a>(&'a self, flag: Option<&'a str>) -> Result<&'a str> {
        if let Some(name) = flag {
            self.instance(name)?;
            return Ok(name);
        }
        match self.default_instance.as_deref() {
            Some(name) => {
                self.instance(name)?;
                Ok(name)
            }
            None => Err(CaravanError::InstanceNotFound(
                "no --instance given and no default_instance configured".to_string(),
            )),
        }
    }

    pub fn migrations_root(&self, root: &Path) -> PathBuf {
        root.join(&self.migrations_dir)
    }

    pub fn state_root(&self, root: &Path) -> PathBuf {
        if let Some(rest) = self.state_dir.strip_prefix("~/") {
            if let Some(home) = home::home_dir() {
                return home.join(rest);
            }
        }
        root.join(&self.state_dir)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
