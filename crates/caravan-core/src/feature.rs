//! Feature manifests: named, reusable deployment bundles.
//!
//! A feature is declared statically as `feature.yaml` in its own directory
//! under the features root, with its migrations in a `migrations/` subtree
//! next to the manifest. Manifests are never mutated by a run; whether a
//! feature has been applied to an instance lives in that instance's state.

use crate::error::{CaravanError, Result};
use crate::io;
use crate::paths;
use crate::state::VarBag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Interactive prompt specification for one missing variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub var: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,

    /// Names of features that must be applied before this one. Must form a
    /// DAG; a cycle is a resolution-time error.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Seed values merged into the shared vars bag before first use. Keys
    /// already present are left alone (first-applied feature wins).
    #[serde(default)]
    pub default_vars: VarBag,

    /// Variable names that must never appear unredacted in logs.
    #[serde(default)]
    pub secret_vars: Vec<String>,

    /// Prompts for variables that are still missing at resolution time.
    #[serde(default)]
    pub questions: Vec<Question>,

    /// Patterns matched against migration relative paths; matching units
    /// are dropped from this feature's pending set entirely.
    #[serde(default)]
    pub exclude_migrations: Vec<String>,

    /// Analogous pattern list for the parallel asset-sync concern, carried
    /// for external collaborators; the engine itself only reports it.
    #[serde(default)]
    pub exclude_assets: Vec<String>,

    /// Registered lifecycle module that also owns best-effort removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            default_vars: VarBag::new(),
            secret_vars: Vec::new(),
            questions: Vec::new(),
            exclude_migrations: Vec::new(),
            exclude_assets: Vec::new(),
            module: None,
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn load(root: &Path, name: &str) -> Result<Self> {
        let manifest = paths::feature_manifest(root, name);
        if !manifest.exists() {
            return Err(CaravanError::FeatureNotFound(name.to_string()));
        }
        let data = std::fs::read_to_string(&manifest)?;
        let feature: Feature = serde_yaml::from_str(&data)?;
        Ok(feature)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        paths::validate_name(&self.name)?;
        let manifest = paths::feature_manifest(root, &self.name);
        if manifest.exists() {
            return Err(CaravanError::FeatureExists(self.name.clone()));
        }
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&manifest, data.as_bytes())
    }

    pub fn list(root: &Path) -> Result<Vec<Self>> {
        let features_dir = paths::features_dir(root);
        if !features_dir.exists() {
            return Ok(Vec::new());
        }
        let mut features = Vec::new();
        for entry in std::fs::read_dir(&features_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                match Self::load(root, &name) {
                    Ok(f) => features.push(f),
                    Err(CaravanError::FeatureNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        features.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(features)
    }

    pub fn migrations_dir(&self, root: &Path) -> PathBuf {
        paths::feature_migrations_dir(root, &self.name)
    }

    /// Variable names this feature declares, in manifest order: defaults
    /// first, then question vars not already covered.
    pub fn declared_vars(&self) -> Vec<String> {
        let mut names: Vec<String> = self.default_vars.keys().cloned().collect();
        for q in &self.questions {
            if !names.contains(&q.var) {
                names.push(q.var.clone());
            }
        }
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
