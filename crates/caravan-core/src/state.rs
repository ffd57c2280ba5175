//! Per-instance persisted state and the typed store around it.
//!
//! One [`InstanceState`] record exists per remote instance. It is loaded
//! once at the start of a run, mutated in place by hook invocations and the
//! runner's bookkeeping, and persisted back at defined checkpoints (after
//! bootstrap, after each feature's lifecycle completes). Between runs the
//! backend is the single source of truth; there is no local cache.

use crate::error::{CaravanError, Result};
use crate::io;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

/// Shared key/value bag. String keys, arbitrary JSON-compatible values.
pub type VarBag = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Record of one feature applied to this instance, with the variable values
/// it resolved with. The newest record for a variable is the non-interactive
/// fallback when that variable is requested again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFeature {
    pub name: String,
    #[serde(default)]
    pub vars: VarBag,
    pub applied_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// InstanceState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstanceState {
    /// Per-client bags owned by lifecycle modules. Conventionally hold
    /// version markers written by `on_bootstrap`.
    #[serde(default)]
    pub clients: BTreeMap<String, VarBag>,

    /// The shared variable bag visible to every hook call on this instance.
    #[serde(default)]
    pub vars: VarBag,

    /// Applied migration units, keyed by scope (feature name or the plain
    /// migrations scope), each holding root-relative unit paths.
    #[serde(default)]
    pub migrations: BTreeMap<String, BTreeSet<String>>,

    /// Features applied to this instance, oldest first.
    #[serde(default)]
    pub features: Vec<AppliedFeature>,
}

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Migration bookkeeping
    // -----------------------------------------------------------------------

    pub fn is_applied(&self, scope: &str, unit: &str) -> bool {
        self.migrations
            .get(scope)
            .map(|set| set.contains(unit))
            .unwrap_or(false)
    }

    pub fn mark_applied(&mut self, scope: &str, unit: &str) {
        self.migrations
            .entry(scope.to_string())
            .or_default()
            .insert(unit.to_string());
    }

    pub fn applied_set(&self, scope: &str) -> BTreeSet<String> {
        self.migrations.get(scope).cloned().unwrap_or_default()
    }

    /// Drop all applied-migration bookkeeping for a scope. Used by feature
    /// removal; the remote side effects are the feature module's problem.
    pub fn clear_scope(&mut self, scope: &str) {
        self.migrations.remove(scope);
    }

    // -----------------------------------------------------------------------
    // Feature bookkeeping
    // -----------------------------------------------------------------------

    pub fn record_feature(&mut self, name: &str, vars: VarBag) {
        self.features.retain(|f| f.name != name);
        self.features.push(AppliedFeature {
            name: name.to_string(),
            vars,
            applied_at: Utc::now(),
        });
    }

    pub fn remove_feature(&mut self, name: &str) {
        self.features.retain(|f| f.name != name);
        self.clear_scope(name);
    }

    pub fn feature_applied(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.name == name)
    }

    /// Most recent value a previously applied feature resolved for `var`.
    pub fn last_recorded_var(&self, var: &str) -> Option<&Value> {
        self.features.iter().rev().find_map(|f| f.vars.get(var))
    }

    // -----------------------------------------------------------------------
    // Client bags
    // -----------------------------------------------------------------------

    pub fn client_mut(&mut self, id: &str) -> &mut VarBag {
        self.clients.entry(id.to_string()).or_default()
    }

    pub fn client(&self, id: &str) -> Option<&VarBag> {
        self.clients.get(id)
    }
}

// ---------------------------------------------------------------------------
// StateBackend
// ---------------------------------------------------------------------------

/// Persistence collaborator, scoped per remote instance. A missing key is
/// `None`, never an error; everything else propagates to the caller.
pub trait StateBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, blob: &str) -> Result<()>;
}

/// One YAML blob per instance under a state directory.
pub struct FileStateBackend {
    dir: PathBuf,
}

impl FileStateBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.yaml"))
    }
}

impl StateBackend for FileStateBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.blob_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&path)?))
    }

    fn set(&self, key: &str, blob: &str) -> Result<()> {
        io::atomic_write(&self.blob_path(key), blob.as_bytes())
    }
}

/// In-memory backend for tests and dry planning against no real store.
#[derive(Default)]
pub struct MemoryStateBackend {
    blobs: Mutex<BTreeMap<String, String>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryStateBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .blobs
            .lock()
            .expect("state backend poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, blob: &str) -> Result<()> {
        self.blobs
            .lock()
            .expect("state backend poisoned")
            .insert(key.to_string(), blob.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Typed read/modify/write wrapper around the backend. Mutations only
/// become durable through `save`; a run that dies before `save` leaves the
/// stored state unchanged, which is why migration units must be idempotent
/// against the remote system itself.
pub struct StateStore {
    backend: Box<dyn StateBackend>,
}

impl StateStore {
    pub fn new(backend: Box<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub fn load(&self, instance: &str) -> Result<InstanceState> {
        let blob = self
            .backend
            .get(instance)
            .map_err(|e| CaravanError::Store(format!("load '{instance}': {e}")))?;
        match blob {
            Some(text) => Ok(serde_yaml::from_str(&text)
                .map_err(|e| CaravanError::Store(format!("parse state for '{instance}': {e}")))?),
            None => Ok(InstanceState::new()),
        }
    }

    pub fn save(&self, instance: &str, state: &InstanceState) -> Result<()> {
        let text = serde_yaml::to_string(state)
            .map_err(|e| CaravanError::Store(format!("encode state for '{instance}': {e}")))?;
        self.backend
            .set(instance, &text)
            .map_err(|e| CaravanError::Store(format!("save '{instance}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_state_loads_as_empty_defaults() {
        let store = StateStore::new(Box::new(MemoryStateBackend::new()));
        let state = store.load("staging").unwrap();
        assert!(state.clients.is_empty());
        assert!(state.vars.is_empty());
        assert!(state.migrations.is_empty());
    }

    #[test]
    fn state_roundtrip_through_file_backend() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(Box::new(FileStateBackend::new(dir.path())));

        let mut state = store.load("staging").unwrap();
        state.vars.insert("site_id".into(), json!("main"));
        state.mark_applied("search", "001-create-index.yaml");
        state.client_mut("admin").insert("version".into(), json!(3));
        store.save("staging", &state).unwrap();

        let loaded = store.load("staging").unwrap();
        assert_eq!(loaded.vars["site_id"], "main");
        assert!(loaded.is_applied("search", "001-create-index.yaml"));
        assert_eq!(loaded.client("admin").unwrap()["version"], 3);
    }

    #[test]
    fn unsaved_mutations_are_discarded() {
        let store = StateStore::new(Box::new(MemoryStateBackend::new()));
        let mut state = store.load("staging").unwrap();
        state.mark_applied("search", "001.yaml");
        // No save — a reload sees the original empty record.
        let reloaded = store.load("staging").unwrap();
        assert!(!reloaded.is_applied("search", "001.yaml"));
    }

    #[test]
    fn applied_set_is_scoped() {
        let mut state = InstanceState::new();
        state.mark_applied("search", "001.yaml");
        assert!(state.is_applied("search", "001.yaml"));
        assert!(!state.is_applied("checkout", "001.yaml"));
    }

    #[test]
    fn record_feature_replaces_older_entry() {
        let mut state = InstanceState::new();
        let mut vars = VarBag::new();
        vars.insert("site_id".into(), json!("a"));
        state.record_feature("search", vars.clone());

        vars.insert("site_id".into(), json!("b"));
        state.record_feature("search", vars);

        assert_eq!(state.features.len(), 1);
        assert_eq!(state.last_recorded_var("site_id"), Some(&json!("b")));
    }

    #[test]
    fn last_recorded_var_prefers_newest() {
        let mut state = InstanceState::new();
        let mut a = VarBag::new();
        a.insert("site_id".into(), json!("first"));
        state.record_feature("alpha", a);
        let mut b = VarBag::new();
        b.insert("site_id".into(), json!("second"));
        state.record_feature("beta", b);
        assert_eq!(state.last_recorded_var("site_id"), Some(&json!("second")));
        assert!(state.last_recorded_var("absent").is_none());
    }

    #[test]
    fn remove_feature_clears_bookkeeping() {
        let mut state = InstanceState::new();
        state.record_feature("search", VarBag::new());
        state.mark_applied("search", "001.yaml");
        state.remove_feature("search");
        assert!(!state.feature_applied("search"));
        assert!(!state.is_applied("search", "001.yaml"));
    }
}
