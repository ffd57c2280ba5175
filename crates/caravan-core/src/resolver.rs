//! Feature resolution: expands requested features into a dependency-ordered
//! list with merged variables and per-feature exclusion sets, before any
//! remote call is made.

use crate::error::{CaravanError, Result};
use crate::feature::{Feature, Question};
use crate::lifecycle::{LifecycleModule, LifecycleRegistry};
use crate::paths;
use crate::redact::RedactionPolicy;
use crate::registry::{self, MigrationSet, ScopeOrder};
use crate::state::{InstanceState, VarBag};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// VarSource
// ---------------------------------------------------------------------------

/// Strategy for answering a feature's question when the variable is still
/// missing after merging. The attended implementation prompts a terminal;
/// the unattended one falls back to the last recorded value.
pub trait VarSource {
    fn resolve(
        &self,
        feature: &str,
        question: &Question,
        state: &InstanceState,
    ) -> Result<Option<Value>>;
}

/// Unattended strategy: most recent value any applied feature recorded for
/// the variable, then the question's declared default.
pub struct RecordedFallback;

impl VarSource for RecordedFallback {
    fn resolve(
        &self,
        _feature: &str,
        question: &Question,
        state: &InstanceState,
    ) -> Result<Option<Value>> {
        if let Some(value) = state.last_recorded_var(&question.var) {
            return Ok(Some(value.clone()));
        }
        Ok(question.default.clone())
    }
}

// ---------------------------------------------------------------------------
// ResolvedFeature
// ---------------------------------------------------------------------------

/// One feature ready to run: its discovered migrations, compiled exclusion
/// patterns (scoped to this feature only), and the variable values it
/// resolved with.
pub struct ResolvedFeature {
    pub feature: Feature,
    pub migrations: MigrationSet,
    pub exclude_migrations: Vec<Regex>,
    pub exclude_assets: Vec<Regex>,
    /// The manifest-declared lifecycle module, looked up at resolution
    /// time. Owns best-effort removal of the feature's footprint.
    pub module: Option<Arc<dyn LifecycleModule>>,
    /// Snapshot of this feature's declared variables from the merged bag,
    /// recorded into instance state when the feature is applied.
    pub resolved_vars: VarBag,
}

impl ResolvedFeature {
    pub fn name(&self) -> &str {
        &self.feature.name
    }
}

/// Redaction policy covering the fixed key set plus every secret variable
/// declared by the resolved features.
pub fn redaction_policy(resolved: &[ResolvedFeature]) -> RedactionPolicy {
    let mut policy = RedactionPolicy::new();
    for rf in resolved {
        for name in &rf.feature.secret_vars {
            policy.add_secret_var(name);
        }
    }
    policy
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver<'a> {
    root: &'a Path,
    registry: &'a LifecycleRegistry,
    scope_order: ScopeOrder,
}

impl<'a> Resolver<'a> {
    pub fn new(root: &'a Path, registry: &'a LifecycleRegistry) -> Self {
        Self {
            root,
            registry,
            scope_order: ScopeOrder::default(),
        }
    }

    pub fn with_scope_order(mut self, order: ScopeOrder) -> Self {
        self.scope_order = order;
        self
    }

    /// Expand `requested` into dependency order, merge variables into
    /// `state.vars`, and answer outstanding questions through `source`.
    ///
    /// Merge precedence into the shared bag: values already persisted on
    /// the instance stay; the operator `overlay` overrides them; feature
    /// `default_vars` fill only keys still absent, in resolution order, so
    /// the first-applied feature wins ties.
    pub fn resolve(
        &self,
        requested: &[String],
        overlay: &VarBag,
        state: &mut InstanceState,
        source: &dyn VarSource,
    ) -> Result<Vec<ResolvedFeature>> {
        // Dependency expansion: DFS with an explicit visiting stack for
        // cycle detection. Every feature appears after its transitive
        // requirements; requesting a feature twice resolves it once.
        let mut order: Vec<Feature> = Vec::new();
        let mut done: BTreeSet<String> = BTreeSet::new();
        let mut visiting: Vec<String> = Vec::new();
        for name in requested {
            self.visit(name, &mut order, &mut done, &mut visiting)?;
        }

        // Operator overlay wins over persisted values.
        for (key, value) in overlay {
            state.vars.insert(key.clone(), value.clone());
        }

        let mut resolved = Vec::with_capacity(order.len());
        for feature in order {
            for (key, value) in &feature.default_vars {
                if !state.vars.contains_key(key) {
                    state.vars.insert(key.clone(), value.clone());
                }
            }

            for question in &feature.questions {
                if state.vars.contains_key(&question.var) {
                    continue;
                }
                match source.resolve(&feature.name, question, state)? {
                    Some(value) => {
                        state.vars.insert(question.var.clone(), value);
                    }
                    None => {
                        return Err(CaravanError::MissingVariable {
                            var: question.var.clone(),
                            feature: feature.name.clone(),
                        });
                    }
                }
            }

            let exclude_migrations = registry::compile_patterns(&feature.exclude_migrations)?;
            let exclude_assets = registry::compile_patterns(&feature.exclude_assets)?;
            let migrations = registry::discover(
                &feature.migrations_dir(self.root),
                self.registry,
                self.scope_order,
            )?;

            let module = match &feature.module {
                Some(name) => Some(self.registry.get(name).ok_or_else(|| {
                    CaravanError::UnknownModule {
                        module: name.clone(),
                        marker: paths::feature_manifest(self.root, &feature.name)
                            .display()
                            .to_string(),
                    }
                })?),
                None => None,
            };

            let mut resolved_vars = VarBag::new();
            for name in feature.declared_vars() {
                if let Some(value) = state.vars.get(&name) {
                    resolved_vars.insert(name, value.clone());
                }
            }

            resolved.push(ResolvedFeature {
                feature,
                migrations,
                exclude_migrations,
                exclude_assets,
                module,
                resolved_vars,
            });
        }
        Ok(resolved)
    }

    fn visit(
        &self,
        name: &str,
        order: &mut Vec<Feature>,
        done: &mut BTreeSet<String>,
        visiting: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if visiting.iter().any(|n| n == name) {
            return Err(CaravanError::DependencyCycle(name.to_string()));
        }
        visiting.push(name.to_string());
        let feature = Feature::load(self.root, name)?;
        for req in &feature.requires {
            self.visit(req, order, done, visiting)?;
        }
        visiting.pop();
        done.insert(name.to_string());
        order.push(feature);
        Ok(())
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

    fn write_feature(root: &Path, feature: &Feature) {
        feature.save(root).unwrap();
    }

    fn feature(name: &str) -> Feature {
        Feature::new(name)
    }

    fn resolve_names(
        root: &Path,
        requested: &[&str],
        state: &mut InstanceState,
    ) -> Result<Vec<String>> {
        let registry = LifecycleRegistry::new();
        let resolver = Resolver::new(root, &registry);
        let requested: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
        let resolved = resolver.resolve(&requested, &VarBag::new(), state, &RecordedFallback)?;
        Ok(resolved.into_iter().map(|r| r.feature.name).collect())
    }

    #[test]
    fn dependencies_come_first() {
        let dir = TempDir::new().unwrap();
        write_feature(dir.path(), &feature("base"));
        let mut search = feature("search");
        search.requires.push("base".into());
        write_feature(dir.path(), &search);

        let mut state = InstanceState::new();
        let order = resolve_names(dir.path(), &["search"], &mut state).unwrap();
        assert_eq!(order, ["base", "search"]);
    }

    #[test]
    fn redundant_request_does_not_duplicate() {
        let dir = TempDir::new().unwrap();
        write_feature(dir.path(), &feature("base"));
        let mut search = feature("search");
        search.requires.push("base".into());
        write_feature(dir.path(), &search);

        let mut state = InstanceState::new();
        let order = resolve_names(dir.path(), &["base", "search"], &mut state).unwrap();
        assert_eq!(order, ["base", "search"]);
    }

    #[test]
    fn cycle_is_a_resolution_error() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.requires.push("b".into());
        write_feature(dir.path(), &a);
        let mut b = feature("b");
        b.requires.push("a".into());
        write_feature(dir.path(), &b);

        let mut state = InstanceState::new();
        let err = resolve_names(dir.path(), &["a"], &mut state).unwrap_err();
        assert!(matches!(err, CaravanError::DependencyCycle(_)));
        assert!(err.is_resolution_error());
    }

    #[test]
    fn missing_dependency_is_a_resolution_error() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.requires.push("ghost".into());
        write_feature(dir.path(), &a);

        let mut state = InstanceState::new();
        let err = resolve_names(dir.path(), &["a"], &mut state).unwrap_err();
        assert!(matches!(err, CaravanError::FeatureNotFound(_)));
    }

    #[test]
    fn first_applied_feature_wins_variable_ties() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.default_vars.insert("site_id".into(), json!("from-a"));
        write_feature(dir.path(), &a);
        let mut b = feature("b");
        b.default_vars.insert("site_id".into(), json!("from-b"));
        write_feature(dir.path(), &b);

        let registry = LifecycleRegistry::new();
        let resolver = Resolver::new(dir.path(), &registry);
        let mut state = InstanceState::new();
        resolver
            .resolve(
                &["a".into(), "b".into()],
                &VarBag::new(),
                &mut state,
                &RecordedFallback,
            )
            .unwrap();
        assert_eq!(state.vars["site_id"], "from-a");
    }

    #[test]
    fn operator_overlay_wins_over_defaults() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.default_vars.insert("site_id".into(), json!("default"));
        write_feature(dir.path(), &a);

        let registry = LifecycleRegistry::new();
        let resolver = Resolver::new(dir.path(), &registry);
        let mut state = InstanceState::new();
        let mut overlay = VarBag::new();
        overlay.insert("site_id".into(), json!("from-flag"));
        resolver
            .resolve(&["a".into()], &overlay, &mut state, &RecordedFallback)
            .unwrap();
        assert_eq!(state.vars["site_id"], "from-flag");
    }

    #[test]
    fn missing_variable_without_fallback_fails_resolution() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.questions.push(Question {
            var: "index_name".into(),
            prompt: "Index name".into(),
            default: None,
        });
        write_feature(dir.path(), &a);

        let mut state = InstanceState::new();
        let err = resolve_names(dir.path(), &["a"], &mut state).unwrap_err();
        assert!(matches!(err, CaravanError::MissingVariable { .. }));
        assert!(err.is_resolution_error());
    }

    #[test]
    fn recorded_value_answers_questions_unattended() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.questions.push(Question {
            var: "index_name".into(),
            prompt: "Index name".into(),
            default: None,
        });
        write_feature(dir.path(), &a);

        let mut state = InstanceState::new();
        let mut recorded = VarBag::new();
        recorded.insert("index_name".into(), json!("products"));
        state.record_feature("older", recorded);

        let registry = LifecycleRegistry::new();
        let resolver = Resolver::new(dir.path(), &registry);
        let resolved = resolver
            .resolve(&["a".into()], &VarBag::new(), &mut state, &RecordedFallback)
            .unwrap();
        assert_eq!(state.vars["index_name"], "products");
        assert_eq!(resolved[0].resolved_vars["index_name"], "products");
    }

    #[test]
    fn question_default_is_the_last_resort() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.questions.push(Question {
            var: "locale".into(),
            prompt: "Default locale".into(),
            default: Some(json!("en_US")),
        });
        write_feature(dir.path(), &a);

        let mut state = InstanceState::new();
        resolve_names(dir.path(), &["a"], &mut state).unwrap();
        assert_eq!(state.vars["locale"], "en_US");
    }

    #[test]
    fn exclusions_are_scoped_to_the_declaring_feature() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.exclude_migrations.push("^legacy/".into());
        write_feature(dir.path(), &a);
        write_feature(dir.path(), &feature("b"));

        let registry = LifecycleRegistry::new();
        let resolver = Resolver::new(dir.path(), &registry);
        let mut state = InstanceState::new();
        let resolved = resolver
            .resolve(
                &["a".into(), "b".into()],
                &VarBag::new(),
                &mut state,
                &RecordedFallback,
            )
            .unwrap();
        assert_eq!(resolved[0].exclude_migrations.len(), 1);
        assert!(resolved[1].exclude_migrations.is_empty());
    }

    #[test]
    fn manifest_module_must_be_registered() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.module = Some("search-setup".into());
        write_feature(dir.path(), &a);

        let mut state = InstanceState::new();
        let err = resolve_names(dir.path(), &["a"], &mut state).unwrap_err();
        assert!(matches!(err, CaravanError::UnknownModule { .. }));

        struct Quiet;
        impl LifecycleModule for Quiet {}
        let mut registry = LifecycleRegistry::new();
        registry.register("search-setup", Arc::new(Quiet));
        let resolver = Resolver::new(dir.path(), &registry);
        let resolved = resolver
            .resolve(&["a".into()], &VarBag::new(), &mut state, &RecordedFallback)
            .unwrap();
        assert!(resolved[0].module.is_some());
    }

    #[test]
    fn policy_covers_every_resolved_secret_var() {
        let dir = TempDir::new().unwrap();
        let mut a = feature("a");
        a.secret_vars.push("webdav_password".into());
        a.default_vars.insert("webdav_password".into(), json!("hunter2"));
        write_feature(dir.path(), &a);

        let registry = LifecycleRegistry::new();
        let resolver = Resolver::new(dir.path(), &registry);
        let mut state = InstanceState::new();
        let resolved = resolver
            .resolve(&["a".into()], &VarBag::new(), &mut state, &RecordedFallback)
            .unwrap();
        let policy = redaction_policy(&resolved);
        let dump = policy.redact(&Value::Object(state.vars.clone()));
        assert_eq!(dump["webdav_password"], "REDACTED");
    }
}
