//! Migration discovery: walks a directory tree once and produces a flat,
//! deterministically ordered list of units, each paired with the lifecycle
//! modules that govern it.
//!
//! Any directory containing a `lifecycle.yaml` marker becomes a scope; the
//! marker's `module:` field names an implementation registered in the
//! [`LifecycleRegistry`]. Nested scopes compose: a unit is governed by every
//! ancestor scope, ordered per [`ScopeOrder`]. Unit order is lexicographic
//! on the root-relative path — zero-padded numeric prefixes are the
//! documented convention for version-ordered names, not an enforced rule.

use crate::error::{CaravanError, Result};
use crate::lifecycle::{LifecycleModule, LifecycleRegistry};
use crate::paths;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One idempotent change script, identified by its root-relative path.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationUnit {
    /// Identity for idempotency bookkeeping: path relative to the
    /// migrations root, `/`-separated.
    pub path: String,
    /// Absolute location of the unit file.
    pub file: PathBuf,
    /// Indices into [`MigrationSet::modules`], ordered per [`ScopeOrder`].
    pub modules: Vec<usize>,
}

/// A lifecycle module bound to the directory scope that declared it.
pub struct ScopedModule {
    /// Registered module name from the marker file.
    pub name: String,
    /// Root-relative scope directory; empty string for the root itself.
    pub scope: String,
    pub module: Arc<dyn LifecycleModule>,
}

/// Whether outer (ancestor) scopes run their hooks before or after inner
/// ones. Outer-first is the default convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeOrder {
    #[default]
    OuterFirst,
    InnerFirst,
}

/// The discovery result: ordered units plus the scoped modules governing
/// them, built once so no directory walk happens at execution time.
pub struct MigrationSet {
    pub root: PathBuf,
    /// Units in lexicographic order of their relative path.
    pub units: Vec<MigrationUnit>,
    /// All scoped modules, outer scopes first.
    pub modules: Vec<ScopedModule>,
}

impl std::fmt::Debug for ScopedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedModule")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("module", &format_args!("<dyn LifecycleModule>"))
            .finish()
    }
}

impl std::fmt::Debug for MigrationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationSet")
            .field("root", &self.root)
            .field("units", &self.units)
            .field("modules", &self.modules)
            .finish()
    }
}

impl MigrationSet {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Modules governing `unit`, in the order its hooks should run.
    pub fn chain<'a>(
        &'a self,
        unit: &'a MigrationUnit,
    ) -> impl Iterator<Item = &'a ScopedModule> + 'a {
        unit.modules.iter().map(|&i| &self.modules[i])
    }
}

#[derive(Debug, Deserialize)]
struct LifecycleMarker {
    #[serde(default)]
    module: Option<String>,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Walk `root` and build the ordered migration set. A missing root yields
/// an empty set; a marker naming an unregistered module is an error. A
/// directory holding units but no marker is valid — its units simply have
/// no hooks from that level.
pub fn discover(
    root: &Path,
    registry: &LifecycleRegistry,
    order: ScopeOrder,
) -> Result<MigrationSet> {
    let mut set = MigrationSet {
        root: root.to_path_buf(),
        units: Vec::new(),
        modules: Vec::new(),
    };
    if !root.is_dir() {
        return Ok(set);
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut scopes: Vec<ScopedModule> = Vec::new();
    walk(root, root, registry, &mut files, &mut scopes)?;

    // Outer scopes first: sort by nesting depth, then path for stability.
    scopes.sort_by(|a, b| {
        depth(&a.scope)
            .cmp(&depth(&b.scope))
            .then(a.scope.cmp(&b.scope))
    });
    set.modules = scopes;

    files.sort_by(|a, b| a.0.cmp(&b.0));
    for (rel, file) in files {
        let mut chain: Vec<usize> = set
            .modules
            .iter()
            .enumerate()
            .filter(|(_, m)| governs(&m.scope, &rel))
            .map(|(i, _)| i)
            .collect();
        if order == ScopeOrder::InnerFirst {
            chain.reverse();
        }
        set.units.push(MigrationUnit {
            path: rel,
            file,
            modules: chain,
        });
    }

    Ok(set)
}

fn walk(
    root: &Path,
    dir: &Path,
    registry: &LifecycleRegistry,
    files: &mut Vec<(String, PathBuf)>,
    scopes: &mut Vec<ScopedModule>,
) -> Result<()> {
    let marker = dir.join(paths::LIFECYCLE_MARKER);
    if marker.is_file() {
        let text = std::fs::read_to_string(&marker)?;
        let parsed: LifecycleMarker = serde_yaml::from_str(&text)?;
        if let Some(name) = parsed.module {
            let module = registry.get(&name).ok_or_else(|| CaravanError::UnknownModule {
                module: name.clone(),
                marker: marker.display().to_string(),
            })?;
            scopes.push(ScopedModule {
                name,
                scope: relative(root, dir),
                module,
            });
        }
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == paths::LIFECYCLE_MARKER {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(root, &path, registry, files, scopes)?;
        } else if name.ends_with(".yaml") || name.ends_with(".yml") {
            files.push((relative(root, &path), path));
        }
    }
    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn depth(scope: &str) -> usize {
    if scope.is_empty() {
        0
    } else {
        scope.matches('/').count() + 1
    }
}

fn governs(scope: &str, unit_path: &str) -> bool {
    scope.is_empty() || unit_path.starts_with(&format!("{scope}/"))
}

// ---------------------------------------------------------------------------
// Exclusion patterns
// ---------------------------------------------------------------------------

/// Compile exclusion patterns, surfacing bad patterns as resolution errors.
/// Patterns are regexes matched anywhere in the unit's relative path.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| CaravanError::InvalidPattern(p.clone(), e.to_string()))
        })
        .collect()
}

pub fn is_excluded(unit_path: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|re| re.is_match(unit_path))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
