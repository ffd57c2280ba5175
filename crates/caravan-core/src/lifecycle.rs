//! The lifecycle protocol: a closed interface of optional hooks that govern
//! how migration units are applied to an instance.
//!
//! Lifecycle modules are compiled code registered by name in a
//! [`LifecycleRegistry`]; on-disk `lifecycle.yaml` markers reference them by
//! that name. Every hook has an explicit no-op default, so a scope without a
//! module behaves identically to one whose module overrides nothing.

use crate::client::{ArchiveStore, InstanceClient};
use crate::error::{CaravanError, Result};
use crate::logbuf::RunLog;
use crate::registry::MigrationUnit;
use crate::state::{InstanceState, VarBag};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// HookContext
// ---------------------------------------------------------------------------

/// Everything a hook or unit body may touch, passed by reference into every
/// invocation. `state` (and the `vars` bag inside it) is mutated in place;
/// callers must not assume copies. Mutations become durable only when the
/// runner persists the state at its defined checkpoints.
pub struct HookContext<'a> {
    /// Target instance name.
    pub instance: &'a str,
    /// Authenticated request/response collaborator for the instance.
    pub client: &'a dyn InstanceClient,
    /// Bulk configuration import/export collaborator, when configured.
    pub archive: Option<&'a dyn ArchiveStore>,
    /// The instance's full persisted record, shared across all hook calls
    /// in the run.
    pub state: &'a mut InstanceState,
    /// Shared run log; lines land in the checkpointed buffer.
    pub log: RunLog,
}

impl HookContext<'_> {
    pub fn vars(&self) -> &VarBag {
        &self.state.vars
    }

    pub fn vars_mut(&mut self) -> &mut VarBag {
        &mut self.state.vars
    }
}

// ---------------------------------------------------------------------------
// LifecycleModule
// ---------------------------------------------------------------------------

/// Hooks invoked in a fixed protocol around an ordered migration list.
///
/// Call order for one scope: `init` once when the module enters the run,
/// then `should_bootstrap`/`on_bootstrap`, then `before_all` with the
/// mutable pending list, then per unit `before_each` → body → `after_each`
/// (or `on_failure`), and `after_all` once every unit has been processed
/// without an abort.
#[allow(unused_variables)]
pub trait LifecycleModule: Send + Sync {
    /// Invoked once per run, when the module first enters the run.
    fn init(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Bootstrap predicate, re-checked every run. An `Err` counts as "yes,
    /// bootstrap": a failing health check during the decision phase triggers
    /// re-initialization instead of aborting the run.
    fn should_bootstrap(&self, ctx: &mut HookContext<'_>) -> Result<bool> {
        Ok(false)
    }

    /// One-time initialization. May mutate `ctx.state.clients` and
    /// `ctx.state.vars`; the runner persists immediately afterwards. An
    /// `Err` here is fatal for the run.
    fn on_bootstrap(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs before any unit in this scope. `pending` may be mutated in
    /// place (add/remove/reorder); this is the sole supported way to change
    /// what runs.
    fn before_all(
        &self,
        ctx: &mut HookContext<'_>,
        pending: &mut Vec<MigrationUnit>,
        will_apply: bool,
        dry_run: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs before each unit. Returning `Ok(false)` skips the unit without
    /// marking it applied.
    fn before_each(
        &self,
        ctx: &mut HookContext<'_>,
        unit: &MigrationUnit,
        will_apply: bool,
    ) -> Result<bool> {
        Ok(true)
    }

    /// Runs after each successfully executed or skipped unit.
    fn after_each(
        &self,
        ctx: &mut HookContext<'_>,
        unit: &MigrationUnit,
        will_apply: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs once after every unit in the scope has been processed without
    /// an abort.
    fn after_all(
        &self,
        ctx: &mut HookContext<'_>,
        ran: &[MigrationUnit],
        will_apply: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Failure interceptor. The default rethrows, aborting the run; a module
    /// that returns `Ok(())` swallows the error, and the unit is treated as
    /// processed but *not* applied, so it is retried on the next run.
    fn on_failure(
        &self,
        ctx: &mut HookContext<'_>,
        unit: &MigrationUnit,
        err: CaravanError,
    ) -> Result<()> {
        Err(err)
    }

    /// Best-effort reversal of the governed feature's footprint. Never
    /// invoked by apply; only reachable through explicit feature removal.
    fn remove(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LifecycleRegistry
// ---------------------------------------------------------------------------

/// Name → module table consulted when discovery encounters a
/// `lifecycle.yaml` marker.
#[derive(Default)]
pub struct LifecycleRegistry {
    modules: BTreeMap<String, Arc<dyn LifecycleModule>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn LifecycleModule>) {
        self.modules.insert(name.into(), module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LifecycleModule>> {
        self.modules.get(name).cloned()
    }
}

// ---------------------------------------------------------------------------
// UnitExecutor
// ---------------------------------------------------------------------------

/// Executes one migration unit's body. The built-in implementation replays
/// request scripts; tests and embedders can substitute their own.
pub trait UnitExecutor: Send + Sync {
    fn execute(&self, ctx: &mut HookContext<'_>, unit: &MigrationUnit) -> Result<()>;
}

impl<F> UnitExecutor for F
where
    F: Fn(&mut HookContext<'_>, &MigrationUnit) -> Result<()> + Send + Sync,
{
    fn execute(&self, ctx: &mut HookContext<'_>, unit: &MigrationUnit) -> Result<()> {
        self(ctx, unit)
    }
}
