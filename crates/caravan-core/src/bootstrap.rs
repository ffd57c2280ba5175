//! Bootstrap gating: decides once per module per run whether an instance
//! needs re-initialization before its governed migrations are considered.
//!
//! The decision predicate is re-checked every run. An error from the
//! predicate counts as "yes, bootstrap" — a failing health check during the
//! decision phase triggers re-initialization rather than aborting. State
//! mutated by `on_bootstrap` is persisted immediately, so a crash right
//! after bootstrap does not repeat it on the next attempt.

use crate::error::{CaravanError, Result};
use crate::lifecycle::HookContext;
use crate::registry::ScopedModule;
use crate::state::StateStore;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStatus {
    NotChecked,
    Checking,
    Bootstrapped,
    Skipped,
}

/// Per-run bootstrap state machine, keyed by scoped module. The check runs
/// exactly once per module per run, independent of whether any migrations
/// are pending.
#[derive(Default)]
pub struct BootstrapController {
    status: BTreeMap<String, BootstrapStatus>,
}

impl BootstrapController {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(scoped: &ScopedModule) -> String {
        format!("{}:{}", scoped.scope, scoped.name)
    }

    pub fn status(&self, scoped: &ScopedModule) -> BootstrapStatus {
        self.status
            .get(&Self::key(scoped))
            .copied()
            .unwrap_or(BootstrapStatus::NotChecked)
    }

    /// Run `init` and the bootstrap check for this module if it has not been
    /// checked in this run yet; otherwise return the settled status.
    pub fn ensure(
        &mut self,
        scoped: &ScopedModule,
        ctx: &mut HookContext<'_>,
        store: &StateStore,
    ) -> Result<BootstrapStatus> {
        let key = Self::key(scoped);
        match self.status.get(&key) {
            None | Some(BootstrapStatus::NotChecked) => {}
            Some(settled) => return Ok(*settled),
        }
        self.status.insert(key.clone(), BootstrapStatus::Checking);

        scoped.module.init(ctx)?;

        let wants_bootstrap = match scoped.module.should_bootstrap(ctx) {
            Ok(decision) => decision,
            Err(e) => {
                ctx.log.warn(format!(
                    "bootstrap check for '{}' failed ({e}), bootstrapping",
                    scoped.name
                ));
                true
            }
        };

        let settled = if wants_bootstrap {
            ctx.log.info(format!("bootstrapping module '{}'", scoped.name));
            scoped
                .module
                .on_bootstrap(ctx)
                .map_err(|e| CaravanError::Bootstrap {
                    module: scoped.name.clone(),
                    source: Box::new(e),
                })?;
            store.save(ctx.instance, ctx.state)?;
            BootstrapStatus::Bootstrapped
        } else {
            BootstrapStatus::Skipped
        };

        self.status.insert(key, settled);
        Ok(settled)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
