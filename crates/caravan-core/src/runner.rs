//! The apply/dry-run protocol over an ordered migration list.
//!
//! A [`RunSession`] owns one instance's state for the duration of a run.
//! All hook invocations and unit executions are strictly sequential: later
//! steps depend on mutations made by earlier ones (pending-set computation,
//! `vars` merges, applied-set updates), so there is no batching and no
//! mid-unit cancellation. Already-completed remote work is never undone.

use crate::bootstrap::BootstrapController;
use crate::client::{upload_log_artifact, ArchiveStore, InstanceClient};
use crate::error::{CaravanError, Result};
use crate::lifecycle::{HookContext, UnitExecutor};
use crate::logbuf::RunLog;
use crate::registry::{self, MigrationSet, MigrationUnit};
use crate::resolver::ResolvedFeature;
use crate::state::{InstanceState, StateStore};
use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

pub struct RunOptions {
    /// Applied-set scope key: the feature name, or the plain migrations
    /// scope for directory runs.
    pub scope: String,
    /// Preview mode: every hook runs except the unit bodies, and the
    /// applied record is never touched.
    pub dry_run: bool,
    /// Compiled exclusion patterns, scoped to the feature that declared
    /// them. Excluded units are dropped from the pending set entirely and
    /// never marked applied.
    pub exclude: Vec<Regex>,
}

impl RunOptions {
    pub fn apply(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            dry_run: false,
            exclude: Vec::new(),
        }
    }

    pub fn dry_run(scope: impl Into<String>) -> Self {
        Self {
            dry_run: true,
            ..Self::apply(scope)
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scope: String,
    pub dry_run: bool,
    /// Pending unit paths after `before_all` mutation, in execution order.
    pub pending: Vec<String>,
    /// Units whose body executed and were marked applied.
    pub applied: Vec<String>,
    /// Units vetoed by `before_each` or whose failure was swallowed; they
    /// stay out of the applied set and will be pending again next run.
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RunSession
// ---------------------------------------------------------------------------

/// One orchestration run against one instance. Loads the instance state on
/// construction, owns it until the run ends, and persists it at the defined
/// checkpoints (after bootstrap, after each completed scope).
pub struct RunSession<'a> {
    instance: &'a str,
    client: &'a dyn InstanceClient,
    archive: Option<&'a dyn ArchiveStore>,
    store: &'a StateStore,
    executor: &'a dyn UnitExecutor,
    log: RunLog,
    pub state: InstanceState,
    bootstrap: BootstrapController,
}

impl<'a> RunSession<'a> {
    pub fn new(
        instance: &'a str,
        client: &'a dyn InstanceClient,
        archive: Option<&'a dyn ArchiveStore>,
        store: &'a StateStore,
        executor: &'a dyn UnitExecutor,
    ) -> Result<Self> {
        let state = store.load(instance)?;
        Ok(Self {
            instance,
            client,
            archive,
            store,
            executor,
            log: RunLog::new(),
            state,
            bootstrap: BootstrapController::new(),
        })
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Execute the lifecycle protocol over one discovered migration set.
    pub fn run_set(&mut self, set: &MigrationSet, opts: &RunOptions) -> Result<RunReport> {
        let started_at = Utc::now();
        let will_apply = !opts.dry_run;

        // Bootstrap is evaluated once per module per run, before this
        // scope's migrations are considered, even when nothing is pending.
        for scoped in &set.modules {
            let log = self.log.clone();
            let mut ctx = HookContext {
                instance: self.instance,
                client: self.client,
                archive: self.archive,
                state: &mut self.state,
                log,
            };
            self.bootstrap.ensure(scoped, &mut ctx, self.store)?;
        }

        // pending = ordered units − applied − excluded
        let applied_before = self.state.applied_set(&opts.scope);
        let mut pending: Vec<MigrationUnit> = set
            .units
            .iter()
            .filter(|u| !applied_before.contains(&u.path))
            .filter(|u| !registry::is_excluded(&u.path, &opts.exclude))
            .cloned()
            .collect();

        for scoped in &set.modules {
            let log = self.log.clone();
            let mut ctx = HookContext {
                instance: self.instance,
                client: self.client,
                archive: self.archive,
                state: &mut self.state,
                log,
            };
            scoped
                .module
                .before_all(&mut ctx, &mut pending, will_apply, opts.dry_run)?;
        }

        let mut report = RunReport {
            run_id: Uuid::new_v4(),
            scope: opts.scope.clone(),
            dry_run: opts.dry_run,
            pending: pending.iter().map(|u| u.path.clone()).collect(),
            applied: Vec::new(),
            skipped: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        let mut ran: Vec<MigrationUnit> = Vec::new();
        for unit in &pending {
            self.process_unit(set, unit, opts, will_apply, &mut report)?;
            if !report.skipped.contains(&unit.path) {
                ran.push(unit.clone());
            }
        }

        // Teardown mirrors setup: after_all in reverse scope order, only
        // reached when no unit aborted the scope.
        for scoped in set.modules.iter().rev() {
            let log = self.log.clone();
            let mut ctx = HookContext {
                instance: self.instance,
                client: self.client,
                archive: self.archive,
                state: &mut self.state,
                log,
            };
            scoped.module.after_all(&mut ctx, &ran, will_apply)?;
        }

        if !opts.dry_run {
            self.store.save(self.instance, &self.state)?;
        }
        report.finished_at = Utc::now();
        Ok(report)
    }

    fn process_unit(
        &mut self,
        set: &MigrationSet,
        unit: &MigrationUnit,
        opts: &RunOptions,
        will_apply: bool,
        report: &mut RunReport,
    ) -> Result<()> {
        // before_each across the chain; the first explicit veto wins and
        // the unit is skipped without being marked applied.
        let mut vetoed = false;
        for idx in &unit.modules {
            let scoped = &set.modules[*idx];
            let log = self.log.clone();
            let mut ctx = HookContext {
                instance: self.instance,
                client: self.client,
                archive: self.archive,
                state: &mut self.state,
                log,
            };
            if !scoped.module.before_each(&mut ctx, unit, will_apply)? {
                self.log.info(format!("{}: skipped by '{}'", unit.path, scoped.name));
                vetoed = true;
                break;
            }
        }

        let mut succeeded = false;
        if !vetoed && !opts.dry_run {
            let executor = self.executor;
            let log = self.log.clone();
            let mut ctx = HookContext {
                instance: self.instance,
                client: self.client,
                archive: self.archive,
                state: &mut self.state,
                log,
            };
            match executor.execute(&mut ctx, unit) {
                Ok(()) => succeeded = true,
                Err(body_err) => {
                    // on_failure runs innermost-first; the first module that
                    // swallows the error ends propagation, and the unit is
                    // treated as processed but not applied.
                    let mut current = Some(body_err);
                    let mut swallowed = false;
                    for idx in unit.modules.iter().rev() {
                        let scoped = &set.modules[*idx];
                        let log = self.log.clone();
                        let mut ctx = HookContext {
                            instance: self.instance,
                            client: self.client,
                            archive: self.archive,
                            state: &mut self.state,
                            log,
                        };
                        match scoped.module.on_failure(&mut ctx, unit, current.take().unwrap()) {
                            Ok(()) => {
                                self.log.warn(format!(
                                    "{}: failure swallowed by '{}', will retry next run",
                                    unit.path, scoped.name
                                ));
                                swallowed = true;
                                break;
                            }
                            Err(e) => current = Some(e),
                        }
                    }
                    if !swallowed {
                        return Err(CaravanError::Migration {
                            unit: unit.path.clone(),
                            source: Box::new(current.unwrap()),
                        });
                    }
                }
            }
        }

        // after_each in reverse chain order for executed and skipped units
        // alike; only a genuine success is marked applied.
        for idx in unit.modules.iter().rev() {
            let scoped = &set.modules[*idx];
            let log = self.log.clone();
            let mut ctx = HookContext {
                instance: self.instance,
                client: self.client,
                archive: self.archive,
                state: &mut self.state,
                log,
            };
            scoped.module.after_each(&mut ctx, unit, will_apply)?;
        }

        if succeeded && !opts.dry_run {
            self.state.mark_applied(&opts.scope, &unit.path);
            self.log.info(format!("{}: applied", unit.path));
            report.applied.push(unit.path.clone());
        } else if opts.dry_run && !vetoed {
            self.log.info(format!("{}: would apply", unit.path));
        } else {
            report.skipped.push(unit.path.clone());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Feature-level orchestration
    // -----------------------------------------------------------------------

    /// Apply a dependency-ordered feature list: for each feature, discover
    /// its migrations, run the lifecycle protocol, record the feature as
    /// applied with its resolved vars, and ship the log slice produced by
    /// its lifecycle as an artifact when an archive is configured.
    pub fn apply_features(
        &mut self,
        resolved: &[ResolvedFeature],
        dry_run: bool,
    ) -> Result<Vec<RunReport>> {
        let mut reports = Vec::with_capacity(resolved.len());
        for feature in resolved {
            self.log.mark();
            self.log.info(format!(
                "feature '{}' on instance '{}'{}",
                feature.name(),
                self.instance,
                if dry_run { " (dry run)" } else { "" }
            ));

            let opts = RunOptions {
                scope: feature.name().to_string(),
                dry_run,
                exclude: feature.exclude_migrations.clone(),
            };
            let report = self.run_set(&feature.migrations, &opts)?;

            if !dry_run {
                self.state
                    .record_feature(feature.name(), feature.resolved_vars.clone());
                self.store.save(self.instance, &self.state)?;
                if let Some(archive) = self.archive {
                    let entry = upload_log_artifact(archive, &self.log, feature.name())?;
                    tracing::debug!("uploaded log artifact {entry}");
                }
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Best-effort feature removal: invoke the feature's declared module
    /// `remove` hook, then drop the feature's bookkeeping. Never called by
    /// apply.
    pub fn remove_feature(&mut self, feature: &ResolvedFeature) -> Result<()> {
        if let Some(module) = &feature.module {
            let log = self.log.clone();
            let mut ctx = HookContext {
                instance: self.instance,
                client: self.client,
                archive: self.archive,
                state: &mut self.state,
                log,
            };
            module.remove(&mut ctx)?;
        }
        self.state.remove_feature(feature.name());
        self.store.save(self.instance, &self.state)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
