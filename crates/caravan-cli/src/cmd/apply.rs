use crate::cmd::{parse_vars, Project};
use crate::output::print_json;
use crate::prompt::TerminalPrompt;
use caravan_core::feature::Feature;
use caravan_core::lifecycle::LifecycleRegistry;
use caravan_core::redact::RedactionPolicy;
use caravan_core::registry::{self, ScopeOrder};
use caravan_core::resolver::{redaction_policy, RecordedFallback, Resolver, VarSource};
use caravan_core::runner::{RunOptions, RunReport, RunSession};
use caravan_core::script::RequestScriptExecutor;
use clap::Args;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Applied-set scope for plain (non-feature) migration runs.
const PLAIN_SCOPE: &str = "migrations";

#[derive(Args)]
pub struct ApplyArgs {
    /// Feature to apply (repeatable); dependencies are resolved first
    #[arg(long = "feature")]
    pub features: Vec<String>,

    /// Plain migrations directory (default: from caravan.yaml)
    #[arg(long)]
    pub migrations: Option<PathBuf>,

    /// Target instance (default: default_instance from caravan.yaml)
    #[arg(long, env = "CARAVAN_INSTANCE")]
    pub instance: Option<String>,

    /// Preview only: run hooks, skip unit bodies, record nothing
    #[arg(long)]
    pub dry_run: bool,

    /// KEY=VALUE overlay merged over feature defaults (repeatable)
    #[arg(long = "var")]
    pub vars: Vec<String>,

    /// Attended session: prompt for missing variables instead of falling
    /// back to recorded values
    #[arg(long)]
    pub attended: bool,
}

pub fn run(root: &Path, args: ApplyArgs, json: bool, force_dry: bool) -> anyhow::Result<()> {
    let project = Project::load(root)?;
    let instance = project
        .config
        .select_instance(args.instance.as_deref())?
        .to_string();
    let client = project.client(&instance)?;
    let overlay = parse_vars(&args.vars)?;
    let dry_run = force_dry || args.dry_run;

    // Compiled lifecycle modules are registered here by embedders; the
    // stock binary runs marker-less trees and request scripts as-is.
    let lifecycle = LifecycleRegistry::new();
    let executor = RequestScriptExecutor;
    let mut session = RunSession::new(&instance, &client, None, &project.store, &executor)?;

    if args.features.is_empty() {
        let migrations_root = args
            .migrations
            .map(|p| root.join(p))
            .unwrap_or_else(|| project.config.migrations_root(root));
        let set = registry::discover(&migrations_root, &lifecycle, ScopeOrder::default())?;
        for (key, value) in &overlay {
            session.state.vars.insert(key.clone(), value.clone());
        }

        let mut opts = RunOptions::apply(PLAIN_SCOPE);
        opts.dry_run = dry_run;
        let policy = RedactionPolicy::new();
        match session.run_set(&set, &opts) {
            Ok(report) => print_reports(&[report], json, dry_run)?,
            Err(e) => return fail_with_vars(e, &policy, &session),
        }
        return Ok(());
    }

    let resolver = Resolver::new(root, &lifecycle);
    let resolved = if args.attended {
        let secrets: Vec<String> = Feature::list(root)?
            .into_iter()
            .flat_map(|f| f.secret_vars)
            .collect();
        let source = TerminalPrompt::new(secrets);
        resolver.resolve(&args.features, &overlay, &mut session.state, &source)?
    } else {
        let source: &dyn VarSource = &RecordedFallback;
        resolver.resolve(&args.features, &overlay, &mut session.state, source)?
    };

    let policy = redaction_policy(&resolved);
    match session.apply_features(&resolved, dry_run) {
        Ok(reports) => print_reports(&reports, json, dry_run),
        Err(e) => fail_with_vars(e, &policy, &session),
    }
}

/// Report the failing unit, the error chain, and a safe dump of the shared
/// vars bag for diagnosis.
fn fail_with_vars(
    err: caravan_core::CaravanError,
    policy: &RedactionPolicy,
    session: &RunSession<'_>,
) -> anyhow::Result<()> {
    let dump = policy.redact(&Value::Object(session.state.vars.clone()));
    eprintln!(
        "vars at failure: {}",
        serde_json::to_string_pretty(&dump).unwrap_or_else(|_| "{}".to_string())
    );
    Err(err.into())
}

fn print_reports(reports: &[RunReport], json: bool, dry_run: bool) -> anyhow::Result<()> {
    if json {
        let entries: Vec<_> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "run_id": r.run_id.to_string(),
                    "scope": r.scope,
                    "dry_run": r.dry_run,
                    "pending": r.pending,
                    "applied": r.applied,
                    "skipped": r.skipped,
                })
            })
            .collect();
        print_json(&entries)?;
        return Ok(());
    }

    for report in reports {
        if dry_run {
            println!("{}: {} pending", report.scope, report.pending.len());
            for unit in &report.pending {
                println!("  would apply {unit}");
            }
        } else {
            println!(
                "{}: {} applied, {} skipped",
                report.scope,
                report.applied.len(),
                report.skipped.len()
            );
            for unit in &report.applied {
                println!("  applied {unit}");
            }
            for unit in &report.skipped {
                println!("  skipped {unit}");
            }
        }
    }
    Ok(())
}
