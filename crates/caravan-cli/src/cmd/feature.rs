use crate::cmd::Project;
use crate::output::{print_json, print_table};
use anyhow::Context;
use caravan_core::feature::Feature;
use caravan_core::lifecycle::LifecycleRegistry;
use caravan_core::resolver::{RecordedFallback, Resolver};
use caravan_core::runner::RunSession;
use caravan_core::script::RequestScriptExecutor;
use caravan_core::state::VarBag;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum FeatureSubcommand {
    /// List declared features
    List,
    /// Show a feature's manifest
    Show { name: String },
    /// Best-effort removal of a feature's footprint from an instance
    Remove {
        name: String,
        #[arg(long, env = "CARAVAN_INSTANCE")]
        instance: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: FeatureSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        FeatureSubcommand::List => list(root, json),
        FeatureSubcommand::Show { name } => show(root, &name, json),
        FeatureSubcommand::Remove { name, instance } => remove(root, &name, instance.as_deref()),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let features = Feature::list(root).context("failed to list features")?;

    if json {
        print_json(&features)?;
        return Ok(());
    }

    if features.is_empty() {
        println!("No features declared.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = features
        .iter()
        .map(|f| {
            vec![
                f.name.clone(),
                f.requires.join(", "),
                f.module.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["NAME", "REQUIRES", "MODULE"], rows);
    Ok(())
}

fn show(root: &Path, name: &str, json: bool) -> anyhow::Result<()> {
    let feature =
        Feature::load(root, name).with_context(|| format!("feature '{name}' not found"))?;

    if json {
        print_json(&feature)?;
        return Ok(());
    }

    println!("Feature: {}", feature.name);
    if !feature.requires.is_empty() {
        println!("Requires: {}", feature.requires.join(", "));
    }
    if !feature.default_vars.is_empty() {
        println!("Defaults:");
        for (key, value) in &feature.default_vars {
            if feature.secret_vars.iter().any(|s| s == key) {
                println!("  {key} = REDACTED");
            } else {
                println!("  {key} = {value}");
            }
        }
    }
    if !feature.questions.is_empty() {
        println!("Questions:");
        for q in &feature.questions {
            println!("  {} — {}", q.var, q.prompt);
        }
    }
    if !feature.exclude_migrations.is_empty() {
        println!("Excluded migrations: {}", feature.exclude_migrations.join(", "));
    }
    if !feature.exclude_assets.is_empty() {
        println!("Excluded assets: {}", feature.exclude_assets.join(", "));
    }
    Ok(())
}

fn remove(root: &Path, name: &str, instance: Option<&str>) -> anyhow::Result<()> {
    let project = Project::load(root)?;
    let instance = project.config.select_instance(instance)?.to_string();
    let client = project.client(&instance)?;

    let lifecycle = LifecycleRegistry::new();
    let executor = RequestScriptExecutor;
    let mut session = RunSession::new(&instance, &client, None, &project.store, &executor)?;

    let resolver = Resolver::new(root, &lifecycle);
    let resolved = resolver.resolve(
        &[name.to_string()],
        &VarBag::new(),
        &mut session.state,
        &RecordedFallback,
    )?;
    let target = resolved
        .iter()
        .find(|r| r.name() == name)
        .context("feature vanished during resolution")?;

    session.remove_feature(target)?;
    println!("Removed feature '{name}' from instance '{instance}'");
    Ok(())
}
