use crate::cmd::Project;
use crate::output::print_json;
use caravan_core::redact::RedactionPolicy;
use caravan_core::state::InstanceState;
use clap::Subcommand;
use serde_json::Value;
use std::path::Path;

#[derive(Subcommand)]
pub enum StateSubcommand {
    /// Show an instance's tracked state (vars are redacted)
    Show {
        #[arg(long, env = "CARAVAN_INSTANCE")]
        instance: Option<String>,
    },
    /// Drop all tracked state for an instance
    Reset {
        #[arg(long, env = "CARAVAN_INSTANCE")]
        instance: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: StateSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StateSubcommand::Show { instance } => show(root, instance.as_deref(), json),
        StateSubcommand::Reset { instance } => reset(root, instance.as_deref()),
    }
}

fn show(root: &Path, instance: Option<&str>, json: bool) -> anyhow::Result<()> {
    let project = Project::load(root)?;
    let instance = project.config.select_instance(instance)?.to_string();
    let state = project.store.load(&instance)?;

    let policy = RedactionPolicy::new();
    let vars = policy.redact(&Value::Object(state.vars.clone()));

    if json {
        let payload = serde_json::json!({
            "instance": instance,
            "clients": state.clients,
            "vars": vars,
            "migrations": state.migrations,
            "features": state.features,
        });
        print_json(&payload)?;
        return Ok(());
    }

    println!("Instance: {instance}");

    if !state.clients.is_empty() {
        println!("\nClients:");
        for (id, bag) in &state.clients {
            println!("  {id}: {}", Value::Object(bag.clone()));
        }
    }

    if !state.vars.is_empty() {
        println!("\nVars:");
        if let Value::Object(map) = &vars {
            for (key, value) in map {
                println!("  {key} = {value}");
            }
        }
    }

    if !state.migrations.is_empty() {
        println!("\nApplied migrations:");
        for (scope, units) in &state.migrations {
            println!("  {scope} ({}):", units.len());
            for unit in units {
                println!("    {unit}");
            }
        }
    }

    if !state.features.is_empty() {
        println!("\nApplied features:");
        for f in &state.features {
            println!("  {} at {}", f.name, f.applied_at.format("%Y-%m-%d %H:%M"));
        }
    }

    Ok(())
}

fn reset(root: &Path, instance: Option<&str>) -> anyhow::Result<()> {
    let project = Project::load(root)?;
    let instance = project.config.select_instance(instance)?.to_string();
    project.store.save(&instance, &InstanceState::new())?;
    println!("Reset tracked state for instance '{instance}'");
    Ok(())
}
