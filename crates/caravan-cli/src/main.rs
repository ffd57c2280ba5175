mod cmd;
mod output;
mod prompt;
mod root;

use clap::{Parser, Subcommand};
use cmd::{apply::ApplyArgs, feature::FeatureSubcommand, state::StateSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "caravan",
    about = "Apply ordered, idempotent migrations and feature bundles to remote instances",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from caravan.yaml or .git/)
    #[arg(long, global = true, env = "CARAVAN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a caravan project in the current directory
    Init,

    /// Apply features or plain migrations to an instance
    Apply(ApplyArgs),

    /// Preview what apply would do, without executing unit bodies
    Plan(ApplyArgs),

    /// Inspect and remove features
    Feature {
        #[command(subcommand)]
        subcommand: FeatureSubcommand,
    },

    /// Inspect and reset per-instance state
    State {
        #[command(subcommand)]
        subcommand: StateSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Apply(args) => cmd::apply::run(&root, args, cli.json, false),
        Commands::Plan(args) => cmd::apply::run(&root, args, cli.json, true),
        Commands::Feature { subcommand } => cmd::feature::run(&root, subcommand, cli.json),
        Commands::State { subcommand } => cmd::state::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
