use caravan_core::config::Config;
use caravan_core::{io, paths};
use std::path::Path;

/// Scaffold a caravan project: config file, migrations and features
/// directories. Safe to re-run; existing files are left alone.
pub fn run(root: &Path) -> anyhow::Result<()> {
    let config_path = paths::config_path(root);
    if !config_path.exists() {
        Config::default().save(root)?;
        println!("Created {}", paths::CONFIG_FILE);
    }

    io::ensure_dir(&paths::migrations_dir(root))?;
    io::ensure_dir(&paths::features_dir(root))?;
    io::write_if_missing(
        &paths::migrations_dir(root).join("README.md"),
        b"Migration units are YAML request scripts, applied in lexicographic\norder of their relative path. Zero-pad numeric prefixes.\n",
    )?;

    println!("Initialized caravan project at {}", root.display());
    println!("Next: add an instance to caravan.yaml, then 'caravan plan'");
    Ok(())
}
