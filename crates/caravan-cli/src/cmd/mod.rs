pub mod apply;
pub mod feature;
pub mod init;
pub mod state;

use anyhow::Context;
use caravan_core::client::HttpInstanceClient;
use caravan_core::config::Config;
use caravan_core::state::{FileStateBackend, StateStore, VarBag};
use serde_json::Value;
use std::path::Path;

/// Loaded project context shared by the subcommands.
pub struct Project {
    pub config: Config,
    pub store: StateStore,
}

impl Project {
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root).context("failed to load caravan.yaml")?;
        let store = StateStore::new(Box::new(FileStateBackend::new(config.state_root(root))));
        Ok(Self { config, store })
    }

    pub fn client(&self, instance: &str) -> anyhow::Result<HttpInstanceClient> {
        let entry = self.config.instance(instance)?;
        Ok(HttpInstanceClient::new(
            entry.url.clone(),
            entry.resolved_token(instance),
        ))
    }
}

/// Parse `KEY=VALUE` overlay flags. Values that parse as JSON are kept
/// typed; everything else is a string.
pub fn parse_vars(pairs: &[String]) -> anyhow::Result<VarBag> {
    let mut bag = VarBag::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid --var '{pair}': expected KEY=VALUE"))?;
        let parsed = serde_json::from_str(value).unwrap_or(Value::String(value.to_string()));
        bag.insert(key.to_string(), parsed);
    }
    Ok(bag)
}
