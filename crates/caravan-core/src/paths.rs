use crate::error::{CaravanError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory and file constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "caravan.yaml";
pub const STATE_DIR: &str = ".caravan/state";
pub const MIGRATIONS_DIR: &str = "migrations";
pub const FEATURES_DIR: &str = "features";

pub const FEATURE_MANIFEST: &str = "feature.yaml";
pub const LIFECYCLE_MARKER: &str = "lifecycle.yaml";

/// Conventional upload path prefix for run log artifacts.
pub const LOG_ARTIFACT_DIR: &str = "logs";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn instance_state_path(root: &Path, instance: &str) -> PathBuf {
    state_dir(root).join(format!("{instance}.yaml"))
}

pub fn migrations_dir(root: &Path) -> PathBuf {
    root.join(MIGRATIONS_DIR)
}

pub fn features_dir(root: &Path) -> PathBuf {
    root.join(FEATURES_DIR)
}

pub fn feature_dir(root: &Path, name: &str) -> PathBuf {
    features_dir(root).join(name)
}

pub fn feature_manifest(root: &Path, name: &str) -> PathBuf {
    feature_dir(root, name).join(FEATURE_MANIFEST)
}

pub fn feature_migrations_dir(root: &Path, name: &str) -> PathBuf {
    feature_dir(root, name).join(MIGRATIONS_DIR)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Feature and instance names share the same shape: lowercase alphanumeric
/// with interior hyphens, at most 64 characters.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(CaravanError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["staging", "a", "dev-02", "eu-west-1"] {
            validate_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_names() {
        for name in ["", "-leading", "trailing-", "has spaces", "UPPER", "a_b"] {
            assert!(validate_name(name).is_err(), "expected invalid: {name}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(config_path(root), PathBuf::from("/tmp/proj/caravan.yaml"));
        assert_eq!(
            instance_state_path(root, "staging"),
            PathBuf::from("/tmp/proj/.caravan/state/staging.yaml")
        );
        assert_eq!(
            feature_manifest(root, "search"),
            PathBuf::from("/tmp/proj/features/search/feature.yaml")
        );
    }
}
