//! Sensitive-value redaction for log and diagnostic output.
//!
//! Before a `vars` bag or instance payload is printed or shipped anywhere,
//! it goes through [`redact`], which deep-copies the value and masks string
//! values stored under known-sensitive keys.

use serde_json::Value;
use std::collections::BTreeSet;

/// The replacement text for redacted values.
pub const REDACTED: &str = "REDACTED";

/// Key names that are always considered sensitive, regardless of which
/// feature is being applied. Matching is case-sensitive and exact.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passphrase",
    "secret",
    "client_secret",
    "token",
    "access_token",
    "refresh_token",
    "api_key",
    "private_key",
    "credentials",
];

/// The active sensitive-key set: the fixed list plus any feature-declared
/// secret variable names.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    extra: BTreeSet<String>,
}

impl RedactionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the policy with feature-declared secret variable names.
    pub fn with_secret_vars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn add_secret_var(&mut self, name: impl Into<String>) {
        self.extra.insert(name.into());
    }

    fn matches(&self, key: &str) -> bool {
        SENSITIVE_KEYS.contains(&key) || self.extra.contains(key)
    }

    /// Deep-copy `value`, masking string values under sensitive keys.
    ///
    /// Only JSON objects are inspected: their keys are checked at every
    /// depth and non-matching object values recurse. Arrays and every other
    /// value kind pass through unchanged, so secrets nested inside array
    /// elements are not masked. Matched keys holding non-string values are
    /// also left as-is; the policy only masks string secrets.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, val) in map {
                    let masked = if self.matches(key) {
                        match val {
                            Value::String(_) => Value::String(REDACTED.to_string()),
                            other => other.clone(),
                        }
                    } else {
                        self.redact(val)
                    };
                    out.insert(key.clone(), masked);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }
}

/// Redact with the fixed sensitive-key set only.
pub fn redact(value: &Value) -> Value {
    RedactionPolicy::new().redact(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
