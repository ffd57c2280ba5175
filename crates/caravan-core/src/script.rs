//! Built-in migration unit executor: declarative request scripts.
//!
//! A unit file is a YAML list of HTTP steps replayed strictly in order
//! against the instance client. `${name}` placeholders in paths and string
//! body values are substituted from the shared `vars` bag, which is how a
//! feature's resolved variables reach the wire. A `not found` response
//! fails the step unless it opts in with `ignore_not_found`, which is the
//! create-vs-update escape hatch for delete/patch steps.

use crate::error::{CaravanError, Result};
use crate::lifecycle::{HookContext, UnitExecutor};
use crate::registry::MigrationUnit;
use crate::state::VarBag;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Deserialize)]
struct ScriptStep {
    method: String,
    path: String,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    ignore_not_found: bool,
}

pub struct RequestScriptExecutor;

impl UnitExecutor for RequestScriptExecutor {
    fn execute(&self, ctx: &mut HookContext<'_>, unit: &MigrationUnit) -> Result<()> {
        let text = std::fs::read_to_string(&unit.file)?;
        let steps: Vec<ScriptStep> =
            serde_yaml::from_str(&text).map_err(|e| CaravanError::InvalidScript {
                unit: unit.path.clone(),
                reason: e.to_string(),
            })?;

        for (idx, step) in steps.iter().enumerate() {
            let method = step.method.parse().map_err(|_| CaravanError::InvalidScript {
                unit: unit.path.clone(),
                reason: format!("step {}: unknown method '{}'", idx + 1, step.method),
            })?;
            let path = substitute(&step.path, ctx.vars(), &unit.path)?;
            let body = match &step.body {
                Some(value) => Some(substitute_value(value, ctx.vars(), &unit.path)?),
                None => None,
            };

            match ctx.client.request(method, &path, body.as_ref()) {
                Ok(_) => {
                    ctx.log.info(format!("{}: {} {} ok", unit.path, method, path));
                }
                Err(e) if e.is_not_found() && step.ignore_not_found => {
                    ctx.log
                        .info(format!("{}: {} {} not found, ignored", unit.path, method, path));
                }
                Err(e) => return Err(CaravanError::Client(e)),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Variable substitution
// ---------------------------------------------------------------------------

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").unwrap())
}

fn substitute(text: &str, vars: &VarBag, unit: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        let value = vars.get(name).ok_or_else(|| {
            CaravanError::Hook(format!("unresolved variable '{name}' in '{unit}'"))
        })?;
        out.push_str(&text[last..whole.start()]);
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn substitute_value(value: &Value, vars: &VarBag, unit: &str) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::String(substitute(s, vars, unit)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute_value(v, vars, unit))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute_value(v, vars, unit)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
