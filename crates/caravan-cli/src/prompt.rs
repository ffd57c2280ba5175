//! Attended variable resolution: terminal prompts for missing variables.
//!
//! Selected explicitly with `--attended`; unattended runs use the recorded
//! fallback in core so CI never blocks on a prompt.

use caravan_core::feature::Question;
use caravan_core::resolver::VarSource;
use caravan_core::state::InstanceState;
use caravan_core::{CaravanError, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password};
use serde_json::Value;

pub struct TerminalPrompt {
    /// Variable names to prompt for without echo.
    secret_vars: Vec<String>,
}

impl TerminalPrompt {
    pub fn new(secret_vars: Vec<String>) -> Self {
        Self { secret_vars }
    }
}

impl VarSource for TerminalPrompt {
    fn resolve(
        &self,
        feature: &str,
        question: &Question,
        _state: &InstanceState,
    ) -> Result<Option<Value>> {
        let theme = ColorfulTheme::default();
        let label = format!("[{feature}] {}", question.prompt);

        if self.secret_vars.contains(&question.var) {
            let answer = Password::with_theme(&theme)
                .with_prompt(&label)
                .allow_empty_password(true)
                .interact()
                .map_err(|e| CaravanError::Hook(format!("prompt failed: {e}")))?;
            if answer.is_empty() {
                return Ok(question.default.clone());
            }
            return Ok(Some(Value::String(answer)));
        }

        let mut input = Input::<String>::with_theme(&theme).with_prompt(&label);
        if let Some(Value::String(default)) = &question.default {
            input = input.default(default.clone());
        }
        let answer = input
            .interact_text()
            .map_err(|e| CaravanError::Hook(format!("prompt failed: {e}")))?;
        if answer.is_empty() {
            return Ok(question.default.clone());
        }
        Ok(Some(Value::String(answer)))
    }
}
