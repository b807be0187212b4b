// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns `[[scripts]]` entries into engine scripts.

use std::path::Path;

use mqhook_core::Script;

use crate::diagnostic::ConfigError;
use crate::model::{MqhookConfig, ScriptConfig};

/// Builds every configured script, reading `source_file`s relative to `base_dir`.
pub fn load_scripts(config: &MqhookConfig, base_dir: &Path) -> Result<Vec<Script>, Vec<ConfigError>> {
    let mut scripts = Vec::with_capacity(config.scripts.len());
    let mut errors = Vec::new();
    for entry in &config.scripts {
        match build_script(entry, base_dir) {
            Ok(script) => scripts.push(script),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() { Ok(scripts) } else { Err(errors) }
}

fn build_script(entry: &ScriptConfig, base_dir: &Path) -> Result<Script, ConfigError> {
    let source = match (&entry.source, &entry.source_file) {
        (Some(source), None) => source.clone(),
        (None, Some(file)) => {
            let path = base_dir.join(file);
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Script {
                id: entry.id.clone(),
                message: format!("cannot read {}: {e}", path.display()),
            })?
        }
        _ => {
            return Err(ConfigError::Script {
                id: entry.id.clone(),
                message: "exactly one of `source` or `source_file` is required".into(),
            });
        }
    };

    let mut script = Script::new(entry.id.clone(), source);
    if let Some(name) = &entry.name {
        script.name = name.clone();
    }
    script.enabled = entry.enabled;
    script.timeout_ms = entry.timeout_ms;
    script.metadata = entry.metadata.clone();
    script.triggers = entry.triggers.clone();
    Ok(script)
}
