// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.

use std::collections::HashSet;

use mqhook_core::{topic, validate_script_id};

use crate::diagnostic::ConfigError;
use crate::model::{MAX_CALL_DEPTH, MqhookConfig, StorageBackendKind};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validates a deserialized configuration, collecting every error.
pub fn validate_config(config: &MqhookConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let engine = &config.engine;
    if engine.default_timeout_ms == 0 {
        errors.push(ConfigError::validation(
            "engine.default_timeout_ms must be greater than 0",
        ));
    }
    if engine.max_publishes_per_execution == 0 {
        errors.push(ConfigError::validation(
            "engine.max_publishes_per_execution must be greater than 0",
        ));
    }
    if engine.max_call_depth == 0 || engine.max_call_depth > MAX_CALL_DEPTH {
        errors.push(ConfigError::validation(format!(
            "engine.max_call_depth must be between 1 and {MAX_CALL_DEPTH}, got {}",
            engine.max_call_depth
        )));
    }
    if !LOG_LEVELS.contains(&engine.log_level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "engine.log_level `{}` is not one of {}",
            engine.log_level,
            LOG_LEVELS.join(", ")
        )));
    }

    if config.state.flush_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "state.flush_interval_secs must be greater than 0",
        ));
    }
    if config.state.sweep_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "state.sweep_interval_secs must be greater than 0",
        ));
    }

    match config.storage.backend {
        StorageBackendKind::Sqlite if config.storage.database_path.trim().is_empty() => {
            errors.push(ConfigError::validation(
                "storage.database_path must not be empty when backend = \"sqlite\"",
            ));
        }
        StorageBackendKind::Redb if config.storage.redb_path.trim().is_empty() => {
            errors.push(ConfigError::validation(
                "storage.redb_path must not be empty when backend = \"redb\"",
            ));
        }
        _ => {}
    }

    let mut seen = HashSet::new();
    for script in &config.scripts {
        if let Err(e) = validate_script_id(&script.id) {
            errors.push(ConfigError::Script {
                id: script.id.clone(),
                message: e.to_string(),
            });
        }
        if !seen.insert(script.id.as_str()) {
            errors.push(ConfigError::Script {
                id: script.id.clone(),
                message: "duplicate script id".into(),
            });
        }
        match (&script.source, &script.source_file) {
            (Some(_), Some(_)) => errors.push(ConfigError::Script {
                id: script.id.clone(),
                message: "set either `source` or `source_file`, not both".into(),
            }),
            (None, None) => errors.push(ConfigError::Script {
                id: script.id.clone(),
                message: "one of `source` or `source_file` is required".into(),
            }),
            _ => {}
        }
        if script.timeout_ms == Some(0) {
            errors.push(ConfigError::Script {
                id: script.id.clone(),
                message: "timeout_ms must be greater than 0".into(),
            });
        }
        for trigger in script.triggers.iter().filter(|t| !t.topic.is_empty()) {
            if let Err(e) = topic::validate_filter(&trigger.topic) {
                errors.push(ConfigError::Script {
                    id: script.id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
