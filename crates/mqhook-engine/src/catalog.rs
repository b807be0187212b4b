// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory script catalog with lock-free snapshot reads.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use mqhook_core::topic::validate_filter;
use mqhook_core::{MqhookError, Script, ScriptCatalog, validate_script_id};
use tracing::info;

fn validate(script: &Script) -> Result<(), MqhookError> {
    validate_script_id(&script.id)?;
    for trigger in script.triggers.iter().filter(|t| !t.topic.is_empty()) {
        validate_filter(&trigger.topic)?;
    }
    Ok(())
}

/// Scripts held in memory. Writers swap in a new snapshot; readers never block.
pub struct MemoryCatalog {
    scripts: ArcSwap<Vec<Arc<Script>>>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            scripts: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn with_scripts(scripts: Vec<Script>) -> Result<Self, MqhookError> {
        let catalog = Self::new();
        catalog.replace_all(scripts)?;
        Ok(catalog)
    }

    /// Inserts `script`, replacing any script with the same id.
    pub fn upsert(&self, script: Script) -> Result<(), MqhookError> {
        validate(&script)?;
        let script = Arc::new(script);
        self.scripts.rcu(|current| {
            let mut next: Vec<Arc<Script>> = current
                .iter()
                .filter(|s| s.id != script.id)
                .cloned()
                .collect();
            next.push(Arc::clone(&script));
            next
        });
        info!(script_id = %script.id, "script registered");
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Script>> {
        let removed = self.get(id)?;
        self.scripts.rcu(|current| {
            current
                .iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        info!(script_id = %id, "script removed");
        Some(removed)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), MqhookError> {
        let mut script = self
            .get(id)
            .map(|s| Script::clone(&s))
            .ok_or_else(|| MqhookError::NotFound {
                kind: "script",
                id: id.to_string(),
            })?;
        script.enabled = enabled;
        self.upsert(script)
    }

    /// Replaces the whole catalog. Rejects the set if any script is invalid
    /// or two share an id.
    pub fn replace_all(&self, scripts: Vec<Script>) -> Result<(), MqhookError> {
        let mut seen = HashSet::new();
        for script in &scripts {
            validate(script)?;
            if !seen.insert(script.id.as_str()) {
                return Err(MqhookError::InvalidInput(format!(
                    "duplicate script id `{}`",
                    script.id
                )));
            }
        }
        let count = scripts.len();
        self.scripts
            .store(Arc::new(scripts.into_iter().map(Arc::new).collect()));
        info!(count, "script catalog replaced");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scripts.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScriptCatalog for MemoryCatalog {
    fn snapshot(&self) -> Arc<Vec<Arc<Script>>> {
        self.scripts.load_full()
    }
}
