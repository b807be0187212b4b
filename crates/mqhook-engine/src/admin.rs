// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query and maintenance operations for an administrative API.

use std::sync::Arc;

use mqhook_core::{
    Event, LogCounts, LogLevel, LogPage, LogSink, MqhookError, Script, ScriptCatalog, StateRecord,
    StateScope,
};
use mqhook_sandbox::{ExecutionError, TestRun};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::engine::ScriptEngine;

/// What [`ScriptEngine::purge_script`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub state_entries: u64,
    pub log_entries: u64,
}

impl ScriptEngine {
    /// One page of a script's logs, newest first.
    pub async fn list_logs(
        &self,
        script_id: &str,
        page: u32,
        page_size: u32,
        level: Option<LogLevel>,
    ) -> Result<LogPage, MqhookError> {
        self.inner
            .logs
            .list_logs(script_id, page, page_size, level)
            .await
    }

    /// Entry counts per level for one script, or for all scripts.
    pub async fn log_counts(&self, script_id: Option<&str>) -> Result<LogCounts, MqhookError> {
        self.inner.logs.count_by_level(script_id).await
    }

    pub async fn clear_logs(&self, script_id: &str) -> Result<u64, MqhookError> {
        let removed = self.inner.logs.clear_logs(script_id).await?;
        info!(script_id, removed, "execution logs cleared");
        Ok(removed)
    }

    pub fn state_keys(&self, scope: &StateScope) -> Vec<String> {
        self.inner.state.keys(scope)
    }

    pub fn state_entries(&self, scope: &StateScope) -> Vec<StateRecord> {
        self.inner.state.records(scope)
    }

    pub fn get_state(&self, scope: &StateScope, key: &str) -> Option<Value> {
        self.inner.state.get(scope, key)
    }

    pub fn delete_state_key(&self, scope: &StateScope, key: &str) -> bool {
        self.inner.state.delete(scope, key)
    }

    /// Removes all state and logs of a deleted script.
    pub async fn purge_script(&self, script_id: &str) -> Result<PurgeReport, MqhookError> {
        let state_entries = self
            .inner
            .state
            .delete_scope(&StateScope::Script(script_id.to_string()))
            .await?;
        let log_entries = self.inner.logs.clear_logs(script_id).await?;
        info!(script_id, state_entries, log_entries, "script data purged");
        Ok(PurgeReport {
            state_entries,
            log_entries,
        })
    }

    /// Checks that `source` parses. Nothing runs and nothing is stored.
    pub fn compile(&self, source: &str) -> Result<(), ExecutionError> {
        self.inner.runtime.compile(source)
    }

    /// Runs a catalogued script against a synthetic event without
    /// persisting state, logs or publishes.
    pub async fn test_execute(&self, script_id: &str, event: Event) -> Result<TestRun, MqhookError> {
        let script = self
            .inner
            .catalog
            .get(script_id)
            .ok_or_else(|| MqhookError::NotFound {
                kind: "script",
                id: script_id.to_string(),
            })?;
        Ok(self.inner.runtime.test_execute(script, &event).await)
    }

    /// Like [`test_execute`](Self::test_execute) for a script that is not
    /// in the catalog yet.
    pub async fn test_script(&self, script: Script, event: Event) -> TestRun {
        self.inner.runtime.test_execute(Arc::new(script), &event).await
    }
}
