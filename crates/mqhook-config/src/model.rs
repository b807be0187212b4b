// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! Every struct uses `#[serde(deny_unknown_fields)]` so a misspelled key is
//! reported at startup instead of silently ignored.

use std::collections::BTreeMap;
use std::time::Duration;

use mqhook_core::Trigger;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MqhookConfig {
    /// Execution limits and engine lifecycle.
    #[serde(default)]
    pub engine: EngineConfig,

    /// State cache flushing and expiry.
    #[serde(default)]
    pub state: StateConfig,

    /// Durable backend selection.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Execution log retention.
    #[serde(default)]
    pub logs: LogsConfig,

    /// Scripts provisioned from the config file.
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
}

/// Sandbox limits and dispatcher lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Wall-clock limit for one execution unless the script overrides it.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Outbound publishes allowed per execution.
    #[serde(default = "default_max_publishes")]
    pub max_publishes_per_execution: u32,

    /// How long an abandoned (timed-out) execution may keep running before it is killed.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Interpreter operation cap per execution. 0 disables the cap.
    #[serde(default)]
    pub max_operations: u64,

    /// Script function nesting limit, at most [`MAX_CALL_DEPTH`].
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum elements in a script array or object map.
    #[serde(default = "default_max_collection_size")]
    pub max_collection_size: usize,

    /// How long shutdown waits for in-flight executions.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Default tracing filter (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_publishes_per_execution: default_max_publishes(),
            kill_grace_ms: default_kill_grace_ms(),
            max_operations: 0,
            max_call_depth: default_max_call_depth(),
            max_string_size: default_max_string_size(),
            max_collection_size: default_max_collection_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_publishes() -> u32 {
    100
}

fn default_kill_grace_ms() -> u64 {
    1_000
}

/// Highest `max_call_depth` the interpreter thread's stack is sized for.
pub const MAX_CALL_DEPTH: usize = 256;

fn default_max_call_depth() -> usize {
    64
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_collection_size() -> usize {
    65_536
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// State cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Interval between flushes of dirty cache entries.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Interval between eager sweeps of expired entries.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl StateConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Which durable backend stores state and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Relational store (SQLite).
    #[default]
    Sqlite,
    /// Ordered key/value store (redb).
    Redb,
}

/// Storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// redb database file.
    #[serde(default = "default_redb_path")]
    pub redb_path: String,

    /// Enable SQLite write-ahead logging.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            database_path: default_database_path(),
            redb_path: default_redb_path(),
            wal_mode: true,
        }
    }
}

fn data_file(name: &str) -> String {
    dirs::data_local_dir()
        .map(|d| d.join("mqhook").join(name))
        .unwrap_or_else(|| name.into())
        .display()
        .to_string()
}

fn default_database_path() -> String {
    data_file("mqhook.db")
}

fn default_redb_path() -> String {
    data_file("mqhook.redb")
}

fn default_true() -> bool {
    true
}

/// Execution log retention.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogsConfig {
    /// Entries older than this many days are swept. 0 keeps logs forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl LogsConfig {
    /// Retention window, or `None` when the sweep is disabled.
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_days > 0).then(|| Duration::from_secs(u64::from(self.retention_days) * 86_400))
    }
}

fn default_retention_days() -> u32 {
    7
}

/// A script provisioned from configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    pub id: String,

    /// Display name. Defaults to the id.
    #[serde(default)]
    pub name: Option<String>,

    /// Inline source. Mutually exclusive with `source_file`.
    #[serde(default)]
    pub source: Option<String>,

    /// Path to the source, relative to the config file's directory.
    #[serde(default)]
    pub source_file: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub triggers: Vec<Trigger>,
}
