// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution log records written by scripts and by the runtime.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::TriggerType;

/// Severity of a log entry. Ordered from least to most severe.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single write-once execution log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub script_id: String,
    pub trigger_type: TriggerType,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    /// Milliseconds into the execution when the entry was produced.
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        script_id: impl Into<String>,
        trigger_type: TriggerType,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            script_id: script_id.into(),
            trigger_type,
            level,
            message: message.into(),
            context: None,
            execution_time_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: Option<serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// One page of log entries, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    /// Number of entries matching the query across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl LogPage {
    /// Normalizes paging input: pages start at 1 and a zero page size becomes 50.
    pub fn normalize(page: u32, page_size: u32) -> (u32, u32) {
        let page = page.max(1);
        let page_size = if page_size == 0 { 50 } else { page_size.min(1000) };
        (page, page_size)
    }

    /// Number of entries to skip for a normalized page.
    pub fn offset(page: u32, page_size: u32) -> u64 {
        u64::from(page.saturating_sub(1)) * u64::from(page_size)
    }

    pub fn has_more(&self) -> bool {
        Self::offset(self.page, self.page_size) + (self.entries.len() as u64) < self.total
    }
}

/// Entry counts per level.
pub type LogCounts = BTreeMap<LogLevel, u64>;
