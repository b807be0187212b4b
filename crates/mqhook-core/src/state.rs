// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scoped key/value state records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MqhookError;

const SCRIPT_PREFIX: &str = "script:";
const GLOBAL_SCOPE: &str = "global";

/// Namespace a state entry lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateScope {
    /// Private to one script.
    Script(String),
    /// Shared by all scripts.
    Global,
}

impl StateScope {
    pub fn script(id: impl Into<String>) -> Self {
        StateScope::Script(id.into())
    }

    /// Key prefix shared by every entry in this scope, e.g. `script:incr:`.
    pub fn prefix(&self) -> String {
        match self {
            StateScope::Script(id) => format!("{SCRIPT_PREFIX}{id}:"),
            StateScope::Global => format!("{GLOBAL_SCOPE}:"),
        }
    }

    /// Flat key used by key/value backends and the cache.
    pub fn namespaced_key(&self, key: &str) -> String {
        let mut out = self.prefix();
        out.push_str(key);
        out
    }

    /// Splits a namespaced key back into scope and key.
    pub fn split_namespaced(full: &str) -> Option<(StateScope, String)> {
        if let Some(rest) = full.strip_prefix(SCRIPT_PREFIX) {
            let (id, key) = rest.split_once(':')?;
            return Some((StateScope::Script(id.to_string()), key.to_string()));
        }
        let key = full.strip_prefix(GLOBAL_SCOPE)?.strip_prefix(':')?;
        Some((StateScope::Global, key.to_string()))
    }
}

impl fmt::Display for StateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateScope::Script(id) => write!(f, "{SCRIPT_PREFIX}{id}"),
            StateScope::Global => f.write_str(GLOBAL_SCOPE),
        }
    }
}

impl FromStr for StateScope {
    type Err = MqhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == GLOBAL_SCOPE {
            return Ok(StateScope::Global);
        }
        match s.strip_prefix(SCRIPT_PREFIX) {
            Some(id) if !id.is_empty() => Ok(StateScope::Script(id.to_string())),
            _ => Err(MqhookError::InvalidInput(format!("unknown state scope `{s}`"))),
        }
    }
}

impl Serialize for StateScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StateScope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifies one state entry.
pub type StateKey = (StateScope, String);

/// A durable state entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub scope: StateScope,
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StateRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A set of upserts and deletes applied to a backend atomically.
#[derive(Debug, Clone, Default)]
pub struct StateBatch {
    pub upserts: Vec<StateRecord>,
    pub deletes: Vec<StateKey>,
}

impl StateBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }
}
