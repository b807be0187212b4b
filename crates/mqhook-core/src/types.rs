// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripts, triggers, and the lifecycle events that fire them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::MqhookError;
use crate::topic;

/// Broker lifecycle event a trigger listens for.
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
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    OnPublish,
    OnConnect,
    OnDisconnect,
    OnSubscribe,
}

impl TriggerType {
    /// Whether events of this type carry a topic.
    pub fn has_topic(self) -> bool {
        matches!(self, TriggerType::OnPublish | TriggerType::OnSubscribe)
    }
}

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

/// Binds a script to one event type, an optional topic filter and a priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// MQTT topic filter. Empty matches every topic.
    #[serde(default)]
    pub topic: String,
    /// Lower runs earlier.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Trigger {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            topic: String::new(),
            priority: default_priority(),
            enabled: true,
        }
    }

    pub fn with_topic(mut self, filter: impl Into<String>) -> Self {
        self.topic = filter.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns true when this trigger is enabled and fires for the given event.
    pub fn matches(&self, trigger_type: TriggerType, topic: &str) -> bool {
        self.enabled
            && self.trigger_type == trigger_type
            && (self.topic.is_empty() || topic::matches(&self.topic, topic))
    }
}

/// A named unit of script code together with its triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub source: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Per-script override of the engine's default execution timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Script {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            source: source.into(),
            enabled: true,
            metadata: BTreeMap::new(),
            triggers: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Lowest priority among the enabled triggers matching the event, if any.
    pub fn matching_priority(&self, trigger_type: TriggerType, topic: &str) -> Option<i32> {
        self.triggers
            .iter()
            .filter(|t| t.matches(trigger_type, topic))
            .map(|t| t.priority)
            .min()
    }
}

/// Validates a script identifier.
///
/// Ids are embedded in `script:<id>:` state keys and `log:<id>:` log keys, so
/// they are restricted to ASCII alphanumerics plus `_`, `-` and `.`.
pub fn validate_script_id(id: &str) -> Result<(), MqhookError> {
    if id.is_empty() {
        return Err(MqhookError::InvalidInput("script id must not be empty".into()));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(MqhookError::InvalidInput(format!(
            "script id `{id}` contains invalid character `{bad}`"
        )));
    }
    Ok(())
}

/// Immutable snapshot of one broker lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: TriggerType,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub clean_session: bool,
    /// Error reported by the broker alongside the event (e.g. a disconnect reason).
    #[serde(default)]
    pub error: Option<String>,
    /// Set when the message was published by a script; used for loop prevention.
    #[serde(default)]
    pub published_by_script: Option<String>,
}

impl Event {
    fn blank(event_type: TriggerType) -> Self {
        Self {
            event_type,
            topic: String::new(),
            payload: String::new(),
            client_id: String::new(),
            username: String::new(),
            qos: 0,
            retain: false,
            clean_session: false,
            error: None,
            published_by_script: None,
        }
    }

    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        let mut event = Self::blank(TriggerType::OnPublish);
        event.topic = topic.into();
        event.payload = payload.into();
        event
    }

    pub fn connect(client_id: impl Into<String>) -> Self {
        let mut event = Self::blank(TriggerType::OnConnect);
        event.client_id = client_id.into();
        event
    }

    pub fn disconnect(client_id: impl Into<String>, error: Option<String>) -> Self {
        let mut event = Self::blank(TriggerType::OnDisconnect);
        event.client_id = client_id.into();
        event.error = error;
        event
    }

    pub fn subscribe(client_id: impl Into<String>, filter: impl Into<String>) -> Self {
        let mut event = Self::blank(TriggerType::OnSubscribe);
        event.client_id = client_id.into();
        event.topic = filter.into();
        event
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn published_by(mut self, script_id: impl Into<String>) -> Self {
        self.published_by_script = Some(script_id.into());
        self
    }
}

/// A message a script asked the broker to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
    /// Id of the publishing script, carried into the re-injected event.
    pub source_script: String,
}

impl OutboundMessage {
    /// The `on_publish` event the broker raises when this message is delivered.
    pub fn to_event(&self) -> Event {
        Event::publish(self.topic.clone(), self.payload.clone())
            .with_qos(self.qos)
            .with_retain(self.retain)
            .published_by(self.source_script.clone())
    }
}
