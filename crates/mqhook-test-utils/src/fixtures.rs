// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shorthands for building scripts and events in tests.

use mqhook_core::{Event, Script, Trigger, TriggerType};

/// A script with one `on_publish` trigger on `filter` at the default priority.
pub fn on_publish(id: &str, filter: &str, source: &str) -> Script {
    Script::new(id, source).with_trigger(Trigger::new(TriggerType::OnPublish).with_topic(filter))
}

/// Like [`on_publish`] with an explicit priority.
pub fn on_publish_at(id: &str, filter: &str, priority: i32, source: &str) -> Script {
    Script::new(id, source).with_trigger(
        Trigger::new(TriggerType::OnPublish)
            .with_topic(filter)
            .with_priority(priority),
    )
}

/// A script with one trigger of `trigger_type` and no topic filter.
pub fn on_event(id: &str, trigger_type: TriggerType, source: &str) -> Script {
    Script::new(id, source).with_trigger(Trigger::new(trigger_type))
}

pub fn publish_event(topic: &str, payload: &str) -> Event {
    Event::publish(topic, payload).with_client("test-client")
}
