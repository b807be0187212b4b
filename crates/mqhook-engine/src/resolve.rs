// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Matching scripts to an event.

use std::sync::Arc;

use mqhook_core::{Script, TriggerType};

/// Enabled scripts with at least one enabled trigger matching the event,
/// in launch order: lowest matching priority first, then script id.
pub fn resolve(scripts: &[Arc<Script>], trigger_type: TriggerType, topic: &str) -> Vec<Arc<Script>> {
    let mut matched: Vec<(i32, &Arc<Script>)> = scripts
        .iter()
        .filter(|s| s.enabled)
        .filter_map(|s| s.matching_priority(trigger_type, topic).map(|p| (p, s)))
        .collect();
    matched.sort_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| a.id.cmp(&b.id)));
    matched.into_iter().map(|(_, s)| Arc::clone(s)).collect()
}

#[cfg(test)]
mod tests {
    use mqhook_core::Trigger;

    use super::*;

    fn on_publish(id: &str, filter: &str, priority: i32) -> Arc<Script> {
        Arc::new(Script::new(id, "").with_trigger(
            Trigger::new(TriggerType::OnPublish)
                .with_topic(filter)
                .with_priority(priority),
        ))
    }

    fn ids(scripts: &[Arc<Script>]) -> Vec<&str> {
        scripts.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn orders_by_priority_then_id() {
        let scripts = vec![
            on_publish("c", "sensors/#", 100),
            on_publish("b", "sensors/#", 50),
            on_publish("a", "sensors/+", 100),
            on_publish("z", "other/#", 1),
        ];
        let resolved = resolve(&scripts, TriggerType::OnPublish, "sensors/t1");
        assert_eq!(ids(&resolved), vec!["b", "a", "c"]);
    }

    #[test]
    fn uses_lowest_matching_priority() {
        let script = Arc::new(
            Script::new("multi", "")
                .with_trigger(Trigger::new(TriggerType::OnPublish).with_priority(200))
                .with_trigger(
                    Trigger::new(TriggerType::OnPublish)
                        .with_topic("hot/#")
                        .with_priority(10),
                )
                .with_trigger(Trigger::new(TriggerType::OnConnect).with_priority(1)),
        );
        let scripts = vec![script, on_publish("mid", "#", 50)];
        assert_eq!(
            ids(&resolve(&scripts, TriggerType::OnPublish, "hot/x")),
            vec!["multi", "mid"]
        );
        assert_eq!(
            ids(&resolve(&scripts, TriggerType::OnPublish, "cold/x")),
            vec!["mid", "multi"]
        );
    }

    #[test]
    fn skips_disabled_scripts_and_triggers() {
        let disabled_script = Arc::new(
            Script::new("off", "")
                .with_trigger(Trigger::new(TriggerType::OnConnect))
                .disabled(),
        );
        let disabled_trigger = Arc::new(
            Script::new("quiet", "").with_trigger(Trigger::new(TriggerType::OnConnect).disabled()),
        );
        let empty_filter = Arc::new(
            Script::new("any", "").with_trigger(Trigger::new(TriggerType::OnConnect)),
        );
        let scripts = vec![disabled_script, disabled_trigger, empty_filter];
        assert_eq!(
            ids(&resolve(&scripts, TriggerType::OnConnect, "")),
            vec!["any"]
        );
    }
}
