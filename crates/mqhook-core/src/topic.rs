// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MQTT topic filter matching.
//!
//! `+` matches exactly one level, `#` matches the remaining levels (including
//! none, so `a/#` matches `a`) and is only valid as the final level. A filter
//! that starts with a wildcard never matches a topic starting with `$`.

use crate::error::MqhookError;

/// Checks that a subscription-style filter is well formed.
pub fn validate_filter(filter: &str) -> Result<(), MqhookError> {
    if filter.is_empty() {
        return Err(MqhookError::InvalidInput("topic filter is empty".into()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != last) {
            return Err(MqhookError::InvalidInput(format!(
                "`#` must be the whole final level in filter `{filter}`"
            )));
        }
        if level.contains('+') && *level != "+" {
            return Err(MqhookError::InvalidInput(format!(
                "`+` must occupy a whole level in filter `{filter}`"
            )));
        }
    }
    Ok(())
}

/// Checks that a concrete topic can be published to.
pub fn validate_publish_topic(topic: &str) -> Result<(), MqhookError> {
    if topic.is_empty() {
        return Err(MqhookError::InvalidInput("publish topic is empty".into()));
    }
    if topic.contains(['+', '#']) {
        return Err(MqhookError::InvalidInput(format!(
            "publish topic `{topic}` must not contain wildcards"
        )));
    }
    if topic.contains('\0') {
        return Err(MqhookError::InvalidInput(
            "publish topic must not contain NUL".into(),
        ));
    }
    Ok(())
}

/// Returns true when `topic` is matched by `filter`. Invalid filters match nothing.
pub fn matches(filter: &str, topic: &str) -> bool {
    if validate_filter(filter).is_err() {
        return false;
    }
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn exact_and_single_level() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(matches("a/+/c", "a/x/c"));
        assert!(!matches("a/+/c", "a/x/y/c"));
        assert!(matches("+", "a"));
        assert!(!matches("+", "a/b"));
        assert!(matches("a/+", "a/"));
    }

    #[test]
    fn multi_level_matches_parent_and_descendants() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c/d"));
        assert!(!matches("a/#", "b/a"));
        assert!(matches("#", "anything/at/all"));
    }

    #[test]
    fn system_topics_hidden_from_leading_wildcards() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn invalid_filters_match_nothing() {
        assert!(!matches("a/#/b", "a/x/b"));
        assert!(!matches("a/b#", "a/b#"));
        assert!(!matches("a+/b", "a+/b"));
        assert!(!matches("", ""));
    }

    #[test]
    fn publish_topic_validation() {
        assert!(validate_publish_topic("alerts/high").is_ok());
        assert!(validate_publish_topic("").is_err());
        assert!(validate_publish_topic("alerts/+").is_err());
        assert!(validate_publish_topic("alerts/#").is_err());
    }

    proptest! {
        #[test]
        fn literal_filter_matches_itself(levels in proptest::collection::vec("[a-z0-9]{1,6}", 1..6)) {
            let topic = levels.join("/");
            prop_assert!(matches(&topic, &topic));
        }

        #[test]
        fn hash_matches_every_plain_topic(levels in proptest::collection::vec("[a-z0-9]{0,6}", 1..6)) {
            let topic = levels.join("/");
            prop_assert!(matches("#", &topic));
        }

        #[test]
        fn plus_per_level_matches_same_depth(levels in proptest::collection::vec("[a-z0-9]{1,6}", 1..6)) {
            let topic = levels.join("/");
            let filter = vec!["+"; levels.len()].join("/");
            prop_assert!(matches(&filter, &topic));
            let deeper = format!("{topic}/extra");
            prop_assert!(!matches(&filter, &deeper));
        }
    }
}
