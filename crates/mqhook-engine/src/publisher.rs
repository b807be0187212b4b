// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded outbound queue between scripts and the broker.

use mqhook_core::{MessagePublisher, MqhookError, OutboundMessage};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

/// Publishes into a bounded channel the broker drains.
///
/// A full queue fails the publish inside the script rather than stalling
/// the interpreter thread.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: Sender<OutboundMessage>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl MessagePublisher for ChannelPublisher {
    fn publish(&self, message: OutboundMessage) -> Result<(), MqhookError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => MqhookError::Publish("outbound queue is full".into()),
            TrySendError::Closed(_) => MqhookError::Publish("outbound queue is closed".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str) -> OutboundMessage {
        OutboundMessage {
            topic: topic.into(),
            payload: "p".into(),
            qos: 0,
            retain: false,
            source_script: "s".into(),
        }
    }

    #[tokio::test]
    async fn full_queue_fails_fast() {
        let (publisher, mut rx) = ChannelPublisher::new(1);
        publisher.publish(message("a")).unwrap();
        let err = publisher.publish(message("b")).unwrap_err();
        assert!(err.to_string().contains("full"));
        assert_eq!(rx.recv().await.unwrap().topic, "a");
    }

    #[test]
    fn closed_queue_is_reported() {
        let (publisher, rx) = ChannelPublisher::new(4);
        drop(rx);
        let err = publisher.publish(message("a")).unwrap_err();
        assert!(matches!(err, MqhookError::Publish(m) if m.contains("closed")));
    }
}
