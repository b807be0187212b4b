// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Mutex, PoisonError};

use mqhook_core::{MessagePublisher, MqhookError, OutboundMessage};

/// Holds publishes instead of sending them. Used for test executions.
#[derive(Default)]
pub(crate) struct CapturingPublisher {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl CapturingPublisher {
    pub fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MessagePublisher for CapturingPublisher {
    fn publish(&self, message: OutboundMessage) -> Result<(), MqhookError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }
}
