// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound publish path back into the broker.

use crate::error::MqhookError;
use crate::types::OutboundMessage;

/// Hands script-published messages to the broker.
///
/// Called from the interpreter thread, so implementations must not block:
/// enqueue and return, failing fast when the queue is full.
pub trait MessagePublisher: Send + Sync + 'static {
    fn publish(&self, message: OutboundMessage) -> Result<(), MqhookError>;
}
