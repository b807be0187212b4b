// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observer that records the dispatch lifecycle.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use mqhook_core::{Event, Script};
use mqhook_engine::{ExecutionObserver, SkipReason};
use mqhook_sandbox::ExecutionResult;
use tokio::sync::Notify;

#[derive(Default)]
pub struct RecordingObserver {
    launches: Mutex<Vec<String>>,
    skips: Mutex<Vec<(String, SkipReason)>>,
    completions: Mutex<Vec<ExecutionResult>>,
    completed: Notify,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script ids in launch order.
    pub fn launches(&self) -> Vec<String> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn skips(&self) -> Vec<(String, SkipReason)> {
        self.skips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Results in completion order.
    pub fn completions(&self) -> Vec<ExecutionResult> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until at least `count` executions have completed. Returns false
    /// if `timeout` passes first.
    pub async fn wait_for_completions(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.completed.notified();
                if self.completions().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn on_launch(&self, script: &Script, _event: &Event) {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(script.id.clone());
    }

    fn on_skip(&self, script_id: &str, reason: SkipReason) {
        self.skips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((script_id.to_string(), reason));
    }

    fn on_complete(&self, result: &ExecutionResult) {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        self.completed.notify_waiters();
    }
}
