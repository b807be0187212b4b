// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hooks into the dispatch lifecycle.

use mqhook_core::{Event, Script};
use mqhook_sandbox::ExecutionResult;
use strum::{AsRefStr, Display};

/// Why a matching script was not launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The event was published by this same script.
    SelfTrigger,
    /// The engine has stopped accepting dispatches.
    ShuttingDown,
}

/// Observes dispatch decisions and execution outcomes.
///
/// `on_launch` is called synchronously in launch order, before the
/// execution is spawned. `on_complete` is called from the execution task,
/// so completions arrive in whatever order the executions finish.
pub trait ExecutionObserver: Send + Sync + 'static {
    fn on_launch(&self, _script: &Script, _event: &Event) {}

    fn on_skip(&self, _script_id: &str, _reason: SkipReason) {}

    fn on_complete(&self, _result: &ExecutionResult) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}
