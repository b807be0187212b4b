// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric descriptions and recording helpers.
//!
//! Uses the metrics-rs facade; whichever recorder the host installs collects
//! these. Without one they are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use mqhook_sandbox::ExecutionResult;

use crate::observer::SkipReason;

/// Registers descriptions for every mqhook metric.
pub fn register_metrics() {
    describe_counter!("mqhook_executions_total", "Script executions by final status");
    describe_histogram!(
        "mqhook_execution_duration_seconds",
        "Wall-clock duration of script executions"
    );
    describe_counter!(
        "mqhook_dispatch_skipped_total",
        "Matching scripts not launched, by reason"
    );
    describe_counter!("mqhook_publishes_total", "Messages published by scripts");
    describe_counter!(
        "mqhook_state_flushed_entries_total",
        "State entries written to the durable backend"
    );
    describe_counter!(
        "mqhook_state_flush_failures_total",
        "State flushes that failed and will be retried"
    );
    describe_counter!(
        "mqhook_logs_purged_total",
        "Execution log entries removed by retention"
    );
    describe_gauge!("mqhook_memory_allocated_bytes", "Heap bytes allocated by the process");
    describe_gauge!("mqhook_memory_resident_bytes", "Heap bytes resident in physical memory");
}

pub fn record_execution(result: &ExecutionResult) {
    counter!("mqhook_executions_total", "status" => result.status.as_ref().to_string()).increment(1);
    histogram!("mqhook_execution_duration_seconds").record(result.duration.as_secs_f64());
}

pub fn record_skip(reason: SkipReason) {
    counter!("mqhook_dispatch_skipped_total", "reason" => reason.as_ref().to_string()).increment(1);
}

pub fn record_logs_purged(count: u64) {
    counter!("mqhook_logs_purged_total").increment(count);
}
