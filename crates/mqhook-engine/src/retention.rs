// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Age-based execution log cleanup.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use mqhook_core::{LogSink, MqhookError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::recording;

const MIN_SWEEP: Duration = Duration::from_secs(5 * 60);
const MAX_SWEEP: Duration = Duration::from_secs(24 * 60 * 60);

/// How often to sweep for a given retention window. Longer retention means
/// fewer sweeps.
pub fn sweep_interval(retention: Duration) -> Duration {
    (retention / 24).clamp(MIN_SWEEP, MAX_SWEEP)
}

/// Deletes every log entry older than `retention`. Returns the number removed.
pub async fn purge_once(logs: &dyn LogSink, retention: Duration) -> Result<u64, MqhookError> {
    let Some(cutoff) = TimeDelta::from_std(retention)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
    else {
        return Ok(0);
    };
    let removed = logs.clear_all_before(cutoff).await?;
    recording::record_logs_purged(removed);
    if removed > 0 {
        info!(removed, cutoff = %cutoff, "expired execution logs purged");
    } else {
        debug!(cutoff = %cutoff, "no execution logs past retention");
    }
    Ok(removed)
}

/// Spawns the retention sweep. The first sweep runs immediately.
pub fn spawn_retention(
    logs: Arc<dyn LogSink>,
    retention: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let every = sweep_interval(retention);
    info!(
        retention_secs = retention.as_secs(),
        every_secs = every.as_secs(),
        "log retention sweep started"
    );
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = purge_once(logs.as_ref(), retention).await {
                        warn!(error = %e, "log retention sweep failed, will retry");
                    }
                }
            }
        }
        debug!("log retention sweep stopped");
    })
}
