// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background flushing and TTL sweeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::StateStore;

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Spawns the periodic flush and expiry sweep for `store`.
///
/// Store errors are logged and retried on the next tick. The task exits when
/// `cancel` fires; it does not flush on exit, the owner does that explicitly.
pub fn spawn_flusher(
    store: Arc<StateStore>,
    flush_every: Duration,
    sweep_every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut flush_tick = tokio::time::interval(flush_every.max(MIN_PERIOD));
        let mut sweep_tick = tokio::time::interval(sweep_every.max(MIN_PERIOD));
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First ticks complete immediately.
        flush_tick.tick().await;
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = flush_tick.tick() => {
                    if let Err(e) = store.flush_dirty().await {
                        warn!(error = %e, dirty = store.dirty_count(), "state flush failed, will retry");
                    }
                }
                _ = sweep_tick.tick() => {
                    if let Err(e) = store.purge_expired().await {
                        warn!(error = %e, "expired state sweep failed, will retry");
                    }
                }
            }
        }
        debug!("state flusher stopped");
    })
}
