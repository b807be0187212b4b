// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `mqhook serve` command implementation.
//!
//! A loopback broker: each stdin line is a JSON [`Event`] and is dispatched
//! to the engine. Every message a script publishes is written to stdout as
//! a JSON line and fed back in as an `on_publish` event, so scripts can
//! chain and self-trigger prevention applies exactly as behind a real
//! broker. EOF or SIGINT/SIGTERM starts a graceful shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mqhook_config::MqhookConfig;
use mqhook_core::{Event, MqhookError, OutboundMessage};
use metrics::gauge;
use mqhook_engine::{ChannelPublisher, ScriptEngine, install_signal_handler, register_metrics};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::App;

/// Outbound messages buffered between scripts and stdout.
const OUTBOUND_CAPACITY: usize = 1024;

/// Interval between allocator samples.
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Runs the `mqhook serve` command.
pub async fn run_serve(config: MqhookConfig, base_dir: &Path) -> Result<(), MqhookError> {
    register_metrics();
    let (publisher, outbound) = ChannelPublisher::new(OUTBOUND_CAPACITY);
    let app = App::assemble(&config, base_dir, Arc::new(publisher)).await?;
    app.engine.start();

    let monitor_cancel = CancellationToken::new();
    let monitor = tokio::spawn(memory_monitor(monitor_cancel.clone()));
    let cancel = install_signal_handler();
    let mut stdout = tokio::io::stdout();
    let mut loopback = Loopback::new(app.engine.clone(), outbound);
    let pumped = loopback
        .run(BufReader::new(tokio::io::stdin()), &mut stdout, &cancel)
        .await;

    let report = app
        .engine
        .shutdown(config.engine.shutdown_timeout())
        .await;
    monitor_cancel.cancel();
    let _ = monitor.await;
    loopback.drain(&mut stdout).await?;
    info!(
        events = loopback.events,
        published = loopback.published,
        drained = report.drained,
        abandoned = report.abandoned,
        "mqhook serve shutdown complete"
    );
    pumped?;
    match report.flush_error {
        Some(e) => Err(MqhookError::storage_msg(format!("final state flush failed: {e}"))),
        None => Ok(()),
    }
}

/// Heap bytes allocated and resident, as jemalloc reports them.
#[cfg(not(target_env = "msvc"))]
fn sample_memory() -> Option<(usize, usize)> {
    tikv_jemalloc_ctl::epoch::advance().ok()?;
    let allocated = tikv_jemalloc_ctl::stats::allocated::read().ok()?;
    let resident = tikv_jemalloc_ctl::stats::resident::read().ok()?;
    Some((allocated, resident))
}

#[cfg(target_env = "msvc")]
fn sample_memory() -> Option<(usize, usize)> {
    None
}

/// Exports allocator gauges until cancelled.
async fn memory_monitor(cancel: CancellationToken) {
    let mut interval = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some((allocated, resident)) = sample_memory() {
                    gauge!("mqhook_memory_allocated_bytes").set(allocated as f64);
                    gauge!("mqhook_memory_resident_bytes").set(resident as f64);
                }
            }
            _ = cancel.cancelled() => {
                debug!("memory monitor shutting down");
                break;
            }
        }
    }
}

/// Moves events from an input stream into the engine and published
/// messages back out.
pub(crate) struct Loopback {
    engine: ScriptEngine,
    outbound: Receiver<OutboundMessage>,
    pub(crate) events: u64,
    pub(crate) published: u64,
}

impl Loopback {
    pub(crate) fn new(engine: ScriptEngine, outbound: Receiver<OutboundMessage>) -> Self {
        Self {
            engine,
            outbound,
            events: 0,
            published: 0,
        }
    }

    /// Pumps until `input` reaches EOF or `cancel` fires.
    pub(crate) async fn run<R, W>(
        &mut self,
        input: R,
        output: &mut W,
        cancel: &CancellationToken,
    ) -> Result<(), MqhookError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.ingest(&line),
                    Ok(None) => {
                        info!("input closed");
                        return Ok(());
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read input");
                        return Err(MqhookError::Internal(format!("input read failed: {e}")));
                    }
                },
                Some(message) = self.outbound.recv() => {
                    self.emit(output, &message).await?;
                    self.dispatch(message.to_event());
                }
            }
        }
    }

    /// Writes out messages published after the input stopped, without
    /// dispatching them again.
    pub(crate) async fn drain<W>(&mut self, output: &mut W) -> Result<(), MqhookError>
    where
        W: AsyncWrite + Unpin,
    {
        while let Ok(message) = self.outbound.try_recv() {
            self.emit(output, &message).await?;
        }
        Ok(())
    }

    fn ingest(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(event) => {
                self.events += 1;
                self.dispatch(event);
            }
            Err(e) => warn!(error = %e, "ignoring malformed event line"),
        }
    }

    fn dispatch(&self, event: Event) {
        let trigger_type = event.event_type;
        let topic = event.topic.clone();
        match self.engine.execute_for_trigger(trigger_type, &topic, event) {
            Ok(dispatch) => debug!(
                trigger = %trigger_type,
                topic,
                launched = dispatch.launched().len(),
                "event accepted"
            ),
            Err(e) => warn!(error = %e, topic, "event dropped"),
        }
    }

    async fn emit<W>(&mut self, output: &mut W, message: &OutboundMessage) -> Result<(), MqhookError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| MqhookError::Internal(format!("cannot encode message: {e}")))?;
        line.push(b'\n');
        output
            .write_all(&line)
            .await
            .map_err(|e| MqhookError::Internal(format!("output write failed: {e}")))?;
        output
            .flush()
            .await
            .map_err(|e| MqhookError::Internal(format!("output flush failed: {e}")))?;
        self.published += 1;
        Ok(())
    }
}
