// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot commands: `check`, `test`, `logs`, `counts` and `state`.
//!
//! Each opens the configured storage, does its work and shuts the engine
//! down again without starting housekeeping.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mqhook_config::MqhookConfig;
use mqhook_core::{Event, LogLevel, MqhookError, ScriptCatalog, StateScope};
use mqhook_engine::ChannelPublisher;
use mqhook_sandbox::ExecutionError;
use serde::Serialize;

use crate::app::App;

/// Opens the engine for inspection. Live publishes are refused; test runs
/// capture theirs separately.
async fn open(config: &MqhookConfig, base_dir: &Path) -> Result<App, MqhookError> {
    let (publisher, outbound) = ChannelPublisher::new(1);
    drop(outbound);
    App::assemble(config, base_dir, Arc::new(publisher)).await
}

async fn close(app: App) {
    app.engine.shutdown(Duration::ZERO).await;
}

fn print_json<T: Serialize>(value: &T) -> Result<(), MqhookError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| MqhookError::Internal(format!("cannot encode output: {e}")))?;
    println!("{text}");
    Ok(())
}

/// Compiles every catalogued script, in id order.
pub(crate) fn compile_all(app: &App) -> Vec<(String, Result<(), ExecutionError>)> {
    let mut scripts = app.catalog.snapshot().to_vec();
    scripts.sort_by(|a, b| a.id.cmp(&b.id));
    scripts
        .iter()
        .map(|script| (script.id.clone(), app.engine.compile(&script.source)))
        .collect()
}

/// Runs the `mqhook check` command.
pub async fn run_check(
    config: &MqhookConfig,
    base_dir: &Path,
    plain: bool,
) -> Result<(), MqhookError> {
    let app = open(config, base_dir).await?;
    let results = compile_all(&app);
    close(app).await;

    let use_color = !plain && std::io::stdout().is_terminal();
    let mut failed = 0;
    for (id, outcome) in &results {
        let line = match outcome {
            Ok(()) if use_color => {
                use colored::Colorize;
                format!("  {} {id}", "✓".green())
            }
            Ok(()) => format!("  [OK]   {id}"),
            Err(e) => {
                failed += 1;
                if use_color {
                    use colored::Colorize;
                    format!("  {} {id}: {}", "✗".red(), e.to_string().red())
                } else {
                    format!("  [FAIL] {id}: {e}")
                }
            }
        };
        println!("{line}");
    }
    println!("  {} scripts, {failed} failed", results.len());

    if failed > 0 {
        return Err(MqhookError::InvalidInput(format!(
            "{failed} script(s) failed to compile"
        )));
    }
    Ok(())
}

/// Runs the `mqhook test` command.
pub async fn run_test(
    config: &MqhookConfig,
    base_dir: &Path,
    script_id: &str,
    event: Option<&str>,
) -> Result<(), MqhookError> {
    let event = match event {
        Some(raw) => serde_json::from_str::<Event>(raw)
            .map_err(|e| MqhookError::InvalidInput(format!("invalid event JSON: {e}")))?,
        None => Event::publish("test/topic", "{}"),
    };
    let app = open(config, base_dir).await?;
    let run = app.engine.test_execute(script_id, event).await;
    close(app).await;
    print_json(&run?)
}

/// Runs the `mqhook logs` command.
pub async fn run_logs(
    config: &MqhookConfig,
    script_id: &str,
    page: u32,
    page_size: u32,
    level: Option<LogLevel>,
) -> Result<(), MqhookError> {
    let app = open(config, Path::new(".")).await?;
    let logs = app.engine.list_logs(script_id, page, page_size, level).await;
    close(app).await;
    print_json(&logs?)
}

/// Runs the `mqhook counts` command.
pub async fn run_counts(config: &MqhookConfig, script_id: Option<&str>) -> Result<(), MqhookError> {
    let app = open(config, Path::new(".")).await?;
    let counts = app.engine.log_counts(script_id).await;
    close(app).await;
    print_json(&counts?)
}

/// Runs the `mqhook state` command.
pub async fn run_state(config: &MqhookConfig, script: Option<&str>) -> Result<(), MqhookError> {
    let scope = match script {
        Some(id) => StateScope::script(id),
        None => StateScope::Global,
    };
    let app = open(config, Path::new(".")).await?;
    let entries = app.engine.state_entries(&scope);
    close(app).await;
    print_json(&entries)
}
