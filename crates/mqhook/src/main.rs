// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! mqhook - event-triggered scripts for MQTT brokers.
//!
//! This is the binary entry point. `serve` runs the engine behind a
//! newline-delimited JSON loopback broker on stdin/stdout; the other
//! commands inspect scripts, logs and state.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod app;
mod inspect;
mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use mqhook_config::MqhookConfig;
use mqhook_core::LogLevel;

/// mqhook - event-triggered scripts for MQTT brokers.
#[derive(Parser, Debug)]
#[command(name = "mqhook", version, about, long_about = None)]
struct Cli {
    /// Configuration file. Defaults to the system/user/local hierarchy.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine as a stdin/stdout loopback broker.
    Serve,
    /// Compile every configured script and report errors.
    Check {
        /// Disable colored output.
        #[arg(long)]
        plain: bool,
    },
    /// Run one script against an event without persisting anything.
    Test {
        script_id: String,
        /// Event as JSON. Defaults to a publish on `test/topic`.
        #[arg(long)]
        event: Option<String>,
    },
    /// Show a page of a script's execution logs, newest first.
    Logs {
        script_id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
        /// Only entries at this level (debug, info, warn, error).
        #[arg(long)]
        level: Option<LogLevel>,
    },
    /// Count log entries per level.
    Counts { script_id: Option<String> },
    /// List state entries of one script, or global state.
    State {
        #[arg(long)]
        script: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            mqhook_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.engine.log_level);

    let base_dir = script_base_dir(cli.config.as_deref());
    let outcome = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config, &base_dir).await,
        Some(Commands::Check { plain }) => inspect::run_check(&config, &base_dir, plain).await,
        Some(Commands::Test { script_id, event }) => {
            inspect::run_test(&config, &base_dir, &script_id, event.as_deref()).await
        }
        Some(Commands::Logs {
            script_id,
            page,
            page_size,
            level,
        }) => inspect::run_logs(&config, &script_id, page, page_size, level).await,
        Some(Commands::Counts { script_id }) => {
            inspect::run_counts(&config, script_id.as_deref()).await
        }
        Some(Commands::State { script }) => inspect::run_state(&config, script.as_deref()).await,
        None => {
            println!("mqhook: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("mqhook: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<MqhookConfig, Vec<mqhook_config::ConfigError>> {
    match path {
        Some(path) => mqhook_config::load_and_validate_path(path),
        None => mqhook_config::load_and_validate(),
    }
}

/// `source_file` entries resolve against the config file's directory.
fn script_base_dir(config_path: Option<&Path>) -> PathBuf {
    config_path
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Logs go to stderr; stdout carries loopback traffic and command output.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mqhook={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
