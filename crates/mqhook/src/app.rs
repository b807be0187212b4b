// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires configuration, storage, catalog and engine together.

use std::path::Path;
use std::sync::Arc;

use mqhook_config::MqhookConfig;
use mqhook_core::{MessagePublisher, MqhookError};
use mqhook_engine::{MemoryCatalog, ScriptEngine};
use mqhook_state::StateStore;
use mqhook_storage::open_backends;
use tracing::info;

/// A ready-to-start engine and the catalog it reads.
pub struct App {
    pub engine: ScriptEngine,
    pub catalog: Arc<MemoryCatalog>,
}

impl App {
    /// Opens storage, loads durable state and the configured scripts.
    pub async fn assemble(
        config: &MqhookConfig,
        base_dir: &Path,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Result<Self, MqhookError> {
        let scripts = mqhook_config::load_scripts(config, base_dir).map_err(|errors| {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            MqhookError::Config(joined)
        })?;
        let catalog = Arc::new(MemoryCatalog::with_scripts(scripts)?);

        let backends = open_backends(&config.storage).await?;
        let state = Arc::new(StateStore::open(backends.state).await?);
        let engine = ScriptEngine::builder(catalog.clone(), state, backends.logs, publisher)
            .with_config(config)
            .build()?;
        info!(scripts = catalog.len(), "mqhook assembled");
        Ok(Self { engine, catalog })
    }
}
