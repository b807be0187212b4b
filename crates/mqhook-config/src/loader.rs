// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order, later wins: compiled defaults, `/etc/mqhook/mqhook.toml`,
//! `$XDG_CONFIG_HOME/mqhook/mqhook.toml`, `./mqhook.toml`, `MQHOOK_*` env vars.

#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::MqhookConfig;

const SYSTEM_CONFIG: &str = "/etc/mqhook/mqhook.toml";
const LOCAL_CONFIG: &str = "mqhook.toml";

fn user_config() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("mqhook/mqhook.toml"))
        .unwrap_or_default()
}

/// Full hierarchy, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MqhookConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

pub fn load_config() -> Result<MqhookConfig, figment::Error> {
    build_figment().extract()
}

/// Defaults plus one TOML string. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<MqhookConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MqhookConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Defaults, one explicit file, then env overrides.
pub fn load_config_from_path(path: &Path) -> Result<MqhookConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MqhookConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Contents of every hierarchy file that exists, for diagnostic spans.
pub fn hierarchy_sources() -> Vec<(String, String)> {
    let local = std::env::current_dir()
        .map(|d| d.join(LOCAL_CONFIG))
        .unwrap_or_else(|_| PathBuf::from(LOCAL_CONFIG));
    [local, user_config(), PathBuf::from(SYSTEM_CONFIG)]
        .into_iter()
        .filter_map(|path| {
            std::fs::read_to_string(&path)
                .ok()
                .map(|content| (path.display().to_string(), content))
        })
        .collect()
}

/// `MQHOOK_<SECTION>_<KEY>` maps to `<section>.<key>`.
///
/// Only the first underscore after the section name is a separator, so
/// `MQHOOK_ENGINE_DEFAULT_TIMEOUT_MS` becomes `engine.default_timeout_ms`.
fn env_provider() -> Env {
    Env::prefixed("MQHOOK_").map(|key| {
        let key = key.as_str();
        let mapped = ["engine", "state", "storage", "logs"]
            .iter()
            .find_map(|section| {
                key.strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or_else(|| key.to_string());
        mapped.into()
    })
}
