//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::backends::{ElasticsearchConfig, FlushPolicy, InputConfig};
use crate::executors::ChunkExecutorConfig;

/// 📦 The AppConfig: one struct to rule them all, and in the Figment bind them.
///
/// ```toml
/// flush_policy = "continue"
///
/// [elasticsearch]
/// hosts = ["https://es-1:9200", "https://es-2:9200"]
/// username = "elastic"
/// password = "changeme"
/// certs = "/etc/stash/ca.pem"
///
/// [chunking]
/// max_chunk_bytes = 5242880
/// flush_interval_ms = 1000
///
/// [input]
/// file_name = "logs.ndjson"
/// index = "logs"
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Where the documents go and how we prove we're allowed to put them there.
    pub elasticsearch: ElasticsearchConfig,
    /// ⏱️ How big a chunk gets and how long it may wait.
    #[serde(default)]
    pub chunking: ChunkExecutorConfig,
    /// 📂 Where the documents come from.
    pub input: InputConfig,
    /// 🚦 Whether a failed bulk request should stop the run.
    #[serde(default)]
    pub flush_policy: FlushPolicy,
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`STASH_*`, nested keys split on `__`) with an optional
/// TOML file. TOML wins on conflicts.
///   - `config_file_name` is None  → env vars only.
///   - `config_file_name` is Some  → env vars + TOML file, merged.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ env vars as the base layer — like a good sourdough starter.
    let config = Figment::new().merge(Env::prefixed("STASH_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    // 💬 A context message that will actually TELL you what went wrong.
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (STASH_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (STASH_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
