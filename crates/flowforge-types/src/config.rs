//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `config.toml` in the data directory.
//! Every section has defaults, so an empty file is a valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: OrchestratorSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub triggers: TriggerSettings,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub results: ResultSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Upper bound on concurrently running tasks within one execution.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    4
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_workers() -> usize {
    4
}

fn default_capacity() -> usize {
    1024
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Install root. Relative paths resolve against the data directory;
    /// `None` means `{data_dir}/plugins`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Fuel budget per WebAssembly invocation.
    #[serde(default = "default_wasm_fuel")]
    pub wasm_fuel: u64,
}

fn default_registry_url() -> String {
    "https://plugins.flowforge.dev".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_wasm_fuel() -> u64 {
    10_000_000
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            dir: None,
            registry_url: default_registry_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            wasm_fuel: default_wasm_fuel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSettings {
    /// `None` means `{data_dir}/results`.
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for ResultSettings {
    fn default() -> Self {
        Self {
            base_path: None,
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            otel: false,
            filter: default_filter(),
        }
    }
}
