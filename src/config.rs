//! Configuration loading and management.
//!
//! Layered configuration using figment. Sources are merged in order (later
//! sources override earlier):
//! 1. Default values (compiled in)
//! 2. Config file: `/var/task/otel-forwarder.toml` (optional)
//! 3. Ambient environment variables (`OTEL_EXPORTER_OTLP_*`,
//!    `AWS_LAMBDA_RUNTIME_API`)
//! 4. Environment variables with the `FORWARDER_` prefix, using `__` as the
//!    section separator (e.g. `FORWARDER_EXPORTER__ENDPOINT`)
//!
//! # Supported Ambient Environment Variables
//!
//! | Variable | Config Path | Description |
//! |----------|-------------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `exporter.endpoint` | Destination URL |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | `exporter.headers` | Comma-separated key=value pairs |
//! | `AWS_LAMBDA_RUNTIME_API` | `lifecycle.runtime_api` | Extensions API host:port (set by Lambda) |

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/var/task/otel-forwarder.toml";
const ENV_PREFIX: &str = "FORWARDER_";

/// Main configuration struct for the forwarder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Export destination configuration.
    pub exporter: ExporterConfig,
    /// Local trace receiver configuration.
    pub receiver: ReceiverConfig,
    /// Span buffer configuration.
    pub buffer: BufferConfig,
    /// Extensions API lifecycle configuration.
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Loads configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    #[allow(clippy::result_large_err)]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a custom config file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    #[allow(clippy::result_large_err)]
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if config_path.as_ref().exists() {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(ambient_env());
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract()
    }
}

/// Export destination configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Destination URL the drained batches are POSTed to.
    pub endpoint: Option<String>,
    /// Static headers attached to every export request.
    pub headers: HashMap<String, String>,
}

/// Local trace receiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Port the OTLP/HTTP listener binds to. Port 0 picks an ephemeral port.
    pub listen_port: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { listen_port: 4318 }
    }
}

/// Span buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of resource-span groups held in memory.
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: crate::buffer::DEFAULT_CAPACITY,
        }
    }
}

/// Extensions API lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Extensions API address, normally `host:port` from
    /// `AWS_LAMBDA_RUNTIME_API`.
    pub runtime_api: Option<String>,
    /// Name announced at registration. Defaults to the executable name.
    pub extension_name: Option<String>,
    /// Fixed flush budget applied to `INVOKE`-triggered flushes, in
    /// milliseconds.
    #[serde(with = "duration_ms")]
    pub invoke_flush_budget: Duration,
    /// Skip registration and event polling; block until a termination signal.
    pub local_mode: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            runtime_api: None,
            extension_name: None,
            invoke_flush_budget: Duration::from_secs(3),
            local_mode: false,
        }
    }
}

impl LifecycleConfig {
    /// Returns the name to announce to the Extensions API, falling back to
    /// the executable name and then the crate name.
    pub fn resolve_extension_name(&self) -> String {
        if let Some(name) = &self.extension_name {
            return name.clone();
        }

        std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
    }
}

/// Partial exporter config for ambient env var overrides.
#[derive(Debug, Default, Serialize)]
struct PartialExporterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
}

/// Partial lifecycle config for ambient env var overrides.
#[derive(Debug, Default, Serialize)]
struct PartialLifecycleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime_api: Option<String>,
}

/// Partial config for ambient env var overrides.
#[derive(Debug, Default, Serialize)]
struct PartialConfig {
    #[serde(skip_serializing_if = "is_partial_exporter_empty")]
    exporter: PartialExporterConfig,
    #[serde(skip_serializing_if = "is_partial_lifecycle_empty")]
    lifecycle: PartialLifecycleConfig,
}

fn is_partial_exporter_empty(config: &PartialExporterConfig) -> bool {
    config.endpoint.is_none() && config.headers.is_empty()
}

fn is_partial_lifecycle_empty(config: &PartialLifecycleConfig) -> bool {
    config.runtime_api.is_none()
}

fn ambient_env() -> Serialized<PartialConfig> {
    let mut config = PartialConfig::default();

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.exporter.endpoint = Some(endpoint);
    }

    if let Ok(headers_str) = std::env::var("OTEL_EXPORTER_OTLP_HEADERS") {
        for pair in headers_str.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                config
                    .exporter
                    .headers
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    if let Ok(runtime_api) = std::env::var("AWS_LAMBDA_RUNTIME_API") {
        config.lifecycle.runtime_api = Some(runtime_api);
    }

    Serialized::defaults(config)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
