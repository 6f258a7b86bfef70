use crate::error::Result;
use crate::types::Environment;
use config::{Config, Environment as EnvSource, File};
use serde::Deserialize;
use std::path::Path;

const ENV_PREFIX: &str = "EXHIBIT_SYNC";

/// Top-level settings for one device process
///
/// Every field has a default, so a configuration source only needs to name
/// what differs from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub device: DeviceSettings,
    pub logging: LoggingSettings,
}

/// How the broker is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    #[default]
    Tcp,
    Ws,
}

/// Broker connection parameters; stable per deployment
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub protocol: BrokerProtocol,
    /// Request path for WebSocket connections
    pub ws_path: String,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            protocol: BrokerProtocol::Tcp,
            ws_path: "/mqtt".to_string(),
            keep_alive_secs: 30,
            clean_session: true,
            username: None,
            password: None,
        }
    }
}

/// Identity of this device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub environment: Environment,
    /// Prefix of the per-process device id
    pub prefix: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            prefix: "device".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load settings from `config/default` (if present) and the environment
///
/// Environment variables use the `EXHIBIT_SYNC_` prefix and `__` between
/// nested keys, e.g. `EXHIBIT_SYNC_BROKER__PORT=1884`.
pub fn load_config() -> Result<Settings> {
    build(File::with_name("config/default").required(false))
}

/// Load settings from a specific file, then the environment
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings> {
    build(File::from(path.as_ref()))
}

fn build<S>(file: S) -> Result<Settings>
where
    S: config::Source + Send + Sync + 'static,
{
    let config = Config::builder()
        .add_source(file)
        .add_source(
            EnvSource::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}
