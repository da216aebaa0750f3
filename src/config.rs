use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::schema::DEFAULT_PLACEHOLDER_PREFIX;

pub const DEFAULT_CONFIG_PATH: &str = "tmz_tracker.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing configuration key '{0}' under [store]")]
    MissingKey(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub etl: EtlConfig,
    pub dashboard: DashboardConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub driver: Option<String>,
    pub server: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub schema: String,
    pub patient_table: String,
    pub phase_table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: None,
            server: None,
            database: None,
            username: None,
            password: None,
            schema: "tmz_data".into(),
            patient_table: "Pacientes_tmz".into(),
            phase_table: "FasePaciente".into(),
        }
    }
}

/// The four values a connection cannot be built without.
#[derive(Clone, PartialEq)]
pub struct ConnectionSettings {
    pub driver: String,
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("driver", &self.driver)
            .field("server", &self.server)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(ConfigError::MissingKey(key)),
    }
}

impl StoreConfig {
    pub fn connection(&self) -> Result<ConnectionSettings, ConfigError> {
        Ok(ConnectionSettings {
            driver: required(&self.driver, "driver")?,
            server: required(&self.server, "server")?,
            database: required(&self.database, "database")?,
            username: required(&self.username, "username")?,
            password: required(&self.password, "password")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub patient_file: PathBuf,
    pub phase_file: PathBuf,
    pub placeholder_prefix: String,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            patient_file: PathBuf::from("archivos_excel/pacientes.csv"),
            phase_file: PathBuf::from("archivos_excel/tmz.csv"),
            placeholder_prefix: DEFAULT_PLACEHOLDER_PREFIX.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub cache_ttl_secs: u64,
    pub log_filter: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            log_filter: "info".into(),
        }
    }
}

impl DashboardConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
