use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{engine::SyncPolicy, logging::LoggingConfig};

pub const DEFAULT_AOF_PATH: &str = "data/umarell.aof";

/// Backend of the durable tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Durable values live in memory and vanish with the process.
    #[default]
    Memory,
    /// Durable values go to an append-only log at `path`.
    Persistent,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_type: StorageType,
    pub path: PathBuf,
    pub sync: SyncPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            path: PathBuf::from(DEFAULT_AOF_PATH),
            sync: SyncPolicy::Always,
        }
    }
}

impl StorageConfig {
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_type: StorageType::Persistent,
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Defaults overlaid with `UMARELL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Defaults, then the optional file, then the environment.
    ///
    /// Nested keys use `__` in variable names, e.g.
    /// `UMARELL_STORAGE__STORAGE_TYPE=persistent`.
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("storage.storage_type", "memory")?
            .set_default("storage.path", DEFAULT_AOF_PATH)?
            .set_default("storage.sync", "always")?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix("UMARELL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
