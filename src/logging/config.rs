use std::{collections::HashMap, fs, io, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Environment variables that override file and default settings.
pub const ENV_LOG_LEVEL: &str = "UMARELL_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "UMARELL_LOG_DIR";
pub const ENV_LOG_FORMAT: &str = "UMARELL_LOG_FORMAT";
pub const ENV_LOG_CONSOLE: &str = "UMARELL_LOG_CONSOLE";
pub const ENV_LOG_FILE: &str = "UMARELL_LOG_FILE";

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unknown log level '{0}'")]
    InvalidLevel(String),

    #[error("unknown log format '{0}'")]
    InvalidFormat(String),

    #[error("file logging needs a non-empty file name")]
    EmptyFileName,

    #[error("cannot create log directory: {0}")]
    Io(#[from] io::Error),

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::InvalidFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub format: LogFormat,
    /// Prefix of the daily-rotated files inside `log_dir`.
    pub filename: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: LogFormat::Json,
            filename: "umarell.log".to_string(),
        }
    }
}

/// Logging settings: level, per-module overrides and sinks.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    /// Extra `target=level` directives, e.g. `umarell::engine = "debug"`.
    pub module_levels: HashMap<String, String>,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            module_levels: HashMap::new(),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Applies `UMARELL_LOG_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary lookup. Unparseable values are
    /// ignored and leave the current setting in place.
    pub fn apply_overrides_from<F>(
        &mut self,
        lookup: F,
    ) where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.level = level.to_ascii_lowercase();
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT).and_then(|f| f.parse().ok()) {
            self.console.format = format;
        }
        if let Some(on) = lookup(ENV_LOG_CONSOLE).and_then(|v| parse_flag(&v)) {
            self.console.enabled = on;
        }
        if let Some(on) = lookup(ENV_LOG_FILE).and_then(|v| parse_flag(&v)) {
            self.file.enabled = on;
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        let levels = std::iter::once(&self.level).chain(self.module_levels.values());
        for level in levels {
            if !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
                return Err(LoggingError::InvalidLevel(level.clone()));
            }
        }
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err(LoggingError::EmptyFileName);
        }
        Ok(())
    }

    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// `EnvFilter` directive: the base level followed by module overrides,
    /// sorted so the result is stable.
    pub fn build_filter_directive(&self) -> String {
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort();

        let mut directive = self.level.to_ascii_lowercase();
        for (target, level) in modules {
            directive.push(',');
            directive.push_str(target);
            directive.push('=');
            directive.push_str(&level.to_ascii_lowercase());
        }
        directive
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
