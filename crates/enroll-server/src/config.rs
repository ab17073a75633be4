//! Server configuration: defaults, optional JSON file, then `ENROLL_*`
//! environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use enroll_telemetry::{TelemetryConfig, TelemetryError};

use crate::codec::DEFAULT_MAX_FRAME_LENGTH;

/// Errors that can occur when loading the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// `0` asks the OS for a free port.
    pub port: u16,
    pub db_path: PathBuf,
    pub max_frame_length: usize,
    /// Outbound envelopes buffered per client before broadcasts are dropped.
    pub send_queue_len: usize,
    pub log_level: String,
    pub log_format: String,
    /// Per-module levels, e.g. `{"enroll_store": "debug"}`.
    pub log_modules: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            db_path: PathBuf::from("enroll.db"),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            send_queue_len: 256,
            log_level: "info".into(),
            log_format: "pretty".into(),
            log_modules: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `path` when given and present, then env.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file over the defaults. A missing file yields defaults;
    /// keys absent from the file keep their default values.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let defaults = serde_json::to_value(Self::default())?;
        let merged = if path.exists() {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            overlay(defaults, user)
        } else {
            debug!(?path, "config file not found, using defaults");
            defaults
        };
        Ok(serde_json::from_value(merged)?)
    }

    /// Apply `ENROLL_HOST`, `ENROLL_PORT`, `ENROLL_DB` and
    /// `ENROLL_LOG_FORMAT`. Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = read("ENROLL_HOST") {
            self.host = v;
        }
        if let Some(v) = read("ENROLL_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => warn!(key = "ENROLL_PORT", value = %v, "invalid port env var, ignoring"),
            }
        }
        if let Some(v) = read("ENROLL_DB") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = read("ENROLL_LOG_FORMAT") {
            self.log_format = v;
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("host must not be empty".into()));
        }
        if self.max_frame_length == 0 {
            return Err(SettingsError::InvalidValue("max_frame_length must be positive".into()));
        }
        if self.send_queue_len == 0 {
            return Err(SettingsError::InvalidValue("send_queue_len must be positive".into()));
        }
        Ok(())
    }

    /// Logging setup described by the `log_*` fields.
    pub fn telemetry(&self) -> Result<TelemetryConfig, TelemetryError> {
        let mut telemetry = TelemetryConfig::from_strings(&self.log_level, &self.log_format)?;
        for (module, level) in &self.log_modules {
            let level: tracing::Level = level
                .parse()
                .map_err(|_| TelemetryError::InvalidLevel(level.clone()))?;
            telemetry.module_levels.push((module.clone(), level));
        }
        Ok(telemetry)
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level key overlay; null values in `source` keep the target's value.
fn overlay(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                if !value.is_null() {
                    let _ = target_map.insert(key, value);
                }
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}
