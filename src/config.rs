//! Configuration loading.
//!
//! Settings come from an optional JSON file, then environment variables
//! override individual connection fields and the journal path.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::connectors::ConnectionConfig;
use crate::db::migrator::ModificationOptions;
use crate::error::{GuardError, Result};
use crate::security::validate_connection_string;

/// Config file read when `--config` is not given, if present.
pub const DEFAULT_CONFIG_PATH: &str = "colguard.json";

/// Journal file used when none is configured.
pub const DEFAULT_JOURNAL_PATH: &str = "colguard-journal.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub modification: ModificationOptions,
    pub journal_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            modification: ModificationOptions::default(),
            journal_path: PathBuf::from(DEFAULT_JOURNAL_PATH),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from `colguard.json` when it exists, then apply
    /// `COLGUARD_*` environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!("cannot read config file {:?}: {}", path, e))
        })?;
        log::debug!("Loaded configuration from {:?}", path);
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| GuardError::Config(format!("invalid config: {}", e)))
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let conn = &mut self.connection;
        if let Some(v) = lookup("COLGUARD_HOST") {
            conn.host = Some(v);
        }
        if let Some(v) = lookup("COLGUARD_PORT") {
            let port = v.trim().parse::<u16>().map_err(|_| {
                GuardError::Config(format!("COLGUARD_PORT is not a valid port: {}", v))
            })?;
            conn.port = Some(port);
        }
        if let Some(v) = lookup("COLGUARD_DATABASE") {
            conn.database = Some(v);
        }
        if let Some(v) = lookup("COLGUARD_USER") {
            conn.username = Some(v);
        }
        if let Some(v) = lookup("COLGUARD_PASSWORD") {
            conn.password = Some(v);
        }
        if let Some(v) = lookup("COLGUARD_CONNECTION_STRING") {
            conn.connection_string = Some(v);
        }
        if let Some(v) = lookup("COLGUARD_JOURNAL") {
            self.journal_path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(conn_str) = &self.connection.connection_string {
            validate_connection_string(conn_str)?;
        }
        if self.connection.connection_timeout_secs == 0 {
            return Err(GuardError::Config(
                "connection_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.journal_path.as_os_str().is_empty() {
            return Err(GuardError::Config("journal_path must not be empty".to_string()));
        }
        Ok(())
    }
}
