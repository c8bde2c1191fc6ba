//! Layered settings for the command-line front end and embedders.
//!
//! Precedence: explicit arguments > `DOCMOCK_*` environment > TOML file > defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::DbError;
use crate::logger;
use crate::query::telemetry;

pub const CONFIG_ENV: &str = "DOCMOCK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "docmock.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
    pub level: Option<String>,
    pub retention: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Dump file the CLI reads and writes back.
    pub dump_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySettings {
    /// Reads at or above this many milliseconds are logged as slow.
    pub slow_query_ms: Option<u64>,
    /// Audit lines for writes; on unless set to false.
    pub audit: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetrySettings,
}

impl EngineConfig {
    /// # Errors
    /// `Config` for malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, DbError> {
        toml::from_str(text).map_err(|e| DbError::Config(e.to_string()))
    }

    /// # Errors
    /// `Io` when the file cannot be read, `Config` when it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| DbError::Config(format!("{}: {e}", path.display())))
    }

    /// Settings taken from variables looked up through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            logging: LoggingConfig {
                dir: var("DOCMOCK_LOG_DIR").map(PathBuf::from),
                level: var("DOCMOCK_LOG_LEVEL"),
                retention: var("DOCMOCK_LOG_RETENTION").and_then(|s| s.parse().ok()),
            },
            storage: StorageConfig { dump_path: var("DOCMOCK_DUMP").map(PathBuf::from) },
            telemetry: TelemetrySettings {
                slow_query_ms: var("DOCMOCK_SLOW_QUERY_MS").and_then(|s| s.parse().ok()),
                audit: var("DOCMOCK_AUDIT").map(|s| !matches!(s.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")),
            },
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    /// Fields set in `higher` win over fields set in `self`.
    #[must_use]
    pub fn overlay(self, higher: Self) -> Self {
        Self {
            logging: LoggingConfig {
                dir: higher.logging.dir.or(self.logging.dir),
                level: higher.logging.level.or(self.logging.level),
                retention: higher.logging.retention.or(self.logging.retention),
            },
            storage: StorageConfig { dump_path: higher.storage.dump_path.or(self.storage.dump_path) },
            telemetry: TelemetrySettings {
                slow_query_ms: higher.telemetry.slow_query_ms.or(self.telemetry.slow_query_ms),
                audit: higher.telemetry.audit.or(self.telemetry.audit),
            },
        }
    }

    /// Builds the effective configuration. The file is `file` if given, else `$DOCMOCK_CONFIG`,
    /// else `./docmock.toml` when present.
    ///
    /// # Errors
    /// See [`EngineConfig::from_file`]. A missing default file is not an error; a missing
    /// explicit one is.
    pub fn resolve(file: Option<&Path>, args: Self) -> Result<Self, DbError> {
        let explicit = file.map(Path::to_path_buf).or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
        let from_file = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        let cfg = from_file.overlay(Self::from_env()).overlay(args);
        log::debug!("effective config: {cfg:?}");
        Ok(cfg)
    }

    /// Pushes the `[telemetry]` table into the process-wide telemetry switches. Unset fields
    /// leave the current setting alone.
    pub fn apply_telemetry(&self) {
        if let Some(ms) = self.telemetry.slow_query_ms {
            telemetry::set_slow_query_ms(ms);
        }
        if let Some(enabled) = self.telemetry.audit {
            telemetry::set_audit_enabled(enabled);
        }
    }

    /// Installs log4rs according to the `[logging]` table. Nothing is installed when no log
    /// directory is configured.
    ///
    /// # Errors
    /// See [`logger::configure_logging`].
    pub fn init_logging(&self) -> Result<(), DbError> {
        match &self.logging.dir {
            Some(dir) => logger::configure_logging(Some(dir), self.logging.level.as_deref(), self.logging.retention, false),
            None => Ok(()),
        }
    }
}
