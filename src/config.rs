use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::protocol::MetricKind;
use crate::util::get_default_socket_path;

const DEFAULT_ENVIRONMENT: &str = "dev";
const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETENTION_HOURS: u64 = 24;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read monitor config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid monitor config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    Memory,

    /// SQLite database shared by collector and agent
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./tally.db")
}

/// Process configuration read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub environment: String,
    pub service_name: String,
    pub socket_path: PathBuf,
    pub storage: StorageConfig,
    pub monitor_config_file: Option<PathBuf>,
    pub notification_api: Option<String>,
    pub notification_secret: Option<String>,
    pub retention: Duration,
}

impl AppConfig {
    /// Load `.<ENV>.env` and `.env` (both optional), then read the environment
    ///
    /// Variables already present in the environment take precedence over both
    /// files, and the environment specific file over `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(env) = std::env::var("ENV") {
            let file = format!(".{}.env", env.to_lowercase());
            match dotenv::from_filename(&file) {
                Ok(path) => debug!("loaded {}", path.display()),
                Err(_) => debug!("no {file} found"),
            }
        }
        dotenv::dotenv().ok();

        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let environment = get("TALLY_ENVIRONMENT")
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase();

        let storage = match get("TALLY_STORAGE").as_deref() {
            None | Some("sqlite") => StorageConfig::Sqlite {
                path: get("TALLY_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_sqlite_path),
            },
            Some("memory") => StorageConfig::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "TALLY_STORAGE",
                    value: other.to_string(),
                });
            }
        };

        let retention_hours = match get("TALLY_RETENTION_HOURS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|hours| *hours > 0)
                .ok_or(ConfigError::InvalidValue {
                    var: "TALLY_RETENTION_HOURS",
                    value: raw,
                })?,
            None => DEFAULT_RETENTION_HOURS,
        };

        let config = Self {
            environment,
            service_name: get("TALLY_SERVICE_NAME").unwrap_or_default(),
            socket_path: get("TALLY_SOCKET")
                .map(PathBuf::from)
                .unwrap_or_else(get_default_socket_path),
            storage,
            monitor_config_file: get("MONITOR_CONFIG_FILE").map(PathBuf::from),
            notification_api: get("NOTIFICATION_API"),
            notification_secret: get("NOTIFICATION_SECRET"),
            retention: Duration::from_secs(retention_hours * 3600),
        };

        trace!("loaded app config: {config:?}");
        Ok(config)
    }
}

/// One alerting rule attached to a [`Monitor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub threshold: f32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    /// Suppression window in minutes
    #[serde(default)]
    pub run_every: i64,
    #[serde(default)]
    pub subject: String,
}

impl Trigger {
    pub fn suppress_interval(&self) -> Duration {
        Duration::from_secs(self.run_every.max(0) as u64 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub metric: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Aggregation window and poll interval in seconds
    #[serde(default)]
    pub interval: i64,
    #[serde(default)]
    pub notifier: Option<String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub subject: Option<String>,
}

impl Monitor {
    /// Poll interval, falling back to 60 seconds when unset or not positive
    pub fn interval(&self) -> Duration {
        if self.interval > 0 {
            Duration::from_secs(self.interval as u64)
        } else {
            Duration::from_secs(DEFAULT_INTERVAL_SECS)
        }
    }

    pub fn is_counter(&self) -> bool {
        let kind = self.kind.trim().to_lowercase();
        MetricKind::from_code(&kind) == Some(MetricKind::Counter) || kind == "counter"
    }

    /// Subject used for triggers that do not declare one
    pub fn subject_for(&self, service_name: &str) -> String {
        self.subject
            .clone()
            .unwrap_or_else(|| format!("{} error limit exceeded in {service_name}", self.metric))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub monitors: Vec<Monitor>,
}

pub fn read_monitor_config(
    path: impl AsRef<Path>,
    service_name: &str,
) -> Result<Vec<Monitor>, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_monitor_config(&file_content, service_name)
}

/// Parse a YAML monitor document and fill in defaults
///
/// Triggers without a subject inherit the monitor's subject and duplicate
/// recipients are dropped, keeping the first occurrence.
pub fn parse_monitor_config(content: &str, service_name: &str) -> Result<Vec<Monitor>, ConfigError> {
    let config: MonitorConfig = serde_yaml::from_str(content)?;

    let monitors = config
        .monitors
        .into_iter()
        .map(|mut monitor| {
            let subject = monitor.subject_for(service_name);
            for trigger in &mut monitor.triggers {
                if trigger.subject.trim().is_empty() {
                    trigger.subject = subject.clone();
                }
                dedup_preserving_order(&mut trigger.to);
            }
            monitor
        })
        .collect::<Vec<_>>();

    trace!("loaded {} monitors", monitors.len());
    Ok(monitors)
}

fn dedup_preserving_order(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|value| seen.insert(value.clone()));
}
