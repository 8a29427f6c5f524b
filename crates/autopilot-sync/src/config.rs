use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use autopilot_core::RecordKind;
use autopilot_storage::{AuditSink, NotionClientConfig, DEFAULT_API_VERSION, DEFAULT_BASE_URL};
use thiserror::Error;

pub const DEFAULT_REFRESH_MINUTES: u64 = 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const LOG_FILE_NAME: &str = "autopilot.log";

/// Dotenv files read by [`load_dotenv`], in load order.
pub const DOTENV_PATHS: [&str; 2] = ["config/.env", ".env"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required configuration {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err("expected DEBUG, INFO, WARNING, ERROR or CRITICAL"),
        }
    }
}

/// Remote table identifiers, each optional per feature used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSet {
    pub projects: Option<String>,
    pub tasks: Option<String>,
    pub prompts: Option<String>,
    pub dashboards: Option<String>,
}

impl TableSet {
    /// Tables fetched by every refresh cycle, in fetch order.
    pub fn refresh_targets(&self) -> Vec<(RecordKind, String)> {
        [
            (RecordKind::Project, &self.projects),
            (RecordKind::Task, &self.tasks),
            (RecordKind::Prompt, &self.prompts),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.clone().map(|id| (kind, id)))
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_key: String,
    pub api_version: String,
    pub base_url: String,
    pub tables: TableSet,
    pub refresh_interval_minutes: u64,
    pub audit_enabled: bool,
    pub log_level: LogLevel,
    pub data_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl SyncConfig {
    /// Read the process environment. Call [`load_dotenv`] first to pick up
    /// dotenv files.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("NOTION_API_KEY").ok_or(ConfigError::Missing("NOTION_API_KEY"))?;

        let refresh_interval_minutes = match get("UPDATE_INTERVAL") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(minutes) if minutes > 0 => minutes,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "UPDATE_INTERVAL",
                        value: raw,
                        reason: "expected a positive number of minutes",
                    })
                }
            },
            None => DEFAULT_REFRESH_MINUTES,
        };

        let audit_enabled = match get("ENABLE_CHANGELOG") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
                key: "ENABLE_CHANGELOG",
                value: raw.clone(),
                reason: "expected true or false",
            })?,
            None => true,
        };

        let log_level = match get("LOG_LEVEL") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "LOG_LEVEL",
                value: raw.clone(),
                reason,
            })?,
            None => LogLevel::default(),
        };

        let http_timeout_secs = match get("NOTION_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "NOTION_HTTP_TIMEOUT_SECS",
                value: raw.clone(),
                reason: "expected a number of seconds",
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            api_key,
            api_version: get("NOTION_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            base_url: get("NOTION_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            tables: TableSet {
                projects: get("NOTION_PROJECTS_DB"),
                tasks: get("NOTION_TASKS_DB"),
                prompts: get("NOTION_PROMPTS_DB"),
                dashboards: get("NOTION_DASHBOARDS_DB"),
            },
            refresh_interval_minutes,
            audit_enabled,
            log_level,
            data_dir: get("AUTOPILOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            http_timeout_secs,
            user_agent: get("AUTOPILOT_USER_AGENT")
                .unwrap_or_else(|| format!("notion-autopilot/{}", env!("CARGO_PKG_VERSION"))),
        })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn client_config(&self) -> NotionClientConfig {
        NotionClientConfig {
            api_version: self.api_version.clone(),
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..NotionClientConfig::new(self.api_key.clone())
        }
    }

    pub fn audit_sink(&self) -> AuditSink {
        AuditSink::in_dir(&self.data_dir).with_enabled(self.audit_enabled)
    }

    /// File receiving a plain-text copy of the log output.
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE_NAME)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Error)]
#[error("failed to load dotenv file {}: {source}", .path.display())]
pub struct DotenvFailure {
    pub path: PathBuf,
    #[source]
    pub source: dotenvy::Error,
}

/// Load [`DOTENV_PATHS`] into the environment; variables already set win.
/// Failures are returned rather than logged so they can be reported once
/// logging is up.
pub fn load_dotenv() -> Vec<DotenvFailure> {
    load_dotenv_files(DOTENV_PATHS.into_iter().map(Path::new))
}

/// Load each existing file in order. Missing files are skipped.
pub fn load_dotenv_files<'a, I>(paths: I) -> Vec<DotenvFailure>
where
    I: IntoIterator<Item = &'a Path>,
{
    paths
        .into_iter()
        .filter(|path| path.exists())
        .filter_map(|path| {
            dotenvy::from_path(path).err().map(|source| DotenvFailure {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}
