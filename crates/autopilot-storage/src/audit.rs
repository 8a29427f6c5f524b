//! Append-only changelog of cycle outcomes (`timestamp,status,message`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use autopilot_core::CycleResult;
use chrono::{DateTime, Local, TimeZone};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const CHANGELOG_HEADER: &str = "timestamp,status,message";
pub const CHANGELOG_FILE: &str = "changelog.csv";

/// Changelog file handle. The file is opened, appended and closed on every
/// write; no handle is held between writes.
#[derive(Debug, Clone)]
pub struct AuditSink {
    path: PathBuf,
    enabled: bool,
}

impl AuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
        }
    }

    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(CHANGELOG_FILE))
    }

    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn record(&self, result: &CycleResult) -> anyhow::Result<()> {
        self.append_at(
            result.finished_at.with_timezone(&Local),
            result.audit_status(),
            &result.audit_message(),
        )
        .await
    }

    pub async fn append(&self, status: &str, message: &str) -> anyhow::Result<()> {
        self.append_at(Local::now(), status, message).await
    }

    async fn append_at<Tz: TimeZone>(
        &self,
        timestamp: DateTime<Tz>,
        status: &str,
        message: &str,
    ) -> anyhow::Result<()>
    where
        Tz::Offset: std::fmt::Display,
    {
        if !self.enabled {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating changelog directory {}", parent.display()))?;
        }

        let exists = fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking changelog {}", self.path.display()))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening changelog {}", self.path.display()))?;

        let mut buf = String::new();
        if !exists {
            buf.push_str(CHANGELOG_HEADER);
            buf.push('\n');
        }
        buf.push_str(&format_line(&timestamp, status, message));
        buf.push('\n');

        file.write_all(buf.as_bytes())
            .await
            .with_context(|| format!("appending to changelog {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing changelog {}", self.path.display()))?;
        debug!(path = %self.path.display(), message, "added to changelog");
        Ok(())
    }
}

/// Keep each record on one line with exactly three fields.
fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            ',' => ';',
            other => other,
        })
        .collect()
}

pub fn format_line<Tz: TimeZone>(timestamp: &DateTime<Tz>, status: &str, message: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{},{},{}",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        sanitize(status),
        sanitize(message)
    )
}
