use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use autopilot_storage::{NotionClient, RemoteTableClient};
use autopilot_sync::demo::run_demo;
use autopilot_sync::config::LOG_FILE_NAME;
use autopilot_sync::{
    load_dotenv, DashboardUpdate, RefreshScheduler, SyncConfig, SyncPipeline, UpsertEngine,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "autopilot")]
#[command(about = "Keep Notion workspace tables in sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single refresh cycle and record it in the changelog.
    Sync,
    /// Refresh on an interval until interrupted.
    Run {
        /// Overrides UPDATE_INTERVAL.
        #[arg(long)]
        interval_minutes: Option<u64>,
    },
    /// List, create and update rows in one table.
    Demo {
        /// Defaults to NOTION_PROJECTS_DB.
        #[arg(long)]
        table: Option<String>,
    },
    /// Verify the API key by fetching the integration's user.
    Check,
    /// Publish a dashboard row with the given highlight lines.
    Dashboard {
        #[arg(long)]
        title: String,
        #[arg(long)]
        heading: Option<String>,
        #[arg(long = "line")]
        lines: Vec<String>,
        /// Defaults to NOTION_DASHBOARDS_DB.
        #[arg(long)]
        table: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("autopilot error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let dotenv_failures = load_dotenv();
    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            for failure in &dotenv_failures {
                eprintln!("autopilot warning: {failure}");
            }
            return Err(err).context("loading configuration");
        }
    };
    let _log_guard = init_tracing(&config)?;
    for failure in &dotenv_failures {
        warn!(path = %failure.path.display(), error = %failure.source, "failed to load dotenv file");
    }

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let mut scheduler = scheduler(&config, config.refresh_interval())?;
            let result = scheduler.run_cycle().await;
            println!(
                "sync {}: run_id={} fetched={} created={} updated={}",
                if result.success { "complete" } else { "failed" },
                result.run_id,
                result.counts.fetched,
                result.counts.created,
                result.counts.updated
            );
            if let Some(error) = result.error {
                bail!("refresh cycle failed: {error}");
            }
        }
        Commands::Run { interval_minutes } => {
            let interval = match interval_minutes {
                Some(0) => bail!("--interval-minutes must be positive"),
                Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
                None => config.refresh_interval(),
            };
            let mut scheduler = scheduler(&config, interval)?;
            let cycles = scheduler.run_until_interrupted().await;
            info!(cycles, "refresh scheduler stopped");
        }
        Commands::Demo { table } => {
            let table = table
                .or_else(|| config.tables.projects.clone())
                .context("no table for the demo; pass --table or set NOTION_PROJECTS_DB")?;
            let report = run_demo(&engine(&config)?, &table).await?;
            println!(
                "demo complete: rows={} created={} status={}",
                report.final_rows.max(report.initial_rows),
                report.created_row.as_deref().unwrap_or("-"),
                report.updated_status.as_deref().unwrap_or("-")
            );
        }
        Commands::Check => {
            let client = NotionClient::new(config.client_config())?;
            let user = client
                .current_user()
                .await
                .context("connecting to the Notion API")?;
            println!(
                "connection successful; logged in as {}",
                user.name.as_deref().unwrap_or("Unknown")
            );
        }
        Commands::Dashboard {
            title,
            heading,
            lines,
            table,
        } => {
            let table = table
                .or_else(|| config.tables.dashboards.clone())
                .context("no dashboard table; pass --table or set NOTION_DASHBOARDS_DB")?;
            let update = lines.into_iter().fold(
                DashboardUpdate::new(heading.unwrap_or_else(|| title.clone())),
                DashboardUpdate::highlight,
            );
            let row_id = engine(&config)?
                .create_dashboard_update(&table, &title, &update)
                .await?;
            println!("dashboard update created: {row_id}");
        }
    }

    Ok(())
}

fn engine(config: &SyncConfig) -> Result<UpsertEngine> {
    let client = NotionClient::new(config.client_config())?;
    Ok(UpsertEngine::new(Arc::new(client)))
}

fn scheduler(config: &SyncConfig, interval: Duration) -> Result<RefreshScheduler> {
    let pipeline = SyncPipeline::from_config(config)?;
    Ok(RefreshScheduler::new(pipeline, config.audit_sink(), interval))
}

/// Log to stdout and to a plain-text file under the data directory. The
/// returned guard flushes the file writer on drop.
fn init_tracing(config: &SyncConfig) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_env("AUTOPILOT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    let (file_writer, guard) = log_file_writer(config)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(guard)
}

fn log_file_writer(config: &SyncConfig) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let appender = tracing_appender::rolling::never(&config.data_dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_lines_reach_the_file_in_the_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().join("nested");
        let config = SyncConfig::from_lookup(|key| match key {
            "NOTION_API_KEY" => Some("secret".to_string()),
            "AUTOPILOT_DATA_DIR" => data_dir.to_str().map(str::to_string),
            _ => None,
        })
        .expect("config");

        let (writer, guard) = log_file_writer(&config).expect("file writer");
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(writer));
        tracing::subscriber::with_default(subscriber, || {
            info!(run = 7, "refresh cycle complete");
        });
        drop(guard);

        let text = std::fs::read_to_string(config.log_file()).expect("log file");
        assert!(text.contains("refresh cycle complete"), "{text}");
        assert!(text.contains("run=7"), "{text}");
        assert!(!text.contains('\u{1b}'), "{text}");
    }
}
