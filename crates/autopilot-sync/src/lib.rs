//! Refresh pipeline: fetch every configured table, let the cycle hook plan
//! writes, apply them in order, and report one [`CycleResult`] per cycle.

pub mod config;
pub mod dashboard;
pub mod demo;
pub mod scheduler;
pub mod upsert;

use std::sync::Arc;

use anyhow::{Context, Result};
use autopilot_adapters::{adapter_for_kind, TableSnapshot};
use autopilot_core::{ApplicationRecord, Block, CycleCounts, CycleResult, RecordKind};
use autopilot_storage::{NotionClient, RemoteTableClient};
use chrono::Utc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{load_dotenv, ConfigError, DotenvFailure, LogLevel, SyncConfig, TableSet};
pub use dashboard::{DashboardSection, DashboardUpdate};
pub use scheduler::{RefreshScheduler, SchedulerState};
pub use upsert::{
    CreateError, CreatedRow, UpdateError, UpsertEngine, UpsertError, UpsertOutcome,
    ValidationError,
};

pub const CRATE_NAME: &str = "autopilot-sync";

/// A write requested by a [`CycleHook`], applied after all tables are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedWrite {
    CreateRow {
        table_id: String,
        title: String,
        status: Option<String>,
    },
    UpdateStatus {
        row_id: String,
        status: String,
    },
    UpdateRecord {
        table_id: String,
        record: ApplicationRecord,
    },
    UpsertByTitle {
        table_id: String,
        title: String,
        status: String,
    },
    /// Append page content to an existing row. Counted as an update.
    AppendBlocks {
        row_id: String,
        blocks: Vec<Block>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CycleSnapshot {
    pub tables: Vec<TableSnapshot>,
}

impl CycleSnapshot {
    pub fn table(&self, kind: RecordKind) -> Option<&TableSnapshot> {
        self.tables.iter().find(|t| t.kind == kind)
    }

    pub fn records(&self, kind: RecordKind) -> impl Iterator<Item = &ApplicationRecord> {
        self.tables
            .iter()
            .filter(move |t| t.kind == kind)
            .flat_map(|t| t.records.iter())
    }

    pub fn fetched(&self) -> usize {
        self.tables.iter().map(|t| t.records.len()).sum()
    }
}

/// Transform step of a cycle: inspect what was fetched and plan writes.
pub trait CycleHook: Send + Sync {
    fn plan(&self, snapshot: &CycleSnapshot) -> Result<Vec<PlannedWrite>>;
}

impl<F> CycleHook for F
where
    F: Fn(&CycleSnapshot) -> Result<Vec<PlannedWrite>> + Send + Sync,
{
    fn plan(&self, snapshot: &CycleSnapshot) -> Result<Vec<PlannedWrite>> {
        self(snapshot)
    }
}

#[derive(Debug, Default)]
pub struct NoopCycleHook;

impl CycleHook for NoopCycleHook {
    fn plan(&self, _snapshot: &CycleSnapshot) -> Result<Vec<PlannedWrite>> {
        Ok(Vec::new())
    }
}

pub struct SyncPipeline {
    engine: UpsertEngine,
    targets: Vec<(RecordKind, String)>,
    hook: Box<dyn CycleHook>,
}

impl SyncPipeline {
    pub fn new(client: Arc<dyn RemoteTableClient>, tables: &TableSet) -> Self {
        Self {
            engine: UpsertEngine::new(client),
            targets: tables.refresh_targets(),
            hook: Box::<NoopCycleHook>::default(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let client = NotionClient::new(config.client_config())?;
        Ok(Self::new(Arc::new(client), &config.tables))
    }

    pub fn with_hook(mut self, hook: Box<dyn CycleHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn engine(&self) -> &UpsertEngine {
        &self.engine
    }

    pub fn targets(&self) -> &[(RecordKind, String)] {
        &self.targets
    }

    /// Fetch every target table in order. The first failure aborts the fetch.
    pub async fn fetch_all(&self, counts: &mut CycleCounts) -> Result<CycleSnapshot> {
        let mut snapshot = CycleSnapshot::default();
        for (kind, table_id) in &self.targets {
            let table = adapter_for_kind(*kind)
                .fetch(self.engine.client(), table_id)
                .await
                .with_context(|| format!("fetching {} table {table_id}", kind.label()))?;
            counts.fetched += table.records.len();
            snapshot.tables.push(table);
        }
        Ok(snapshot)
    }

    /// Run one cycle. Every error is caught here and reported in the result.
    pub async fn run_cycle(&self) -> CycleResult {
        let run_id = Uuid::new_v4();
        async move {
            let started_at = Utc::now();
            info!(tables = self.targets.len(), "starting refresh cycle");
            let mut counts = CycleCounts::default();
            match self.execute(&mut counts).await {
                Ok(()) => {
                    info!(
                        fetched = counts.fetched,
                        created = counts.created,
                        updated = counts.updated,
                        "refresh cycle complete"
                    );
                    CycleResult::succeeded(run_id, started_at, Utc::now(), counts)
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(error = %message, "refresh cycle failed");
                    CycleResult::failed(run_id, started_at, Utc::now(), counts, message)
                }
            }
        }
        .instrument(info_span!("refresh_cycle", %run_id))
        .await
    }

    async fn execute(&self, counts: &mut CycleCounts) -> Result<()> {
        if self.targets.is_empty() {
            warn!("no tables configured; nothing to refresh");
        }
        let snapshot = self.fetch_all(counts).await?;
        let writes = self.hook.plan(&snapshot).context("planning cycle writes")?;
        for write in &writes {
            self.apply(write, counts).await?;
        }
        Ok(())
    }

    async fn apply(&self, write: &PlannedWrite, counts: &mut CycleCounts) -> Result<()> {
        match write {
            PlannedWrite::CreateRow {
                table_id,
                title,
                status,
            } => {
                self.engine
                    .create_row(table_id, title, status.as_deref())
                    .await
                    .with_context(|| format!("creating {title:?} in {table_id}"))?;
                counts.created += 1;
            }
            PlannedWrite::UpdateStatus { row_id, status } => {
                self.engine
                    .update_status(row_id, status)
                    .await
                    .with_context(|| format!("updating status of {row_id}"))?;
                counts.updated += 1;
            }
            PlannedWrite::UpdateRecord { table_id, record } => {
                self.engine
                    .update_record(table_id, record)
                    .await
                    .with_context(|| format!("updating record {}", record.id))?;
                counts.updated += 1;
            }
            PlannedWrite::UpsertByTitle {
                table_id,
                title,
                status,
            } => {
                let outcome = self
                    .engine
                    .upsert_by_title(table_id, title, status)
                    .await
                    .with_context(|| format!("upserting {title:?} in {table_id}"))?;
                match outcome {
                    UpsertOutcome::Created(_) => counts.created += 1,
                    UpsertOutcome::Updated { .. } => counts.updated += 1,
                }
            }
            PlannedWrite::AppendBlocks { row_id, blocks } => {
                self.engine
                    .append_to_row(row_id, blocks)
                    .await
                    .with_context(|| format!("appending blocks to {row_id}"))?;
                counts.updated += 1;
            }
        }
        Ok(())
    }
}
