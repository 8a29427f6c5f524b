//! Table adapters: per-kind query building against the discovered schema,
//! plus fetch-and-map into application records.

use async_trait::async_trait;
use autopilot_core::mapper::{self, CATEGORY_COLUMN, DUE_DATE_COLUMN, PRIORITY_COLUMN};
use autopilot_core::{ApplicationRecord, RecordKind, TableSchema};
use autopilot_storage::{RemoteError, RemoteTableClient, RowQuery, SortDirection};
use serde::Serialize;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "autopilot-adapters";

/// Status excluded from project and task fetches.
pub const COMPLETED_STATUS: &str = "Completed";

/// Records fetched from one table in one cycle, with the schema they were mapped against.
#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    pub table_id: String,
    pub kind: RecordKind,
    pub schema: TableSchema,
    pub records: Vec<ApplicationRecord>,
}

#[async_trait]
pub trait TableAdapter: Send + Sync {
    fn kind(&self) -> RecordKind;

    fn build_query(&self, schema: &TableSchema) -> RowQuery;

    async fn fetch(
        &self,
        client: &dyn RemoteTableClient,
        table_id: &str,
    ) -> Result<TableSnapshot, RemoteError> {
        let kind = self.kind();
        info!(table_id, kind = kind.label(), "fetching rows");
        let schema = client.discover(table_id).await?;
        let query = self.build_query(&schema);
        let rows = client.query(table_id, &query).await?;
        let records: Vec<_> = rows
            .iter()
            .map(|row| mapper::to_record(row, kind, &schema))
            .collect();
        info!(table_id, count = records.len(), "fetched rows");
        Ok(TableSnapshot {
            table_id: table_id.to_string(),
            kind,
            schema,
            records,
        })
    }
}

fn exclude_completed(query: RowQuery, schema: &TableSchema) -> RowQuery {
    match schema.status_column() {
        Some(status) => query.status_not(status.name, COMPLETED_STATUS),
        None => {
            debug!("no status column; fetching without a status filter");
            query
        }
    }
}

fn sort_if_present(
    query: RowQuery,
    schema: &TableSchema,
    column: &str,
    direction: SortDirection,
) -> RowQuery {
    if schema.column(column).is_some() {
        query.sorted_by(column, direction)
    } else {
        debug!(column, "sort column missing from schema; leaving rows unsorted");
        query
    }
}

/// Open projects, highest priority first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectsAdapter;

#[async_trait]
impl TableAdapter for ProjectsAdapter {
    fn kind(&self) -> RecordKind {
        RecordKind::Project
    }

    fn build_query(&self, schema: &TableSchema) -> RowQuery {
        let query = exclude_completed(RowQuery::default(), schema);
        sort_if_present(query, schema, PRIORITY_COLUMN, SortDirection::Descending)
    }
}

/// Open tasks, earliest due date first.
#[derive(Debug, Default, Clone, Copy)]
pub struct TasksAdapter;

#[async_trait]
impl TableAdapter for TasksAdapter {
    fn kind(&self) -> RecordKind {
        RecordKind::Task
    }

    fn build_query(&self, schema: &TableSchema) -> RowQuery {
        let query = exclude_completed(RowQuery::default(), schema);
        sort_if_present(query, schema, DUE_DATE_COLUMN, SortDirection::Ascending)
    }
}

/// Whole prompt library, grouped by category.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptsAdapter;

#[async_trait]
impl TableAdapter for PromptsAdapter {
    fn kind(&self) -> RecordKind {
        RecordKind::Prompt
    }

    fn build_query(&self, schema: &TableSchema) -> RowQuery {
        sort_if_present(
            RowQuery::default(),
            schema,
            CATEGORY_COLUMN,
            SortDirection::Ascending,
        )
    }
}

pub fn adapter_for_kind(kind: RecordKind) -> Box<dyn TableAdapter> {
    match kind {
        RecordKind::Project => Box::new(ProjectsAdapter),
        RecordKind::Task => Box::new(TasksAdapter),
        RecordKind::Prompt => Box::new(PromptsAdapter),
    }
}
