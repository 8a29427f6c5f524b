//! In-process table store implementing [`RemoteTableClient`].
//!
//! Mirrors the remote store's write validation (unknown columns and unknown
//! status options are rejected with a 400) and records every call so callers
//! can assert which reads and writes were issued.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use autopilot_core::{
    mapper, Block, ColumnDefinition, PropertyMap, PropertyValue, RemoteRow, TableSchema,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{RemoteError, RemoteTableClient, RowQuery, SortDirection, UserInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    RetrieveSchema,
    CreateRow,
    UpdateRow,
    RetrieveRow,
    AppendBlocks,
    CurrentUser,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Query { table_id: String, query: RowQuery },
    RetrieveSchema { table_id: String },
    CreateRow { table_id: String, properties: PropertyMap },
    UpdateRow { row_id: String, properties: PropertyMap },
    RetrieveRow { row_id: String },
    AppendBlocks { row_id: String, blocks: Vec<Block> },
    CurrentUser,
}

impl RecordedCall {
    pub fn operation(&self) -> Operation {
        match self {
            RecordedCall::Query { .. } => Operation::Query,
            RecordedCall::RetrieveSchema { .. } => Operation::RetrieveSchema,
            RecordedCall::CreateRow { .. } => Operation::CreateRow,
            RecordedCall::UpdateRow { .. } => Operation::UpdateRow,
            RecordedCall::RetrieveRow { .. } => Operation::RetrieveRow,
            RecordedCall::AppendBlocks { .. } => Operation::AppendBlocks,
            RecordedCall::CurrentUser => Operation::CurrentUser,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.operation(),
            Operation::CreateRow | Operation::UpdateRow | Operation::AppendBlocks
        )
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<ColumnDefinition>,
    rows: Vec<RemoteRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    blocks: BTreeMap<String, Vec<Block>>,
    calls: Vec<RecordedCall>,
    failing: HashSet<Operation>,
}

impl MemoryState {
    fn table(&self, table_id: &str) -> Result<&MemoryTable, RemoteError> {
        self.tables
            .get(table_id)
            .ok_or_else(|| not_found("database", table_id))
    }

    fn locate_row(&self, row_id: &str) -> Result<(String, usize), RemoteError> {
        self.tables
            .iter()
            .find_map(|(table_id, table)| {
                table
                    .rows
                    .iter()
                    .position(|row| row.id == row_id)
                    .map(|idx| (table_id.clone(), idx))
            })
            .ok_or_else(|| not_found("page", row_id))
    }
}

fn not_found(object: &str, id: &str) -> RemoteError {
    RemoteError::api(
        404,
        "object_not_found",
        format!("Could not find {object} with ID: {id}."),
    )
}

fn injected_failure(operation: Operation) -> RemoteError {
    RemoteError::api(
        503,
        "service_unavailable",
        format!("{operation:?} is unavailable"),
    )
}

fn validate_properties(
    columns: &[ColumnDefinition],
    properties: &PropertyMap,
) -> Result<BTreeMap<String, PropertyValue>, RemoteError> {
    let schema = TableSchema::from_definitions(columns.to_vec());
    let mut values = BTreeMap::new();
    for (name, raw) in properties {
        if schema.column(name).is_none() {
            return Err(RemoteError::api(
                400,
                "validation_error",
                format!("{name} is not a property that exists."),
            ));
        }
        let value = mapper::from_write_value(raw).ok_or_else(|| {
            RemoteError::api(
                400,
                "validation_error",
                format!("{name} has an unsupported value shape."),
            )
        })?;
        if let (Some(status), Some(option)) = (schema.status_column(), value.option_name()) {
            if status.name == name && value.is_status() && !status.accepts(option) {
                return Err(RemoteError::api(
                    400,
                    "validation_error",
                    format!("Invalid status option. Status option \"{option}\" does not exist."),
                ));
            }
        }
        values.insert(name.clone(), value);
    }
    Ok(values)
}

#[derive(Debug, Default)]
pub struct MemoryTableClient {
    state: Mutex<MemoryState>,
}

impl MemoryTableClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table_id: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        self.lock().tables.insert(
            table_id.into(),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a row without recording a call.
    pub fn insert_row(&self, table_id: &str, properties: PropertyMap) -> Result<String, RemoteError> {
        let mut state = self.lock();
        let values = validate_properties(&state.table(table_id)?.columns, &properties)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let row = RemoteRow {
            url: format!("https://www.notion.so/{}", id.replace('-', "")),
            id: id.clone(),
            properties: values,
            created_time: now,
            last_edited_time: now,
        };
        state
            .tables
            .get_mut(table_id)
            .ok_or_else(|| not_found("database", table_id))?
            .rows
            .push(row);
        Ok(id)
    }

    /// Make every later call of `operation` fail with a 503.
    pub fn fail_operation(&self, operation: Operation) {
        self.lock().failing.insert(operation);
    }

    pub fn restore_operation(&self, operation: Operation) {
        self.lock().failing.remove(&operation);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, operation: Operation) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn rows(&self, table_id: &str) -> Vec<RemoteRow> {
        self.lock()
            .tables
            .get(table_id)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row(&self, row_id: &str) -> Option<RemoteRow> {
        let state = self.lock();
        let (table_id, idx) = state.locate_row(row_id).ok()?;
        state.tables.get(&table_id).map(|t| t.rows[idx].clone())
    }

    pub fn blocks(&self, row_id: &str) -> Vec<Block> {
        self.lock().blocks.get(row_id).cloned().unwrap_or_default()
    }

    fn begin(&self, call: RecordedCall) -> Result<MutexGuard<'_, MemoryState>, RemoteError> {
        let mut state = self.lock();
        let operation = call.operation();
        state.calls.push(call);
        if state.failing.contains(&operation) {
            return Err(injected_failure(operation));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteTableClient for MemoryTableClient {
    async fn query(&self, table_id: &str, query: &RowQuery) -> Result<Vec<RemoteRow>, RemoteError> {
        let state = self.begin(RecordedCall::Query {
            table_id: table_id.to_string(),
            query: query.clone(),
        })?;
        let mut rows: Vec<RemoteRow> = state
            .table(table_id)?
            .rows
            .iter()
            .filter(|row| match &query.filter {
                Some(filter) => {
                    row.properties
                        .get(&filter.column)
                        .and_then(PropertyValue::option_name)
                        != Some(filter.not_equal.as_str())
                }
                None => true,
            })
            .cloned()
            .collect();
        if let Some(sort) = &query.sort {
            // stable in both directions, rows without a value go last
            let mut keyed: Vec<(Option<String>, RemoteRow)> = rows
                .into_iter()
                .map(|row| {
                    let key = row.properties.get(&sort.column).and_then(PropertyValue::sort_text);
                    (key, row)
                })
                .collect();
            keyed.sort_by(|(a, _), (b, _)| match (a, b) {
                (Some(a), Some(b)) => match sort.direction {
                    SortDirection::Ascending => a.cmp(b),
                    SortDirection::Descending => b.cmp(a),
                },
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }
        Ok(rows)
    }

    async fn retrieve_schema(&self, table_id: &str) -> Result<Vec<ColumnDefinition>, RemoteError> {
        let state = self.begin(RecordedCall::RetrieveSchema {
            table_id: table_id.to_string(),
        })?;
        Ok(state.table(table_id)?.columns.clone())
    }

    async fn create_row(
        &self,
        table_id: &str,
        properties: &PropertyMap,
    ) -> Result<RemoteRow, RemoteError> {
        drop(self.begin(RecordedCall::CreateRow {
            table_id: table_id.to_string(),
            properties: properties.clone(),
        })?);
        let id = self.insert_row(table_id, properties.clone())?;
        self.row(&id).ok_or_else(|| not_found("page", &id))
    }

    async fn update_row(
        &self,
        row_id: &str,
        properties: &PropertyMap,
    ) -> Result<RemoteRow, RemoteError> {
        let mut state = self.begin(RecordedCall::UpdateRow {
            row_id: row_id.to_string(),
            properties: properties.clone(),
        })?;
        let (table_id, idx) = state.locate_row(row_id)?;
        let values = validate_properties(&state.table(&table_id)?.columns, properties)?;
        let table = state
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| not_found("database", &table_id))?;
        let row = &mut table.rows[idx];
        row.properties.extend(values);
        row.last_edited_time = Utc::now();
        Ok(row.clone())
    }

    async fn retrieve_row(&self, row_id: &str) -> Result<RemoteRow, RemoteError> {
        let state = self.begin(RecordedCall::RetrieveRow {
            row_id: row_id.to_string(),
        })?;
        let (table_id, idx) = state.locate_row(row_id)?;
        state
            .tables
            .get(&table_id)
            .map(|t| t.rows[idx].clone())
            .ok_or_else(|| not_found("page", row_id))
    }

    async fn append_blocks(&self, row_id: &str, blocks: &[Block]) -> Result<(), RemoteError> {
        let mut state = self.begin(RecordedCall::AppendBlocks {
            row_id: row_id.to_string(),
            blocks: blocks.to_vec(),
        })?;
        state.locate_row(row_id)?;
        state
            .blocks
            .entry(row_id.to_string())
            .or_default()
            .extend_from_slice(blocks);
        Ok(())
    }

    async fn current_user(&self) -> Result<UserInfo, RemoteError> {
        drop(self.begin(RecordedCall::CurrentUser)?);
        Ok(UserInfo {
            id: "memory-bot".to_string(),
            name: Some("In-memory workspace".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::mapper::{date_value, status_value, title_value};

    fn tasks_client() -> MemoryTableClient {
        MemoryTableClient::new().with_table(
            "tasks",
            vec![
                ColumnDefinition::title("Name"),
                ColumnDefinition::status("Status", &["Not Started", "Completed"]),
            ],
        )
    }

    fn props(title: &str, status: &str) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("Name".into(), title_value(title));
        props.insert("Status".into(), status_value(status));
        props
    }

    #[tokio::test]
    async fn rejects_unknown_columns_and_status_options() {
        let client = tasks_client();
        let mut unknown = props("A", "Not Started");
        unknown.insert("Owner".into(), title_value("x"));
        let err = client.create_row("tasks", &unknown).await.expect_err("unknown column");
        assert!(matches!(err, RemoteError::Api { status: 400, .. }));

        let err = client
            .create_row("tasks", &props("A", "Bogus"))
            .await
            .expect_err("bad status");
        assert!(err.to_string().contains("Bogus"));
        assert!(client.rows("tasks").is_empty());
    }

    #[tokio::test]
    async fn query_applies_status_filter() {
        let client = tasks_client();
        client.insert_row("tasks", props("Open", "Not Started")).unwrap();
        client.insert_row("tasks", props("Closed", "Completed")).unwrap();

        let rows = client
            .query("tasks", &RowQuery::default().status_not("Status", "Completed"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].display_title(), "Open");
        assert_eq!(client.calls_of(Operation::Query).len(), 1);
    }

    #[tokio::test]
    async fn sort_keeps_ties_in_order_and_empty_values_last() {
        let client = MemoryTableClient::new().with_table(
            "tasks",
            vec![
                ColumnDefinition::title("Name"),
                ColumnDefinition::new("Due Date", "date"),
            ],
        );
        for (name, due) in [
            ("A", Some("2024-01-01")),
            ("B", None),
            ("C", Some("2024-03-01")),
            ("D", Some("2024-03-01")),
            ("E", Some("2024-02-01")),
        ] {
            let mut row = PropertyMap::new();
            row.insert("Name".into(), title_value(name));
            if let Some(due) = due {
                row.insert("Due Date".into(), date_value(Some(due)));
            }
            client.insert_row("tasks", row).unwrap();
        }

        let titles = |rows: Vec<RemoteRow>| -> Vec<String> {
            rows.iter().map(|row| row.display_title().to_string()).collect()
        };
        let descending = client
            .query("tasks", &RowQuery::default().sorted_by("Due Date", SortDirection::Descending))
            .await
            .unwrap();
        assert_eq!(titles(descending), ["C", "D", "E", "A", "B"]);

        let ascending = client
            .query("tasks", &RowQuery::default().sorted_by("Due Date", SortDirection::Ascending))
            .await
            .unwrap();
        assert_eq!(titles(ascending), ["A", "E", "C", "D", "B"]);
    }

    #[tokio::test]
    async fn injected_failures_are_recorded_and_returned() {
        let client = tasks_client();
        client.fail_operation(Operation::RetrieveSchema);
        let err = client.retrieve_schema("tasks").await.expect_err("injected");
        assert!(matches!(err, RemoteError::Api { status: 503, .. }));
        assert_eq!(client.calls().len(), 1);

        client.restore_operation(Operation::RetrieveSchema);
        assert_eq!(client.retrieve_schema("tasks").await.unwrap().len(), 2);
    }
}
