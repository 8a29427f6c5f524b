//! Schema-checked writes: row creation, status changes and record updates.

use std::sync::Arc;

use autopilot_core::mapper::{self, status_value, title_value};
use autopilot_core::{
    ApplicationRecord, Block, PropertyMap, RemoteRow, SchemaError, StatusColumn,
};
use autopilot_storage::{RemoteError, RemoteTableClient, RowQuery};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error(transparent)]
    Create(#[from] CreateError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Non-fatal findings from status validation. The write still happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("status {requested:?} is not an option of {column}; using {substituted:?}")]
    StatusSubstituted {
        column: String,
        requested: String,
        substituted: String,
    },
    #[error("status {requested:?} dropped: {column} has no options")]
    StatusDropped { column: String, requested: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRow {
    pub row_id: String,
    pub status: Option<String>,
    pub warnings: Vec<ValidationError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(CreatedRow),
    Updated { row_id: String },
}

/// Status to write for a new or updated row.
///
/// A desired status that the column offers is kept. Anything else falls
/// back to the first option with a warning; with no options nothing is
/// written. No desired status means the first option, silently.
pub fn resolve_status(
    column: StatusColumn<'_>,
    desired: Option<&str>,
) -> (Option<String>, Option<ValidationError>) {
    match desired {
        Some(requested) if column.accepts(requested) => (Some(requested.to_string()), None),
        Some(requested) => match column.first_option() {
            Some(first) => (
                Some(first.to_string()),
                Some(ValidationError::StatusSubstituted {
                    column: column.name.to_string(),
                    requested: requested.to_string(),
                    substituted: first.to_string(),
                }),
            ),
            None => (
                None,
                Some(ValidationError::StatusDropped {
                    column: column.name.to_string(),
                    requested: requested.to_string(),
                }),
            ),
        },
        None => (column.first_option().map(str::to_string), None),
    }
}

#[derive(Clone)]
pub struct UpsertEngine {
    client: Arc<dyn RemoteTableClient>,
}

impl UpsertEngine {
    pub fn new(client: Arc<dyn RemoteTableClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &dyn RemoteTableClient {
        self.client.as_ref()
    }

    pub async fn list_rows(
        &self,
        table_id: &str,
        query: &RowQuery,
    ) -> Result<Vec<RemoteRow>, RemoteError> {
        self.client.query(table_id, query).await
    }

    /// Create a row titled `title`. The schema is discovered first and the
    /// status resolved against the discovered options.
    pub async fn create_row(
        &self,
        table_id: &str,
        title: &str,
        desired_status: Option<&str>,
    ) -> Result<CreatedRow, CreateError> {
        let schema = self.client.discover(table_id).await?;
        let title_column = schema
            .title_column()
            .ok_or_else(|| SchemaError::NoTitleColumn {
                table_id: table_id.to_string(),
            })?;

        let mut properties = PropertyMap::new();
        properties.insert(title_column.to_string(), title_value(title));

        let mut status = None;
        let mut warnings = Vec::new();
        if let Some(column) = schema.status_column() {
            let (resolved, warning) = resolve_status(column, desired_status);
            if let Some(value) = &resolved {
                properties.insert(column.name.to_string(), status_value(value));
            }
            if let Some(warning) = warning {
                warn!(table_id, %warning, "status adjusted before create");
                warnings.push(warning);
            }
            status = resolved;
        }

        let row = self.client.create_row(table_id, &properties).await?;
        info!(table_id, row_id = %row.id, title, ?status, "created row");
        Ok(CreatedRow {
            row_id: row.id,
            status,
            warnings,
        })
    }

    /// Set the status of an existing row. The value is written as given; the
    /// remote store rejects values its column does not offer.
    pub async fn update_status(&self, row_id: &str, new_status: &str) -> Result<(), UpdateError> {
        let row = self.client.retrieve_row(row_id).await?;
        let (column, _) = row
            .status_property()
            .ok_or_else(|| SchemaError::NoStatusColumn {
                row_id: row_id.to_string(),
            })?;

        let mut properties = PropertyMap::new();
        properties.insert(column.to_string(), status_value(new_status));
        self.client.update_row(row_id, &properties).await?;
        info!(row_id, column, status = new_status, "updated status");
        Ok(())
    }

    /// Write every mapped field of `record` back to its row. Columns missing
    /// from the table are skipped and the status is validated as on create.
    pub async fn update_record(
        &self,
        table_id: &str,
        record: &ApplicationRecord,
    ) -> Result<Vec<ValidationError>, RemoteError> {
        let schema = self.client.discover(table_id).await?;
        let mut properties = mapper::to_remote_properties(record, &schema);

        let mut warnings = Vec::new();
        if let Some(column) = schema.status_column() {
            let (resolved, warning) = resolve_status(column, Some(&record.status));
            match resolved {
                Some(value) => {
                    properties.insert(column.name.to_string(), status_value(&value));
                }
                None => {
                    properties.remove(column.name);
                }
            }
            if let Some(warning) = warning {
                warn!(table_id, row_id = %record.id, %warning, "status adjusted before update");
                warnings.push(warning);
            }
        }

        self.client.update_row(&record.id, &properties).await?;
        info!(table_id, row_id = %record.id, columns = properties.len(), "updated record");
        Ok(warnings)
    }

    /// Append page content below the existing blocks of a row.
    pub async fn append_to_row(&self, row_id: &str, blocks: &[Block]) -> Result<(), RemoteError> {
        if blocks.is_empty() {
            return Ok(());
        }
        self.client.append_blocks(row_id, blocks).await?;
        info!(row_id, blocks = blocks.len(), "appended blocks");
        Ok(())
    }

    /// Update the status of the row titled `title`, creating it if absent.
    /// Titles are compared across every run, so long titles match too.
    pub async fn upsert_by_title(
        &self,
        table_id: &str,
        title: &str,
        status: &str,
    ) -> Result<UpsertOutcome, UpsertError> {
        let rows = self.list_rows(table_id, &RowQuery::default()).await?;
        let existing = rows
            .iter()
            .find(|row| row.title_text().as_deref() == Some(title));

        match existing {
            Some(row) => {
                self.update_status(&row.id, status).await?;
                Ok(UpsertOutcome::Updated {
                    row_id: row.id.clone(),
                })
            }
            None => {
                let created = self.create_row(table_id, title, Some(status)).await?;
                Ok(UpsertOutcome::Created(created))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::mapper::MAX_RUN_CHARS;
    use autopilot_core::{ColumnDefinition, PropertyValue, RecordDetail, RecordKind};
    use autopilot_storage::{MemoryTableClient, Operation, RecordedCall};

    const OPTIONS: [&str; 3] = ["Not Started", "In Progress", "Completed"];

    fn client_with_tasks() -> Arc<MemoryTableClient> {
        Arc::new(MemoryTableClient::new().with_table(
            "tasks",
            vec![
                ColumnDefinition::title("Name"),
                ColumnDefinition::status("Status", &OPTIONS),
                ColumnDefinition::new("Due Date", "date"),
            ],
        ))
    }

    fn status_of(client: &MemoryTableClient, row_id: &str) -> Option<String> {
        client
            .row(row_id)
            .and_then(|row| row.properties.get("Status").cloned())
            .and_then(|value| value.option_name().map(str::to_string))
    }

    #[test]
    fn resolution_keeps_valid_and_substitutes_invalid() {
        let options: Vec<String> = OPTIONS.iter().map(|s| s.to_string()).collect();
        let column = StatusColumn {
            name: "Status",
            options: &options,
        };
        assert_eq!(
            resolve_status(column, Some("In Progress")),
            (Some("In Progress".into()), None)
        );
        assert_eq!(resolve_status(column, None), (Some("Not Started".into()), None));
        let (value, warning) = resolve_status(column, Some("Blocked"));
        assert_eq!(value.as_deref(), Some("Not Started"));
        assert!(matches!(
            warning,
            Some(ValidationError::StatusSubstituted { ref requested, .. }) if requested == "Blocked"
        ));

        let empty = StatusColumn {
            name: "Status",
            options: &[],
        };
        let (value, warning) = resolve_status(empty, Some("Blocked"));
        assert_eq!(value, None);
        assert!(matches!(warning, Some(ValidationError::StatusDropped { .. })));
    }

    #[tokio::test]
    async fn create_defaults_to_first_status_option() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());

        let created = engine.create_row("tasks", "Write docs", None).await.unwrap();
        assert_eq!(created.status.as_deref(), Some("Not Started"));
        assert!(created.warnings.is_empty());
        assert_eq!(status_of(&client, &created.row_id).as_deref(), Some("Not Started"));

        let ops: Vec<_> = client.calls().iter().map(RecordedCall::operation).collect();
        assert_eq!(ops, vec![Operation::RetrieveSchema, Operation::CreateRow]);
    }

    #[tokio::test]
    async fn create_substitutes_unknown_status_with_warning() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());

        let created = engine
            .create_row("tasks", "Ship", Some("Blocked"))
            .await
            .unwrap();
        assert_eq!(created.status.as_deref(), Some("Not Started"));
        assert_eq!(created.warnings.len(), 1);
        assert_eq!(status_of(&client, &created.row_id).as_deref(), Some("Not Started"));
    }

    #[tokio::test]
    async fn create_without_title_column_writes_nothing() {
        let client = Arc::new(MemoryTableClient::new().with_table(
            "untitled",
            vec![ColumnDefinition::status("Status", &OPTIONS)],
        ));
        let engine = UpsertEngine::new(client.clone());

        let err = engine.create_row("untitled", "X", None).await.unwrap_err();
        assert!(matches!(
            err,
            CreateError::Schema(SchemaError::NoTitleColumn { ref table_id }) if table_id == "untitled"
        ));
        assert!(client.calls().iter().all(|call| !call.is_write()));
    }

    #[tokio::test]
    async fn create_without_status_column_sets_title_only() {
        let client = Arc::new(
            MemoryTableClient::new().with_table("notes", vec![ColumnDefinition::title("Name")]),
        );
        let engine = UpsertEngine::new(client.clone());

        let created = engine.create_row("notes", "Idea", Some("Done")).await.unwrap();
        assert_eq!(created.status, None);
        let row = client.row(&created.row_id).unwrap();
        assert_eq!(row.properties.len(), 1);
        assert_eq!(row.display_title(), "Idea");
    }

    #[tokio::test]
    async fn update_status_is_written_verbatim() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());
        let created = engine.create_row("tasks", "Task", None).await.unwrap();
        client.clear_calls();

        engine
            .update_status(&created.row_id, "In Progress")
            .await
            .unwrap();
        assert_eq!(status_of(&client, &created.row_id).as_deref(), Some("In Progress"));

        let writes = client.calls_of(Operation::UpdateRow);
        assert_eq!(writes.len(), 1);
        match &writes[0] {
            RecordedCall::UpdateRow { properties, .. } => {
                assert_eq!(properties.len(), 1);
                assert_eq!(properties["Status"], status_value("In Progress"));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_status_rejected_by_store_surfaces_remote_error() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());
        let created = engine.create_row("tasks", "Task", None).await.unwrap();

        let err = engine
            .update_status(&created.row_id, "Blocked")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Remote(RemoteError::Api { status: 400, .. })
        ));
        assert_eq!(status_of(&client, &created.row_id).as_deref(), Some("Not Started"));
    }

    #[tokio::test]
    async fn update_status_on_row_without_status_column() {
        let client = Arc::new(
            MemoryTableClient::new().with_table("notes", vec![ColumnDefinition::title("Name")]),
        );
        let engine = UpsertEngine::new(client.clone());
        let created = engine.create_row("notes", "Idea", None).await.unwrap();

        let err = engine
            .update_status(&created.row_id, "Done")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Schema(SchemaError::NoStatusColumn { .. })
        ));
        assert!(client.calls_of(Operation::UpdateRow).is_empty());
    }

    #[tokio::test]
    async fn update_record_writes_mapped_fields() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());
        let created = engine.create_row("tasks", "Task", None).await.unwrap();

        let schema = client.discover("tasks").await.unwrap();
        let row = client.row(&created.row_id).unwrap();
        let mut record = mapper::to_record(&row, RecordKind::Task, &schema);
        record.title = "Renamed".into();
        record.status = "Paused".into();
        record.detail = RecordDetail::Task {
            due_date: Some("2024-10-01".into()),
            project_id: Some("proj-9".into()),
        };

        let warnings = engine.update_record("tasks", &record).await.unwrap();
        assert_eq!(warnings.len(), 1);

        let row = client.row(&created.row_id).unwrap();
        assert_eq!(row.display_title(), "Renamed");
        assert!(matches!(
            row.properties.get("Due Date"),
            Some(PropertyValue::Date { date: Some(d) }) if d.start == "2024-10-01"
        ));
        assert!(!row.properties.contains_key("Project"));
    }

    #[tokio::test]
    async fn upsert_by_title_updates_existing_then_creates_missing() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());
        let created = engine.create_row("tasks", "Existing", None).await.unwrap();

        let outcome = engine
            .upsert_by_title("tasks", "Existing", "Completed")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Updated {
                row_id: created.row_id.clone()
            }
        );
        assert_eq!(status_of(&client, &created.row_id).as_deref(), Some("Completed"));

        let outcome = engine
            .upsert_by_title("tasks", "Fresh", "In Progress")
            .await
            .unwrap();
        match outcome {
            UpsertOutcome::Created(row) => {
                assert_eq!(row.status.as_deref(), Some("In Progress"))
            }
            other => panic!("expected create, got {other:?}"),
        }
        assert_eq!(client.rows("tasks").len(), 2);
    }

    #[tokio::test]
    async fn upsert_by_title_matches_titles_longer_than_one_run() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());
        let title = "x".repeat(MAX_RUN_CHARS + 1);

        let first = engine
            .upsert_by_title("tasks", &title, "Not Started")
            .await
            .unwrap();
        let UpsertOutcome::Created(created) = first else {
            panic!("expected create, got {first:?}");
        };
        for status in ["In Progress", "Completed"] {
            let outcome = engine.upsert_by_title("tasks", &title, status).await.unwrap();
            assert_eq!(
                outcome,
                UpsertOutcome::Updated {
                    row_id: created.row_id.clone()
                }
            );
        }

        assert_eq!(client.rows("tasks").len(), 1);
        assert_eq!(client.calls_of(Operation::CreateRow).len(), 1);
        assert_eq!(status_of(&client, &created.row_id).as_deref(), Some("Completed"));
    }

    #[tokio::test]
    async fn append_to_row_adds_blocks_and_skips_empty_batches() {
        let client = client_with_tasks();
        let engine = UpsertEngine::new(client.clone());
        let created = engine.create_row("tasks", "Notes", None).await.unwrap();

        engine.append_to_row(&created.row_id, &[]).await.unwrap();
        assert!(client.calls_of(Operation::AppendBlocks).is_empty());

        let blocks = vec![Block::Heading3("Log".into()), Block::paragraph("done")];
        engine.append_to_row(&created.row_id, &blocks).await.unwrap();
        engine.append_to_row(&created.row_id, &[Block::Divider]).await.unwrap();
        assert_eq!(
            client.blocks(&created.row_id),
            vec![
                Block::Heading3("Log".into()),
                Block::paragraph("done"),
                Block::Divider
            ]
        );

        let err = engine.append_to_row("missing", &blocks).await.unwrap_err();
        assert!(matches!(err, RemoteError::Api { status: 404, .. }));
    }
}
