use autopilot_core::mapper::{date_value, title_value};
use autopilot_core::{Block, PropertyMap, SchemaError};
use autopilot_storage::RemoteTableClient;
use chrono::{DateTime, Local};
use tracing::info;

use crate::upsert::{CreateError, UpsertEngine};

/// Date column preferred when stamping a dashboard row.
pub const DASHBOARD_DATE_COLUMN: &str = "Date";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSection {
    pub heading: String,
    pub lines: Vec<String>,
}

/// Page body of a dashboard row: a heading, a timestamp, bold highlights,
/// then divider-separated sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardUpdate {
    pub heading: String,
    pub highlights: Vec<String>,
    pub sections: Vec<DashboardSection>,
}

impl DashboardUpdate {
    pub fn new(heading: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            ..Self::default()
        }
    }

    pub fn highlight(mut self, line: impl Into<String>) -> Self {
        self.highlights.push(line.into());
        self
    }

    pub fn section(mut self, heading: impl Into<String>, lines: Vec<String>) -> Self {
        self.sections.push(DashboardSection {
            heading: heading.into(),
            lines,
        });
        self
    }

    pub fn to_blocks(&self, updated_at: DateTime<Local>) -> Vec<Block> {
        let mut blocks = vec![
            Block::Heading2(self.heading.clone()),
            Block::paragraph(format!(
                "Last updated: {}",
                updated_at.format("%Y-%m-%d %H:%M")
            )),
        ];
        blocks.extend(self.highlights.iter().map(Block::bold_paragraph));
        for section in &self.sections {
            blocks.push(Block::Divider);
            blocks.push(Block::Heading3(section.heading.clone()));
            blocks.extend(section.lines.iter().map(Block::paragraph));
        }
        blocks
    }
}

impl UpsertEngine {
    /// Create a dashboard row titled `title`, stamp today's date when the
    /// table has a date column, then append the update as page content.
    pub async fn create_dashboard_update(
        &self,
        table_id: &str,
        title: &str,
        update: &DashboardUpdate,
    ) -> Result<String, CreateError> {
        let now = Local::now();
        let schema = self.client().discover(table_id).await?;
        let title_column = schema
            .title_column()
            .ok_or_else(|| SchemaError::NoTitleColumn {
                table_id: table_id.to_string(),
            })?;

        let mut properties = PropertyMap::new();
        properties.insert(title_column.to_string(), title_value(title));
        if let Some(date_column) = schema.date_column(DASHBOARD_DATE_COLUMN) {
            let today = now.format("%Y-%m-%d").to_string();
            properties.insert(date_column.to_string(), date_value(Some(&today)));
        }

        let row = self.client().create_row(table_id, &properties).await?;
        let blocks = update.to_blocks(now);
        if !blocks.is_empty() {
            self.client().append_blocks(&row.id, &blocks).await?;
        }
        info!(table_id, row_id = %row.id, blocks = blocks.len(), "created dashboard update");
        Ok(row.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use autopilot_core::{ColumnDefinition, PropertyValue};
    use autopilot_storage::{MemoryTableClient, Operation, RecordedCall};
    use chrono::TimeZone;

    fn update() -> DashboardUpdate {
        DashboardUpdate::new("Weekly status")
            .highlight("Open tasks: 4")
            .section("Projects", vec!["Alpha".into(), "Beta".into()])
    }

    #[test]
    fn blocks_follow_heading_timestamp_highlights_sections() {
        let at = Local.with_ymd_and_hms(2024, 7, 1, 9, 5, 0).single().unwrap();
        let blocks = update().to_blocks(at);
        assert_eq!(
            blocks,
            vec![
                Block::Heading2("Weekly status".into()),
                Block::paragraph("Last updated: 2024-07-01 09:05"),
                Block::bold_paragraph("Open tasks: 4"),
                Block::Divider,
                Block::Heading3("Projects".into()),
                Block::paragraph("Alpha"),
                Block::paragraph("Beta"),
            ]
        );
    }

    #[tokio::test]
    async fn dashboard_row_prefers_named_date_column() {
        let client = Arc::new(MemoryTableClient::new().with_table(
            "dash",
            vec![
                ColumnDefinition::title("Name"),
                ColumnDefinition::new("Created", "date"),
                ColumnDefinition::new("Date", "date"),
            ],
        ));
        let engine = UpsertEngine::new(client.clone());

        let row_id = engine
            .create_dashboard_update("dash", "Status 2024-07-01", &update())
            .await
            .unwrap();

        let row = client.row(&row_id).unwrap();
        assert_eq!(row.display_title(), "Status 2024-07-01");
        assert!(matches!(row.properties.get("Date"), Some(PropertyValue::Date { date: Some(_) })));
        assert!(!row.properties.contains_key("Created"));
        assert_eq!(client.blocks(&row_id).len(), 7);

        let ops: Vec<_> = client.calls().iter().map(RecordedCall::operation).collect();
        assert_eq!(
            ops,
            vec![
                Operation::RetrieveSchema,
                Operation::CreateRow,
                Operation::AppendBlocks
            ]
        );
    }

    #[tokio::test]
    async fn dashboard_without_date_column_sets_title_only() {
        let client = Arc::new(
            MemoryTableClient::new().with_table("dash", vec![ColumnDefinition::title("Title")]),
        );
        let engine = UpsertEngine::new(client.clone());
        let row_id = engine
            .create_dashboard_update("dash", "Status", &DashboardUpdate::new("Status"))
            .await
            .unwrap();
        assert_eq!(client.row(&row_id).unwrap().properties.len(), 1);
        assert_eq!(client.blocks(&row_id).len(), 2);
    }
}
