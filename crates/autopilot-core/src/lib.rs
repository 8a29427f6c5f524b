//! Core domain model for Notion AutoPilot: remote rows, discovered schemas,
//! application records and cycle outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

pub mod mapper;

pub const CRATE_NAME: &str = "autopilot-core";

/// Column name to write-shaped JSON value, as sent in create/update calls.
pub type PropertyMap = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub content: String,
}

/// One run of rich text. Reads carry `plain_text`; write-shaped runs only carry `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextRun {
    #[serde(default)]
    pub plain_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
}

impl RichTextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            plain_text: text.clone(),
            text: Some(TextContent { content: text }),
        }
    }

    pub fn content(&self) -> &str {
        if !self.plain_text.is_empty() {
            return &self.plain_text;
        }
        self.text.as_ref().map(|t| t.content.as_str()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateValue {
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRef {
    pub id: String,
}

/// Typed value of one column on one row, in the remote store's read shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title {
        #[serde(default)]
        title: Vec<RichTextRun>,
    },
    RichText {
        #[serde(default)]
        rich_text: Vec<RichTextRun>,
    },
    Status {
        #[serde(default)]
        status: Option<SelectOption>,
    },
    Select {
        #[serde(default)]
        select: Option<SelectOption>,
    },
    MultiSelect {
        #[serde(default)]
        multi_select: Vec<SelectOption>,
    },
    Date {
        #[serde(default)]
        date: Option<DateValue>,
    },
    Relation {
        #[serde(default)]
        relation: Vec<RelationRef>,
    },
    #[serde(other)]
    Unsupported,
}

impl PropertyValue {
    pub fn is_title(&self) -> bool {
        matches!(self, PropertyValue::Title { .. })
    }

    pub fn is_status(&self) -> bool {
        matches!(self, PropertyValue::Status { .. })
    }

    /// Selected option name for status and select values.
    pub fn option_name(&self) -> Option<&str> {
        match self {
            PropertyValue::Status { status: Some(option) }
            | PropertyValue::Select { select: Some(option) } => Some(option.name.as_str()),
            _ => None,
        }
    }

    pub fn runs(&self) -> &[RichTextRun] {
        match self {
            PropertyValue::Title { title } => title,
            PropertyValue::RichText { rich_text } => rich_text,
            _ => &[],
        }
    }

    /// Text used when ordering rows by this column.
    pub fn sort_text(&self) -> Option<String> {
        match self {
            PropertyValue::Title { title } => title.first().map(|r| r.content().to_string()),
            PropertyValue::RichText { rich_text } => {
                Some(rich_text.iter().map(RichTextRun::content).collect())
            }
            PropertyValue::Date { date } => date.as_ref().map(|d| d.start.clone()),
            PropertyValue::Status { .. } | PropertyValue::Select { .. } => {
                self.option_name().map(str::to_string)
            }
            _ => None,
        }
    }
}

/// A row as returned by the remote store. Only ever held for the duration of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
}

impl RemoteRow {
    /// First column (in name order) whose value is a status.
    pub fn status_property(&self) -> Option<(&str, &PropertyValue)> {
        self.properties
            .iter()
            .find(|(_, value)| value.is_status())
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn title_property(&self) -> Option<(&str, &PropertyValue)> {
        self.properties
            .iter()
            .find(|(_, value)| value.is_title())
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Title for listings: first title run, or `Untitled`.
    pub fn display_title(&self) -> &str {
        self.title_property()
            .and_then(|(_, value)| value.runs().first())
            .map(RichTextRun::content)
            .filter(|text| !text.is_empty())
            .unwrap_or("Untitled")
    }

    /// Every run of the title column joined, or `None` without a title column.
    pub fn title_text(&self) -> Option<String> {
        self.title_property()
            .map(|(_, value)| value.runs().iter().map(RichTextRun::content).collect())
    }
}

/// Option list attached to status/select column definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionList {
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

/// Column definition in the remote store's schema wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OptionList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<OptionList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_select: Option<OptionList>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            status: None,
            select: None,
            multi_select: None,
        }
    }

    pub fn title(name: impl Into<String>) -> Self {
        Self::new(name, "title")
    }

    pub fn status(name: impl Into<String>, options: &[&str]) -> Self {
        let mut def = Self::new(name, "status");
        def.status = Some(option_list(options));
        def
    }

    pub fn select(name: impl Into<String>, options: &[&str]) -> Self {
        let mut def = Self::new(name, "select");
        def.select = Some(option_list(options));
        def
    }

    pub fn multi_select(name: impl Into<String>, options: &[&str]) -> Self {
        let mut def = Self::new(name, "multi_select");
        def.multi_select = Some(option_list(options));
        def
    }
}

fn option_list(options: &[&str]) -> OptionList {
    OptionList {
        options: options
            .iter()
            .map(|name| SelectOption {
                name: (*name).to_string(),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Title,
    Status { options: Vec<String> },
    Select { options: Vec<String> },
    MultiSelect { options: Vec<String> },
    Date,
    Relation,
    RichText,
    Other { wire_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSchema {
    pub fn classify(def: ColumnDefinition) -> Self {
        let names = |list: Option<OptionList>| -> Vec<String> {
            list.unwrap_or_default()
                .options
                .into_iter()
                .map(|o| o.name)
                .collect()
        };
        let kind = match def.kind.as_str() {
            "title" => ColumnKind::Title,
            "status" => ColumnKind::Status {
                options: names(def.status),
            },
            "select" => ColumnKind::Select {
                options: names(def.select),
            },
            "multi_select" => ColumnKind::MultiSelect {
                options: names(def.multi_select),
            },
            "date" => ColumnKind::Date,
            "relation" => ColumnKind::Relation,
            "rich_text" => ColumnKind::RichText,
            other => ColumnKind::Other {
                wire_type: other.to_string(),
            },
        };
        Self {
            name: def.name,
            kind,
        }
    }
}

/// Status column located by schema discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusColumn<'a> {
    pub name: &'a str,
    pub options: &'a [String],
}

impl StatusColumn<'_> {
    pub fn accepts(&self, value: &str) -> bool {
        self.options.iter().any(|o| o == value)
    }

    pub fn first_option(&self) -> Option<&str> {
        self.options.first().map(String::as_str)
    }
}

/// Columns of one table, discovered fresh for every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn from_definitions(defs: impl IntoIterator<Item = ColumnDefinition>) -> Self {
        Self {
            columns: defs.into_iter().map(ColumnSchema::classify).collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// First title column. The remote store guarantees at most one.
    pub fn title_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.kind == ColumnKind::Title)
            .map(|c| c.name.as_str())
    }

    pub fn status_column(&self) -> Option<StatusColumn<'_>> {
        self.columns.iter().find_map(|c| match &c.kind {
            ColumnKind::Status { options } => Some(StatusColumn {
                name: c.name.as_str(),
                options: options.as_slice(),
            }),
            _ => None,
        })
    }

    pub fn has_select(&self, name: &str) -> bool {
        matches!(self.column(name).map(|c| &c.kind), Some(ColumnKind::Select { .. }))
    }

    pub fn has_multi_select(&self, name: &str) -> bool {
        matches!(
            self.column(name).map(|c| &c.kind),
            Some(ColumnKind::MultiSelect { .. })
        )
    }

    pub fn has_kind(&self, name: &str, kind: &ColumnKind) -> bool {
        self.column(name).is_some_and(|c| &c.kind == kind)
    }

    /// Date column named `preferred` if present, else the first date column.
    pub fn date_column(&self, preferred: &str) -> Option<&str> {
        if let Some(column) = self.column(preferred).filter(|c| c.kind == ColumnKind::Date) {
            return Some(column.name.as_str());
        }
        self.columns
            .iter()
            .find(|c| c.kind == ColumnKind::Date)
            .map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table {table_id} has no title column")]
    NoTitleColumn { table_id: String },
    #[error("row {row_id} has no status column")]
    NoStatusColumn { row_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Project,
    Task,
    Prompt,
}

impl RecordKind {
    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Project => "Project",
            RecordKind::Task => "Task",
            RecordKind::Prompt => "Prompt",
        }
    }

    pub fn untitled(self) -> String {
        format!("Untitled {}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordDetail {
    Project {
        priority: String,
    },
    Task {
        due_date: Option<String>,
        project_id: Option<String>,
    },
    Prompt {
        category: String,
        tags: Vec<String>,
        prompt_text: String,
    },
}

/// Normalized projection of a [`RemoteRow`], rebuilt on every fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: String,
    pub kind: RecordKind,
    pub title: String,
    pub status: String,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    pub url: String,
    pub detail: RecordDetail,
}

/// Content block appended to a page body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Heading2(String),
    Heading3(String),
    Paragraph { text: String, bold: bool },
    Divider,
}

impl Block {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Block::Paragraph {
            text: text.into(),
            bold: false,
        }
    }

    pub fn bold_paragraph(text: impl Into<String>) -> Self {
        Block::Paragraph {
            text: text.into(),
            bold: true,
        }
    }

    pub fn to_write_value(&self) -> JsonValue {
        fn text_run(content: &str, bold: bool) -> JsonValue {
            let mut run = json!({ "type": "text", "text": { "content": content } });
            if bold {
                run["annotations"] = json!({ "bold": true });
            }
            run
        }
        match self {
            Block::Heading2(text) => json!({
                "object": "block",
                "type": "heading_2",
                "heading_2": { "rich_text": [text_run(text, false)] }
            }),
            Block::Heading3(text) => json!({
                "object": "block",
                "type": "heading_3",
                "heading_3": { "rich_text": [text_run(text, false)] }
            }),
            Block::Paragraph { text, bold } => json!({
                "object": "block",
                "type": "paragraph",
                "paragraph": { "rich_text": [text_run(text, *bold)] }
            }),
            Block::Divider => json!({
                "object": "block",
                "type": "divider",
                "divider": {}
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounts {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
}

/// Outcome of one refresh cycle, appended to the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub counts: CycleCounts,
    pub error: Option<String>,
}

impl CycleResult {
    pub fn succeeded(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        counts: CycleCounts,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at,
            success: true,
            counts,
            error: None,
        }
    }

    pub fn failed(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        counts: CycleCounts,
        error: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at,
            success: false,
            counts,
            error: Some(error.into()),
        }
    }

    pub fn audit_status(&self) -> &'static str {
        if self.success {
            "INFO"
        } else {
            "ERROR"
        }
    }

    pub fn audit_message(&self) -> String {
        match &self.error {
            Some(err) if !self.success => format!("Error: {err}"),
            _ => format!(
                "Successful Notion update (fetched={} created={} updated={})",
                self.counts.fetched, self.counts.created, self.counts.updated
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_schema_json() -> JsonValue {
        json!({
            "Name": { "id": "title", "name": "Name", "type": "title", "title": {} },
            "Status": {
                "id": "s%3A1",
                "name": "Status",
                "type": "status",
                "status": {
                    "options": [
                        { "id": "1", "name": "Not Started", "color": "default" },
                        { "id": "2", "name": "In Progress", "color": "blue" },
                        { "id": "3", "name": "Done", "color": "green" }
                    ],
                    "groups": []
                }
            },
            "Priority": {
                "id": "p",
                "name": "Priority",
                "type": "select",
                "select": { "options": [{ "name": "High" }, { "name": "Medium" }] }
            },
            "Owner": { "id": "o", "name": "Owner", "type": "people", "people": {} }
        })
    }

    fn schema_from_json(value: JsonValue) -> TableSchema {
        let map: BTreeMap<String, ColumnDefinition> =
            serde_json::from_value(value).expect("schema json");
        TableSchema::from_definitions(map.into_values())
    }

    #[test]
    fn classifies_columns_and_collects_status_options_in_order() {
        let schema = schema_from_json(project_schema_json());

        assert_eq!(schema.title_column(), Some("Name"));
        let status = schema.status_column().expect("status column");
        assert_eq!(status.name, "Status");
        assert_eq!(status.options, ["Not Started", "In Progress", "Done"]);
        assert_eq!(status.first_option(), Some("Not Started"));
        assert!(schema.has_select("Priority"));
        assert!(!schema.has_select("Status"));
        assert_eq!(
            schema.column("Owner").map(|c| &c.kind),
            Some(&ColumnKind::Other {
                wire_type: "people".into()
            })
        );
    }

    #[test]
    fn schema_without_title_or_status_reports_none() {
        let schema = TableSchema::from_definitions(vec![ColumnDefinition::new("Notes", "rich_text")]);
        assert_eq!(schema.title_column(), None);
        assert!(schema.status_column().is_none());
    }

    #[test]
    fn date_column_prefers_named_column() {
        let schema = TableSchema::from_definitions(vec![
            ColumnDefinition::title("Name"),
            ColumnDefinition::new("Created", "date"),
            ColumnDefinition::new("Date", "date"),
        ]);
        assert_eq!(schema.date_column("Date"), Some("Date"));
        assert_eq!(schema.date_column("Published"), Some("Created"));

        let mislabeled = TableSchema::from_definitions(vec![
            ColumnDefinition::new("Date", "rich_text"),
            ColumnDefinition::new("Published", "date"),
        ]);
        assert_eq!(mislabeled.date_column("Date"), Some("Published"));
        let undated = TableSchema::from_definitions(vec![ColumnDefinition::title("Name")]);
        assert_eq!(undated.date_column("Date"), None);
    }

    #[test]
    fn title_text_joins_every_run() {
        let long = "x".repeat(2500);
        let row = RemoteRow {
            id: "row-1".into(),
            properties: BTreeMap::from([(
                "Name".to_string(),
                PropertyValue::Title {
                    title: vec![
                        RichTextRun::plain(&long[..2000]),
                        RichTextRun::plain(&long[2000..]),
                    ],
                },
            )]),
            created_time: Utc::now(),
            last_edited_time: Utc::now(),
            url: String::new(),
        };
        assert_eq!(row.title_text().as_deref(), Some(long.as_str()));
        assert_eq!(row.display_title().len(), 2000);

        let untitled = RemoteRow {
            properties: BTreeMap::new(),
            ..row
        };
        assert_eq!(untitled.title_text(), None);
    }

    #[test]
    fn decodes_remote_row_with_unknown_property_types() {
        let row: RemoteRow = serde_json::from_value(json!({
            "object": "page",
            "id": "row-1",
            "created_time": "2024-03-01T10:00:00.000Z",
            "last_edited_time": "2024-03-02T10:00:00.000Z",
            "url": "https://www.notion.so/row1",
            "properties": {
                "Name": { "id": "title", "type": "title", "title": [
                    { "type": "text", "plain_text": "Launch", "text": { "content": "Launch" } }
                ] },
                "Status": { "id": "s", "type": "status", "status": { "name": "In Progress" } },
                "Due Date": { "id": "d", "type": "date", "date": null },
                "Formula": { "id": "f", "type": "formula", "formula": { "number": 4 } }
            }
        }))
        .expect("row json");

        assert_eq!(row.display_title(), "Launch");
        let (name, status) = row.status_property().expect("status");
        assert_eq!(name, "Status");
        assert_eq!(status.option_name(), Some("In Progress"));
        assert_eq!(row.properties["Due Date"], PropertyValue::Date { date: None });
        assert_eq!(row.properties["Formula"], PropertyValue::Unsupported);
    }

    #[test]
    fn failed_cycle_audit_message_carries_error() {
        let now = Utc::now();
        let ok = CycleResult::succeeded(
            Uuid::new_v4(),
            now,
            now,
            CycleCounts {
                fetched: 3,
                created: 1,
                updated: 0,
            },
        );
        assert_eq!(ok.audit_status(), "INFO");
        assert!(ok.audit_message().starts_with("Successful Notion update"));

        let failed = CycleResult::failed(Uuid::new_v4(), now, now, CycleCounts::default(), "boom");
        assert_eq!(failed.audit_status(), "ERROR");
        assert_eq!(failed.audit_message(), "Error: boom");
    }

    #[test]
    fn bold_paragraph_block_sets_annotation() {
        let value = Block::bold_paragraph("Total: 3").to_write_value();
        assert_eq!(value["type"], "paragraph");
        assert_eq!(value["paragraph"]["rich_text"][0]["text"]["content"], "Total: 3");
        assert_eq!(value["paragraph"]["rich_text"][0]["annotations"]["bold"], true);
        assert_eq!(Block::Divider.to_write_value()["divider"], json!({}));
    }
}
