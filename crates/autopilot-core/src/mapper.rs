//! Row mapper: remote rows to application records (read path) and records
//! to write-shaped property maps (write path).

use serde_json::{json, Value as JsonValue};

use crate::{
    ApplicationRecord, ColumnKind, PropertyMap, PropertyValue, RecordDetail, RecordKind,
    RemoteRow, RichTextRun, TableSchema,
};

pub const UNSET_STATUS: &str = "Not Started";
pub const DEFAULT_PRIORITY: &str = "Medium";
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

pub const PRIORITY_COLUMN: &str = "Priority";
pub const DUE_DATE_COLUMN: &str = "Due Date";
pub const PROJECT_COLUMN: &str = "Project";
pub const TAGS_COLUMN: &str = "Tags";
pub const PROMPT_TEXT_COLUMN: &str = "Prompt Text";
pub const CATEGORY_COLUMN: &str = "Category";

/// Longest text content the remote store accepts in a single rich-text run.
pub const MAX_RUN_CHARS: usize = 2000;

pub fn to_record(row: &RemoteRow, kind: RecordKind, schema: &TableSchema) -> ApplicationRecord {
    let title_prop = schema
        .title_column()
        .and_then(|name| row.properties.get(name))
        .or_else(|| row.title_property().map(|(_, value)| value));
    let title = title_prop
        .and_then(|value| value.runs().first())
        .map(RichTextRun::content)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| kind.untitled());

    let status_prop = schema
        .status_column()
        .and_then(|column| row.properties.get(column.name))
        .or_else(|| row.status_property().map(|(_, value)| value));
    let status = status_prop
        .and_then(PropertyValue::option_name)
        .unwrap_or(UNSET_STATUS)
        .to_string();

    let detail = match kind {
        RecordKind::Project => RecordDetail::Project {
            priority: select_name(row, PRIORITY_COLUMN)
                .unwrap_or(DEFAULT_PRIORITY)
                .to_string(),
        },
        RecordKind::Task => RecordDetail::Task {
            due_date: match row.properties.get(DUE_DATE_COLUMN) {
                Some(PropertyValue::Date { date: Some(date) }) => Some(date.start.clone()),
                _ => None,
            },
            project_id: match row.properties.get(PROJECT_COLUMN) {
                Some(PropertyValue::Relation { relation }) => {
                    relation.first().map(|r| r.id.clone())
                }
                _ => None,
            },
        },
        RecordKind::Prompt => RecordDetail::Prompt {
            category: select_name(row, CATEGORY_COLUMN)
                .unwrap_or(DEFAULT_CATEGORY)
                .to_string(),
            tags: match row.properties.get(TAGS_COLUMN) {
                Some(PropertyValue::MultiSelect { multi_select }) => {
                    multi_select.iter().map(|o| o.name.clone()).collect()
                }
                _ => Vec::new(),
            },
            prompt_text: row
                .properties
                .get(PROMPT_TEXT_COLUMN)
                .map(|value| value.runs().iter().map(RichTextRun::content).collect())
                .unwrap_or_default(),
        },
    };

    ApplicationRecord {
        id: row.id.clone(),
        kind,
        title,
        status,
        created_time: row.created_time,
        last_edited_time: row.last_edited_time,
        url: row.url.clone(),
        detail,
    }
}

fn select_name<'a>(row: &'a RemoteRow, column: &str) -> Option<&'a str> {
    match row.properties.get(column) {
        Some(value @ PropertyValue::Select { .. }) => value.option_name(),
        _ => None,
    }
}

/// Build the create/update property map for `record`. Only columns present in
/// `schema` with a matching kind are written; the status value is written as-is.
pub fn to_remote_properties(record: &ApplicationRecord, schema: &TableSchema) -> PropertyMap {
    let mut props = PropertyMap::new();

    if let Some(title_column) = schema.title_column() {
        props.insert(title_column.to_string(), title_value(&record.title));
    }
    if let Some(status_column) = schema.status_column() {
        props.insert(status_column.name.to_string(), status_value(&record.status));
    }

    match &record.detail {
        RecordDetail::Project { priority } => {
            if schema.has_select(PRIORITY_COLUMN) {
                props.insert(PRIORITY_COLUMN.to_string(), select_value(priority));
            }
        }
        RecordDetail::Task {
            due_date,
            project_id,
        } => {
            if schema.has_kind(DUE_DATE_COLUMN, &ColumnKind::Date) {
                props.insert(
                    DUE_DATE_COLUMN.to_string(),
                    date_value(due_date.as_deref()),
                );
            }
            if schema.has_kind(PROJECT_COLUMN, &ColumnKind::Relation) {
                props.insert(
                    PROJECT_COLUMN.to_string(),
                    relation_value(project_id.as_deref()),
                );
            }
        }
        RecordDetail::Prompt {
            category,
            tags,
            prompt_text,
        } => {
            if schema.has_select(CATEGORY_COLUMN) {
                props.insert(CATEGORY_COLUMN.to_string(), select_value(category));
            }
            if schema.has_multi_select(TAGS_COLUMN) {
                props.insert(TAGS_COLUMN.to_string(), multi_select_value(tags));
            }
            if schema.has_kind(PROMPT_TEXT_COLUMN, &ColumnKind::RichText) {
                props.insert(PROMPT_TEXT_COLUMN.to_string(), rich_text_value(prompt_text));
            }
        }
    }

    props
}

/// Split `content` into write-shaped text runs no longer than [`MAX_RUN_CHARS`].
pub fn text_runs(content: &str) -> Vec<JsonValue> {
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(MAX_RUN_CHARS)
        .map(|chunk| {
            let piece: String = chunk.iter().collect();
            json!({ "text": { "content": piece } })
        })
        .collect()
}

pub fn title_value(title: &str) -> JsonValue {
    json!({ "title": text_runs(title) })
}

pub fn rich_text_value(text: &str) -> JsonValue {
    json!({ "rich_text": text_runs(text) })
}

pub fn status_value(name: &str) -> JsonValue {
    json!({ "status": { "name": name } })
}

pub fn select_value(name: &str) -> JsonValue {
    json!({ "select": { "name": name } })
}

pub fn multi_select_value(names: &[String]) -> JsonValue {
    let options: Vec<JsonValue> = names.iter().map(|n| json!({ "name": n })).collect();
    json!({ "multi_select": options })
}

pub fn date_value(start: Option<&str>) -> JsonValue {
    match start {
        Some(start) => json!({ "date": { "start": start } }),
        None => json!({ "date": null }),
    }
}

pub fn relation_value(id: Option<&str>) -> JsonValue {
    let links: Vec<JsonValue> = id.into_iter().map(|id| json!({ "id": id })).collect();
    json!({ "relation": links })
}

const WRITE_KINDS: [&str; 7] = [
    "title",
    "rich_text",
    "status",
    "select",
    "multi_select",
    "date",
    "relation",
];

/// Interpret a write-shaped value as the value the remote store would read back.
pub fn from_write_value(value: &JsonValue) -> Option<PropertyValue> {
    let object = value.as_object()?;
    let kind = WRITE_KINDS.iter().find(|k| object.contains_key(**k))?;
    let mut tagged = object.clone();
    tagged.insert("type".to_string(), JsonValue::String((*kind).to_string()));
    serde_json::from_value(JsonValue::Object(tagged)).ok()
}
