//! Remote table client contract, the HTTP client for the workspace API, and
//! the append-only changelog sink.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use autopilot_core::{Block, ColumnDefinition, PropertyMap, RemoteRow, TableSchema};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub mod audit;
pub mod memory;

pub use audit::AuditSink;
pub use memory::{MemoryTableClient, Operation, RecordedCall};

pub const CRATE_NAME: &str = "autopilot-storage";

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_API_VERSION: &str = "2022-06-28";

/// Largest page the query endpoint returns.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Largest number of children accepted by one append call.
pub const MAX_APPEND_BLOCKS: usize = 100;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to remote store failed")]
    Request(#[from] reqwest::Error),
    #[error("remote store returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("could not decode {operation} response")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl RemoteError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Api { status: 404, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

/// Keeps rows whose status column is not `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFilter {
    pub column: String,
    pub not_equal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowQuery {
    pub filter: Option<StatusFilter>,
    pub sort: Option<SortKey>,
}

impl RowQuery {
    pub fn status_not(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(StatusFilter {
            column: column.into(),
            not_equal: value.into(),
        });
        self
    }

    pub fn sorted_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(SortKey {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn to_body(&self, page_size: u32, start_cursor: Option<&str>) -> JsonValue {
        let mut body = json!({ "page_size": page_size });
        if let Some(filter) = &self.filter {
            body["filter"] = json!({
                "property": filter.column,
                "status": { "does_not_equal": filter.not_equal }
            });
        }
        if let Some(sort) = &self.sort {
            body["sorts"] = json!([{ "property": sort.column, "direction": sort.direction }]);
        }
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = json!(cursor);
        }
        body
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Client-facing contract of the remote table store.
#[async_trait]
pub trait RemoteTableClient: Send + Sync {
    async fn query(&self, table_id: &str, query: &RowQuery) -> Result<Vec<RemoteRow>, RemoteError>;

    async fn retrieve_schema(&self, table_id: &str) -> Result<Vec<ColumnDefinition>, RemoteError>;

    async fn create_row(
        &self,
        table_id: &str,
        properties: &PropertyMap,
    ) -> Result<RemoteRow, RemoteError>;

    async fn update_row(
        &self,
        row_id: &str,
        properties: &PropertyMap,
    ) -> Result<RemoteRow, RemoteError>;

    async fn retrieve_row(&self, row_id: &str) -> Result<RemoteRow, RemoteError>;

    async fn append_blocks(&self, row_id: &str, blocks: &[Block]) -> Result<(), RemoteError>;

    async fn current_user(&self) -> Result<UserInfo, RemoteError>;

    /// Retrieve and classify the table's columns. Errors propagate unchanged.
    async fn discover(&self, table_id: &str) -> Result<TableSchema, RemoteError> {
        let definitions = self.retrieve_schema(table_id).await?;
        Ok(TableSchema::from_definitions(definitions))
    }
}

#[derive(Debug, Clone)]
pub struct NotionClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub page_size: u32,
}

impl NotionClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: None,
            page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    results: Vec<RemoteRow>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatabaseObject {
    #[serde(default)]
    properties: BTreeMap<String, ColumnDefinition>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP client for the workspace API. Each call is a single attempt.
#[derive(Debug, Clone)]
pub struct NotionClient {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl NotionClient {
    pub fn new(config: NotionClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .context("API key is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            "Notion-Version",
            HeaderValue::from_str(&config.api_version)
                .context("API version is not a valid header value")?,
        );

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<ApiErrorBody>(&body) {
                Ok(err) => (err.code, err.message),
                Err(_) => (
                    String::new(),
                    String::from_utf8_lossy(&body).trim().to_string(),
                ),
            };
            return Err(RemoteError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|source| RemoteError::Decode { operation, source })
    }
}

#[async_trait]
impl RemoteTableClient for NotionClient {
    async fn query(&self, table_id: &str, query: &RowQuery) -> Result<Vec<RemoteRow>, RemoteError> {
        let span = info_span!("remote_query", table_id);
        async {
            let mut rows = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let body = query.to_body(self.page_size, cursor.as_deref());
                let page: QueryPage = self
                    .send(
                        self.request(Method::POST, &format!("databases/{table_id}/query"))
                            .json(&body),
                        "query",
                    )
                    .await?;
                debug!(rows = page.results.len(), has_more = page.has_more, "fetched page");
                rows.extend(page.results);
                match (page.has_more, page.next_cursor) {
                    (true, Some(next)) => cursor = Some(next),
                    _ => break,
                }
            }
            Ok(rows)
        }
        .instrument(span)
        .await
    }

    async fn retrieve_schema(&self, table_id: &str) -> Result<Vec<ColumnDefinition>, RemoteError> {
        let database: DatabaseObject = self
            .send(
                self.request(Method::GET, &format!("databases/{table_id}")),
                "retrieve database",
            )
            .instrument(info_span!("remote_schema", table_id))
            .await?;
        Ok(database
            .properties
            .into_iter()
            .map(|(key, mut def)| {
                if def.name.is_empty() {
                    def.name = key;
                }
                def
            })
            .collect())
    }

    async fn create_row(
        &self,
        table_id: &str,
        properties: &PropertyMap,
    ) -> Result<RemoteRow, RemoteError> {
        let body = json!({
            "parent": { "database_id": table_id },
            "properties": properties,
        });
        self.send(self.request(Method::POST, "pages").json(&body), "create page")
            .instrument(info_span!("remote_create", table_id))
            .await
    }

    async fn update_row(
        &self,
        row_id: &str,
        properties: &PropertyMap,
    ) -> Result<RemoteRow, RemoteError> {
        let body = json!({ "properties": properties });
        self.send(
            self.request(Method::PATCH, &format!("pages/{row_id}")).json(&body),
            "update page",
        )
        .instrument(info_span!("remote_update", row_id))
        .await
    }

    async fn retrieve_row(&self, row_id: &str) -> Result<RemoteRow, RemoteError> {
        self.send(
            self.request(Method::GET, &format!("pages/{row_id}")),
            "retrieve page",
        )
        .instrument(info_span!("remote_retrieve", row_id))
        .await
    }

    async fn append_blocks(&self, row_id: &str, blocks: &[Block]) -> Result<(), RemoteError> {
        for chunk in blocks.chunks(MAX_APPEND_BLOCKS) {
            let children: Vec<JsonValue> = chunk.iter().map(Block::to_write_value).collect();
            let _: IgnoredAny = self
                .send(
                    self.request(Method::PATCH, &format!("blocks/{row_id}/children"))
                        .json(&json!({ "children": children })),
                    "append blocks",
                )
                .instrument(info_span!("remote_append", row_id, blocks = chunk.len()))
                .await?;
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<UserInfo, RemoteError> {
        self.send(self.request(Method::GET, "users/me"), "retrieve user")
            .await
    }
}
