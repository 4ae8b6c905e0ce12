use chrono::{DateTime, Utc};
use rmcp::{
    ServerHandler, ServiceExt,
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::SqlViewError;
use crate::session::{QueryOutput, Session, TableInfo, TableSnapshot};
use crate::stats::{TableStats, Transaction};
use crate::view::{RowView, SortDirection, ViewQuery, build_view};

/// MCP handler owning at most one viewer session. Tool calls serialize on
/// the session lock, so a table selection in flight completes before the
/// next one starts.
#[derive(Debug, Clone)]
pub struct ViewerHandler {
    session: Arc<Mutex<Option<Session>>>,
}

// Request Types
#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenRequest {
    #[schemars(description = "Path to the SQLite database file (.db, .sqlite, .sqlite3)")]
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TableRequest {
    #[schemars(description = "Name of the table")]
    pub table_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RowsRequest {
    #[schemars(description = "Name of the table")]
    pub table_name: String,

    #[schemars(description = "Maximum number of rows to return")]
    #[serde(default = "default_rows_limit")]
    pub limit: usize,

    #[schemars(description = "Number of rows to skip")]
    #[serde(default)]
    pub offset: usize,
}

fn default_rows_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OverviewRequest {
    #[schemars(description = "Name of the table")]
    pub table_name: String,

    #[schemars(description = "Rows to fetch for the record list and snapshot")]
    #[serde(default = "default_overview_limit")]
    pub limit: usize,
}

fn default_overview_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BrowseRequest {
    #[schemars(description = "Name of the table")]
    pub table_name: String,

    #[schemars(description = "Case-insensitive substring to filter rows by")]
    #[serde(default)]
    pub search: String,

    #[schemars(description = "Column to sort by")]
    #[serde(default)]
    pub sort_column: Option<String>,

    #[schemars(description = "Sort direction: asc or desc")]
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,

    #[schemars(description = "1-based page number")]
    #[serde(default = "default_page")]
    pub page: usize,

    #[schemars(description = "Rows per page")]
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[schemars(description = "Maximum rows fetched into the snapshot before filtering")]
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

fn default_fetch_limit() -> usize {
    1000
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryRequest {
    #[schemars(description = "Read-only SQL statement (SELECT, PRAGMA, EXPLAIN)")]
    pub sql: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportCsvRequest {
    #[schemars(description = "Read-only SQL query to export")]
    pub query: String,

    #[schemars(description = "Output file path")]
    pub output_path: String,

    #[schemars(description = "Include column headers")]
    #[serde(default = "default_true")]
    pub include_headers: bool,
}

fn default_true() -> bool {
    true
}

// Result Types
#[derive(Debug, Serialize)]
pub struct OpenResult {
    pub success: bool,
    pub path: String,
    pub database_size: Option<u64>,
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub connected: bool,
    pub database_path: Option<String>,
    pub database_size: Option<u64>,
    pub table_count: Option<usize>,
    pub last_modified: Option<DateTime<Utc>>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub sqlite_version: String,
}

#[derive(Debug, Serialize)]
pub struct ListTablesResult {
    pub tables: Vec<String>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResult {
    pub table_name: String,
    pub transactions: Vec<Transaction>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct OverviewResult {
    pub table_name: String,
    pub stats: TableStats,
    pub transactions: Vec<Transaction>,
    pub snapshot: TableSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ExportCsvResult {
    pub success: bool,
    pub message: String,
    pub output_path: String,
    pub rows_exported: usize,
}

#[derive(Debug, Serialize)]
pub struct CloseResult {
    pub success: bool,
    pub message: String,
}

impl ViewerHandler {
    pub fn new() -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn open_tool(&self, req: OpenRequest) -> Result<OpenResult, SqlViewError> {
        let session = Session::open(&req.path)?;
        let tables = session.list_tables()?;
        let summary = session.summary();

        // Replaces any previously loaded database.
        *self.session.lock().await = Some(session);

        Ok(OpenResult {
            success: true,
            path: summary.path,
            database_size: summary.database_size,
            tables,
        })
    }

    pub async fn status_tool(&self) -> Result<StatusResult, SqlViewError> {
        let guard = self.session.lock().await;

        Ok(match guard.as_ref() {
            Some(session) => {
                let summary = session.summary();
                StatusResult {
                    connected: true,
                    database_path: Some(summary.path),
                    database_size: summary.database_size,
                    table_count: summary.table_count,
                    last_modified: summary.last_modified,
                    loaded_at: Some(summary.loaded_at),
                    sqlite_version: summary.sqlite_version,
                }
            }
            None => StatusResult {
                connected: false,
                database_path: None,
                database_size: None,
                table_count: None,
                last_modified: None,
                loaded_at: None,
                sqlite_version: "Not connected".to_string(),
            },
        })
    }

    pub async fn list_tables_tool(&self) -> Result<ListTablesResult, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        let tables = session.list_tables()?;
        let total_count = tables.len();

        Ok(ListTablesResult {
            tables,
            total_count,
        })
    }

    pub async fn table_info_tool(&self, req: TableRequest) -> Result<TableInfo, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        session.table_info(&req.table_name)
    }

    pub async fn table_stats_tool(&self, req: TableRequest) -> Result<TableStats, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        session.table_stats(&req.table_name)
    }

    pub async fn transactions_tool(
        &self,
        req: RowsRequest,
    ) -> Result<TransactionsResult, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        let transactions = session.transactions(&req.table_name, req.limit, req.offset)?;
        let count = transactions.len();

        Ok(TransactionsResult {
            table_name: req.table_name,
            transactions,
            count,
        })
    }

    pub async fn table_rows_tool(&self, req: RowsRequest) -> Result<TableSnapshot, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        session.raw_rows(&req.table_name, req.limit, req.offset)
    }

    /// Everything the viewer needs when a table is selected, fetched under
    /// one lock hold so the result replaces the previous table atomically.
    pub async fn table_overview_tool(
        &self,
        req: OverviewRequest,
    ) -> Result<OverviewResult, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        let stats = session.table_stats(&req.table_name)?;
        let transactions = session.transactions(&req.table_name, req.limit, 0)?;
        let snapshot = session.raw_rows(&req.table_name, req.limit, 0)?;

        Ok(OverviewResult {
            table_name: req.table_name,
            stats,
            transactions,
            snapshot,
        })
    }

    pub async fn browse_tool(&self, req: BrowseRequest) -> Result<RowView, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        let snapshot = session.raw_rows(&req.table_name, req.fetch_limit, 0)?;

        Ok(build_view(
            &snapshot,
            &ViewQuery {
                search: &req.search,
                sort_column: req.sort_column.as_deref(),
                sort_direction: req.sort_direction,
                page: req.page,
                page_size: req.page_size,
            },
        ))
    }

    pub async fn query_tool(&self, req: QueryRequest) -> Result<QueryOutput, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        session.query(&req.sql)
    }

    pub async fn export_csv_tool(
        &self,
        req: ExportCsvRequest,
    ) -> Result<ExportCsvResult, SqlViewError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(SqlViewError::NoConnection)?;

        let rows_exported =
            session.export_csv(&req.query, &req.output_path, req.include_headers)?;

        Ok(ExportCsvResult {
            success: true,
            message: format!("Successfully exported {rows_exported} rows to CSV"),
            output_path: req.output_path,
            rows_exported,
        })
    }

    pub async fn close_tool(&self) -> Result<CloseResult, SqlViewError> {
        let mut guard = self.session.lock().await;

        Ok(match guard.take() {
            Some(session) => {
                let path = session.path().display().to_string();
                tracing::info!(path = %path, "closed database");
                CloseResult {
                    success: true,
                    message: format!("Disconnected from {path}"),
                }
            }
            None => CloseResult {
                success: true,
                message: "No database loaded".to_string(),
            },
        })
    }

    fn get_tools() -> Vec<Tool> {
        vec![
            Tool {
                name: Cow::Borrowed("open"),
                description: Some(Cow::Borrowed(
                    "Load a SQLite database file read-only and list its tables",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(OpenRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("status"),
                description: Some(Cow::Borrowed(
                    "Get status information about the currently loaded database",
                )),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                })
                .as_object()
                .unwrap()
                .clone()
                .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("list_tables"),
                description: Some(Cow::Borrowed("List all tables in the database")),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                })
                .as_object()
                .unwrap()
                .clone()
                .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("table_info"),
                description: Some(Cow::Borrowed(
                    "Get a table's columns, types, and exact row count",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(TableRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("table_stats"),
                description: Some(Cow::Borrowed(
                    "Get best-effort aggregate statistics (row count, amount sum, date range, categories) for a table",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(TableRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("transactions"),
                description: Some(Cow::Borrowed(
                    "Get paginated rows mapped to normalized transaction records",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(RowsRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("table_rows"),
                description: Some(Cow::Borrowed(
                    "Get a raw column/row snapshot of a table with limit and offset",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(RowsRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("table_overview"),
                description: Some(Cow::Borrowed(
                    "Get stats, transaction records, and a raw snapshot for a table in one call",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(OverviewRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("browse"),
                description: Some(Cow::Borrowed(
                    "Browse a table: search, sort, and paginate its rows",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(BrowseRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("query"),
                description: Some(Cow::Borrowed(
                    "Execute an arbitrary read-only SQL query (SELECT, PRAGMA, EXPLAIN)",
                )),
                input_schema: serde_json::to_value(schemars::schema_for!(QueryRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("export_csv"),
                description: Some(Cow::Borrowed("Export query results to a CSV file")),
                input_schema: serde_json::to_value(schemars::schema_for!(ExportCsvRequest).schema)
                    .unwrap()
                    .as_object()
                    .unwrap()
                    .clone()
                    .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("close"),
                description: Some(Cow::Borrowed("Close the current database")),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                })
                .as_object()
                .unwrap()
                .clone()
                .into(),
                annotations: None,
                output_schema: None,
                title: None,
                icons: None,
            },
        ]
    }

    async fn list_tools_handler(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<rmcp::service::RoleServer>,
    ) -> Result<ListToolsResult, rmcp::ErrorData> {
        Ok(ListToolsResult {
            tools: Self::get_tools(),
            next_cursor: None,
        })
    }

    async fn call_tool_handler(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<rmcp::service::RoleServer>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        match request.name.as_ref() {
            "open" => {
                let params: OpenRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self.open_tool(params).await.map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "status" => {
                let result = self.status_tool().await.map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "list_tables" => {
                let result = self
                    .list_tables_tool()
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "table_info" => {
                let params: TableRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .table_info_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "table_stats" => {
                let params: TableRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .table_stats_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "transactions" => {
                let params: RowsRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .transactions_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "table_rows" => {
                let params: RowsRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .table_rows_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "table_overview" => {
                let params: OverviewRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .table_overview_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "browse" => {
                let params: BrowseRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .browse_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "query" => {
                let params: QueryRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .query_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "export_csv" => {
                let params: ExportCsvRequest =
                    serde_json::from_value(request.arguments.unwrap_or_default().into())
                        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))?;

                let result = self
                    .export_csv_tool(params)
                    .await
                    .map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            "close" => {
                let result = self.close_tool().await.map_err(rmcp::ErrorData::from)?;

                Ok(CallToolResult {
                    content: vec![],
                    structured_content: Some(serde_json::to_value(result).unwrap()),
                    is_error: Some(false),
                    meta: None,
                })
            }
            _ => Err(rmcp::ErrorData::invalid_params("Tool not found", None)),
        }
    }
}

impl Default for ViewerHandler {
    fn default() -> Self {
        Self::new()
    }
}

// Implement ServerHandler trait
impl ServerHandler for ViewerHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            server_info: Implementation {
                name: "sqlview".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities {
                tools: Some(Default::default()),
                ..Default::default()
            },
            instructions: Some(
                "A read-only SQLite viewer. Load a database file, list its tables, inspect \
                schema and heuristic statistics, and browse, search, sort, and paginate table \
                rows. All access is read-only; the loaded file is never modified."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
        context: RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_
    {
        self.list_tools_handler(request, context)
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_
    {
        self.call_tool_handler(request, context)
    }
}

pub async fn run() -> anyhow::Result<()> {
    let handler = ViewerHandler::new();

    // Serve the handler with stdio transport
    let server = handler.serve(stdio()).await?;

    // Wait for service to complete
    server.waiting().await?;

    Ok(())
}
