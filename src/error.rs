use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlViewError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No database loaded")]
    NoConnection,

    #[error("Failed to load database: {0}")]
    LoadFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl From<SqlViewError> for rmcp::ErrorData {
    fn from(err: SqlViewError) -> Self {
        rmcp::ErrorData::internal_error(err.to_string(), None)
    }
}
