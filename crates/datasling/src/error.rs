//! Error types for the transfer library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection errors.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for malformed input.
pub const EXIT_PARSE_ERROR: u8 = 3;
/// Exit code for failed (rolled back) loads.
pub const EXIT_TRANSACTION_ERROR: u8 = 4;
/// Exit code for other runtime failures.
pub const EXIT_RUNTIME_ERROR: u8 = 5;
/// Exit code for file I/O errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for cancelled transfers.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum SlingError {
    /// Configuration error (malformed table reference, ambiguous endpoints, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connect/close failure, with the failing stage identified.
    #[error("Connection error during {stage}: {message}")]
    Connection { stage: String, message: String },

    /// Malformed CSV input.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    /// Compression envelope that cannot be decoded.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Bulk fast path unavailable (missing tool, launch failure).
    ///
    /// Recovered locally by falling back to the generic path.
    #[error("Bulk path unavailable: {0}")]
    BulkPath(String),

    /// Dump subprocess exited unsuccessfully.
    #[error("Export command failed: {command}\n  stderr: {stderr}")]
    Export { command: String, stderr: String },

    /// Failure inside a bulk load transaction. The transaction was rolled back.
    #[error("Load into {table} failed after {rows} rows: {message}{}", row_suffix(.row))]
    Transaction {
        table: String,
        rows: u64,
        message: String,
        row: Option<String>,
    },

    /// Database error.
    #[error("Database error: {}", describe_db_error(.0))]
    Database(#[from] tokio_postgres::Error),

    /// IO error (file operations, subprocess pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transfer was cancelled.
    #[error("Transfer cancelled")]
    Cancelled,
}

/// Render a driver error with the server's message, detail and hint.
///
/// The driver's own `Display` prints only "db error" for server errors.
pub fn describe_db_error(err: &tokio_postgres::Error) -> String {
    if let Some(db) = err.as_db_error() {
        let mut out = format!("{} {}: {}", db.severity(), db.code().code(), db.message());
        if let Some(detail) = db.detail() {
            out.push_str(&format!("; detail: {}", detail));
        }
        if let Some(hint) = db.hint() {
            out.push_str(&format!("; hint: {}", hint));
        }
        return out;
    }
    let text = err.to_string();
    match std::error::Error::source(err) {
        Some(cause) if !text.contains(&cause.to_string()) => format!("{}: {}", text, cause),
        _ => text,
    }
}

fn row_suffix(row: &Option<String>) -> String {
    match row {
        Some(r) => format!("\n  row: {}", r),
        None => String::new(),
    }
}

impl SlingError {
    /// Create a Connection error for the given stage.
    pub fn connection(stage: impl Into<String>, message: impl ToString) -> Self {
        SlingError::Connection {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Create a Parse error.
    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        SlingError::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create a Transaction error.
    pub fn transaction(
        table: impl Into<String>,
        rows: u64,
        message: impl ToString,
        row: Option<String>,
    ) -> Self {
        SlingError::Transaction {
            table: table.into(),
            rows,
            message: message.to_string(),
            row,
        }
    }

    /// Whether this error may be recovered by falling back to the generic path.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SlingError::BulkPath(_))
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SlingError::Config(_) | SlingError::Yaml(_) => EXIT_CONFIG_ERROR,
            SlingError::Connection { .. } => EXIT_CONNECTION_ERROR,
            SlingError::Parse { .. } | SlingError::Compression(_) => EXIT_PARSE_ERROR,
            SlingError::Transaction { .. } => EXIT_TRANSACTION_ERROR,
            SlingError::Io(_) => EXIT_IO_ERROR,
            SlingError::Cancelled => EXIT_CANCELLED,
            SlingError::BulkPath(_)
            | SlingError::Export { .. }
            | SlingError::Database(_)
            | SlingError::Json(_) => EXIT_RUNTIME_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, SlingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_error_includes_row() {
        let err = SlingError::transaction("public.t", 42, "bad value", Some("[1, x]".into()));
        let msg = err.to_string();
        assert!(msg.contains("after 42 rows"));
        assert!(msg.contains("row: [1, x]"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SlingError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(SlingError::parse(3, "x").exit_code(), EXIT_PARSE_ERROR);
        assert_eq!(
            SlingError::connection("connect", "refused").exit_code(),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(SlingError::Cancelled.exit_code(), EXIT_CANCELLED);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(SlingError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_only_bulk_path_is_recoverable() {
        assert!(SlingError::BulkPath("psql not found".into()).is_recoverable());
        assert!(!SlingError::parse(1, "x").is_recoverable());
    }

    #[test]
    fn test_format_detailed_starts_with_message() {
        let err = SlingError::Config("missing table".into());
        assert!(err.format_detailed().starts_with("Error: Configuration error: missing table"));
    }
}
