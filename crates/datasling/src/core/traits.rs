//! The connection capability contract.
//!
//! [`Connection`] is implemented once per wire protocol. Mandatory methods
//! cover session lifecycle, small queries and cursor streaming; the bulk
//! methods have default implementations that fall back to the generic paths,
//! so a backend only overrides what it can do faster.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, SlingError};

use super::catalog::DbKind;
use super::datastream::{Datastream, DEFAULT_BUFFER_ROWS};
use super::identifier::{quote_literal, quote_pg, quote_pg_list, TableRef};
use super::props::{Properties, BUFFER_ROWS};
use super::value::{display_row, Row, Value};

/// One logical session to a backend.
///
/// A connection must be connected before use and closed exactly once by its
/// owner. `close` is idempotent and safe after a failed `connect`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Backend kind, used to look up capabilities.
    fn kind(&self) -> DbKind;

    /// Redacted description for logs.
    fn describe(&self) -> String;

    /// Property registry of this connection.
    fn props(&self) -> &Properties;

    /// Mutable property registry of this connection.
    fn props_mut(&mut self) -> &mut Properties;

    /// Open the session.
    async fn connect(&mut self) -> Result<()>;

    /// Release the session.
    async fn close(&mut self) -> Result<()>;

    /// Run a small query and buffer every row as text.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Execute one or more statements without results.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Check whether a table exists.
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// Drop a table. A missing table is not an error.
    async fn drop_table(&self, table: &TableRef) -> Result<()>;

    /// Stream the result of `sql` through a server-side cursor.
    ///
    /// Every backend must support this path.
    async fn stream_rows(&self, sql: &str) -> Result<Datastream>;

    /// Stream the result of `sql` through the fastest available export path.
    async fn bulk_export_stream(&self, sql: &str) -> Result<Datastream> {
        self.stream_rows(sql).await
    }

    /// Load a datastream into `table` through the fastest available import path.
    async fn bulk_import_stream(&self, table: &TableRef, stream: Datastream) -> Result<u64> {
        self.insert_stream(table, stream).await
    }

    /// Capacity for datastreams produced by this connection.
    fn buffer_rows(&self) -> usize {
        self.props().get_usize(BUFFER_ROWS, DEFAULT_BUFFER_ROWS)
    }

    /// Create `table` with one `text` column per field if it is missing.
    async fn create_table(&self, table: &TableRef, fields: &[String]) -> Result<()> {
        let columns = fields
            .iter()
            .map(|f| quote_pg(f).map(|q| format!("{} text", q)))
            .collect::<Result<Vec<_>>>()?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table.qualified(),
            columns.join(", ")
        );
        debug!("{}", ddl);
        self.execute(&ddl).await
    }

    /// Count the rows of `table`.
    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        let rows = self
            .query(&format!("SELECT count(*) FROM {}", table.qualified()))
            .await?;
        rows.first()
            .and_then(|r| r.first())
            .and_then(Value::as_text)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SlingError::Config(format!("no row count returned for {}", table)))
    }

    /// Row-at-a-time `INSERT` of a datastream inside one transaction.
    async fn insert_stream(&self, table: &TableRef, mut stream: Datastream) -> Result<u64> {
        let columns = quote_pg_list(stream.fields())?;
        let escape_backslash = self.kind().capabilities().backslash_literals;
        let prefix = format!("INSERT INTO {} ({}) VALUES ", table.qualified(), columns);

        self.execute("BEGIN").await?;
        let mut count = 0u64;
        while let Some(next) = stream.next_row().await {
            let outcome = match next {
                Ok(row) => {
                    let sql = format!("{}({})", prefix, literal_list(&row, escape_backslash));
                    self.execute(&sql)
                        .await
                        .map_err(|e| (e, Some(display_row(&row))))
                }
                Err(e) => Err((e, None)),
            };
            if let Err((err, row)) = outcome {
                rollback(self, table).await;
                return Err(SlingError::transaction(table.to_string(), count, err, row));
            }
            count += 1;
        }

        if let Err(e) = self.execute("COMMIT").await {
            rollback(self, table).await;
            return Err(SlingError::transaction(table.to_string(), count, e, None));
        }
        Ok(count)
    }
}

/// Render a row as a comma-separated list of SQL literals.
pub fn literal_list(row: &[Value], escape_backslash: bool) -> String {
    row.iter()
        .map(|v| match v {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => quote_literal(s, escape_backslash),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Issue a best-effort `ROLLBACK`.
pub async fn rollback<C: Connection + ?Sized>(conn: &C, table: &TableRef) {
    if let Err(e) = conn.execute("ROLLBACK").await {
        warn!("{}: rollback failed: {}", table, e);
    }
}
