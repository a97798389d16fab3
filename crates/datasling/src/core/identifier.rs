//! Table references and SQL identifier quoting.
//!
//! SQL identifiers cannot be bound as statement parameters, so every table and
//! column name that reaches dynamic SQL goes through [`quote_pg`] after
//! [`validate_identifier`] has rejected empty names, null bytes and oversized
//! names.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SlingError};

/// Maximum identifier length accepted before quoting.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// # Errors
///
/// Returns `SlingError::Config` for empty identifiers, identifiers containing
/// a null byte, or identifiers longer than the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SlingError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SlingError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SlingError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a list of column names and join them with `, `.
pub fn quote_pg_list(names: &[String]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_pg(n))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Quote a string literal for generic statement execution.
///
/// With `escape_backslash` set, backslashes are doubled as well (for servers
/// that treat backslash as an escape inside plain literals).
pub fn quote_literal(value: &str, escape_backslash: bool) -> String {
    let mut escaped = value.replace('\'', "''");
    if escape_backslash {
        escaped = escaped.replace('\\', "\\\\");
    }
    format!("'{}'", escaped)
}

/// A two-part `(schema, table)` reference parsed from `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    /// Create a reference from already-split parts.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        let table = table.into();
        validate_identifier(&schema)?;
        validate_identifier(&table)?;
        Ok(Self { schema, table })
    }

    /// Parse a dotted `schema.table` name.
    ///
    /// The split must yield exactly two non-empty parts.
    pub fn parse(full_name: &str) -> Result<Self> {
        let parts: Vec<&str> = full_name.trim().split('.').collect();
        match parts.as_slice() {
            [schema, table] if !schema.is_empty() && !table.is_empty() => {
                Self::new(*schema, *table)
            }
            _ => Err(SlingError::Config(format!(
                "table name must have the form 'schema.table', got '{}'",
                full_name
            ))),
        }
    }

    /// Quoted `"schema"."table"` for use in SQL.
    pub fn qualified(&self) -> String {
        // Both parts were validated on construction.
        format!(
            "\"{}\".\"{}\"",
            self.schema.replace('"', "\"\""),
            self.table.replace('"', "\"\"")
        )
    }
}

impl FromStr for TableRef {
    type Err = SlingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
