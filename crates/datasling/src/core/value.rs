//! Field values carried by a [`Datastream`](super::Datastream).
//!
//! Every interchange path in this crate is textual (CSV, COPY text format, and
//! the simple-query cursor protocol), so a value is either NULL or text. Type
//! coercion happens on the server when the text is loaded.

use std::fmt;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// SQL NULL. Encoded as an unquoted empty CSV field and `\N` in COPY text format.
    Null,

    /// Text representation of a non-NULL value. An empty string is written
    /// to CSV as `""`.
    Text(String),
}

/// One row of a datastream, one value per field.
pub type Row = Vec<Value>;

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text of a non-NULL value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s),
        }
    }

    /// Build a value from a CSV field. Only an unquoted empty field is NULL;
    /// `""` is the empty string.
    #[must_use]
    pub fn from_csv_field(field: &str, quoted: bool) -> Self {
        if field.is_empty() && !quoted {
            Value::Null
        } else {
            Value::Text(field.to_string())
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Option<&str>> for Value {
    fn from(v: Option<&str>) -> Self {
        v.map(Value::from).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Render a row for diagnostics, e.g. `[1, "abc", NULL]`.
pub fn display_row(row: &[Value]) -> String {
    let parts: Vec<String> = row
        .iter()
        .map(|v| match v {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => format!("{:?}", s),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}
