//! Transfer configuration types.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::datastream::DEFAULT_BUFFER_ROWS;
use crate::core::identifier::TableRef;
use crate::core::props::Properties;
use crate::drivers::Address;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where rows come from.
    pub source: EndpointConfig,

    /// Where rows go.
    pub target: EndpointConfig,

    /// Transfer behavior.
    #[serde(default)]
    pub options: TransferOptions,
}

/// One side of a transfer: a file, or a connection plus table.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// File path; `-` for stdin/stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn: Option<String>,

    /// Table as `schema.table`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Connection properties applied on top of the backend defaults.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

impl EndpointConfig {
    /// A file endpoint.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Default::default()
        }
    }

    /// A connection endpoint.
    pub fn table(conn: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            conn: Some(conn.into()),
            table: Some(table.into()),
            ..Default::default()
        }
    }

    /// Property overrides as a registry.
    pub fn props(&self) -> Properties {
        let mut props = Properties::new();
        props.merge(&self.properties);
        props
    }
}

// Custom Debug implementation to redact credentials in the URL.
impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conn = self.conn.as_deref().map(|c| match Address::parse(c) {
            Ok(addr) => addr.redacted(),
            Err(_) => "[REDACTED]".to_string(),
        });
        f.debug_struct("EndpointConfig")
            .field("file", &self.file)
            .field("conn", &conn)
            .field("table", &self.table)
            .field("properties", &self.properties)
            .finish()
    }
}

/// A validated endpoint.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// File path; `-` for stdin/stdout.
    File(PathBuf),
    /// Table reachable through a connection.
    Table {
        address: Address,
        table: TableRef,
        props: Properties,
    },
}

impl Endpoint {
    /// Whether this endpoint is a connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, Endpoint::Table { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::File(p) if p.as_os_str() == "-" => write!(f, "<stdio>"),
            Endpoint::File(p) => write!(f, "{}", p.display()),
            Endpoint::Table { address, table, .. } => write!(f, "{} ({})", table, address.kind()),
        }
    }
}

/// Transfer behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Drop the target table before loading.
    #[serde(default)]
    pub drop_target: bool,

    /// Local directory used to spool connection-to-connection transfers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<PathBuf>,

    /// Rows buffered between source and sink (default: 1000).
    #[serde(default = "default_buffer_rows")]
    pub buffer_rows: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            drop_target: false,
            staging: None,
            buffer_rows: default_buffer_rows(),
        }
    }
}

fn default_buffer_rows() -> usize {
    DEFAULT_BUFFER_ROWS
}
