//! Per-connection property registry.
//!
//! A lightweight capability-negotiation mechanism: connection implementations
//! consult these flags before attempting a fast path. Each connection owns its
//! own registry; there is no process-wide state.

use std::collections::HashMap;

/// Permit the dump-based bulk export path.
pub const ALLOW_BULK_EXPORT: &str = "allow_bulk_export";

/// Permit the native bulk import path.
pub const ALLOW_BULK_IMPORT: &str = "allow_bulk_import";

/// Rows fetched per cursor page by `stream_rows`.
pub const FETCH_SIZE: &str = "fetch_size";

/// Capacity of datastreams produced by the connection.
pub const BUFFER_ROWS: &str = "buffer_rows";

/// Key/value property store.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value.
    pub fn set_prop(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a property value.
    pub fn get_prop(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Interpret a property as a boolean. Absent or unrecognised values are false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get_prop(key).map(parse_bool).unwrap_or(false)
    }

    /// Interpret a property as an unsigned integer, falling back to `default`.
    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get_prop(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Copy every entry of `other` into this registry.
    pub fn merge(&mut self, other: &HashMap<String, String>) {
        for (k, v) in other {
            self.set_prop(k.clone(), v.clone());
        }
    }

    /// Copy every entry of another registry into this one.
    pub fn extend(&mut self, other: &Properties) {
        self.merge(&other.values);
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "y" | "on"
    )
}
