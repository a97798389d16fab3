//! Core abstractions shared by every backend and file format.
//!
//! - [`value`]: field values and rows
//! - [`props`]: per-connection property registry
//! - [`datastream`]: bounded single-pass row streams
//! - [`identifier`]: table references and identifier quoting
//! - [`catalog`]: backend kinds and their capability table
//! - [`traits`]: the [`Connection`] contract with generic fallbacks

pub mod catalog;
pub mod datastream;
pub mod identifier;
pub mod props;
pub mod traits;
pub mod value;

pub use catalog::{tool_available, Capabilities, DbKind};
pub use datastream::{Datastream, RowSender, StreamStats, DEFAULT_BUFFER_ROWS};
pub use identifier::TableRef;
pub use props::Properties;
pub use traits::Connection;
pub use value::{Row, Value};
