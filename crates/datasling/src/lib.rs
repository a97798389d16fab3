//! # datasling
//!
//! Streaming tabular data transfer between CSV files and SQL databases.
//!
//! This library provides:
//!
//! - **Datastreams**: bounded, single-pass row streams with backpressure
//! - **CSV codec** with transparent gzip/zstd decompression
//! - **Bulk paths**: `COPY FROM STDIN` import and dump-tool export, with
//!   a generic cursor/INSERT fallback behind the same [`Connection`] contract
//! - **Capability table** per backend kind (PostgreSQL, Redshift)
//! - **Staging** of connection-to-connection transfers through local files
//!
//! ## Example
//!
//! ```rust,no_run
//! use datasling::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> datasling::Result<()> {
//!     let config = Config::load("transfer.yaml")?;
//!     let result = Orchestrator::new(config)?.run(None).await?;
//!     println!("Transferred {} rows", result.rows);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod staging;

// Re-exports for convenient access
pub use config::{Config, Endpoint, EndpointConfig, TransferOptions};
pub use crate::core::{Connection, Datastream, DbKind, Properties, Row, TableRef, Value};
pub use drivers::{open_connection, Address};
pub use error::{Result, SlingError};
pub use orchestrator::{Orchestrator, TransferResult};
pub use staging::{StagedObject, StagingArea};
