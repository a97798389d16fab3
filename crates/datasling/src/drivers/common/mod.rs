//! Utilities shared by PostgreSQL-protocol backends.
//!
//! - [`address`]: connection URL parsing and redaction
//! - [`tls`]: TLS configuration from the `sslmode` parameter

pub mod address;
pub mod tls;

pub use address::Address;
pub use tls::{SslMode, TlsBuilder};
