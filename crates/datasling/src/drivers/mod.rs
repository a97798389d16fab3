//! Backend connection implementations.
//!
//! - [`postgres`]: PostgreSQL wire protocol, shared by every kind in the
//!   capability table (the table alone decides the bulk paths)
//! - [`common`]: address parsing and TLS

pub mod common;
pub mod postgres;

pub use common::{Address, SslMode, TlsBuilder};
pub use postgres::PgConnection;

use crate::core::props::Properties;
use crate::core::traits::Connection;
use crate::error::Result;

/// Build an unconnected connection for `url`.
///
/// `overrides` are applied on top of the backend kind's property defaults.
pub fn open_connection(url: &str, overrides: &Properties) -> Result<Box<dyn Connection>> {
    Ok(connection_for(Address::parse(url)?, overrides))
}

/// Build an unconnected connection for an already parsed address.
pub fn connection_for(address: Address, overrides: &Properties) -> Box<dyn Connection> {
    let mut conn = PgConnection::new(address);
    conn.props_mut().extend(overrides);
    Box::new(conn)
}
