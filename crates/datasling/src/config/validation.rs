//! Configuration validation.

use super::{Config, Endpoint, EndpointConfig};
use crate::core::datastream::MAX_BUFFER_ROWS;
use crate::core::identifier::TableRef;
use crate::drivers::Address;
use crate::error::{Result, SlingError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    resolve(&config.source, "source")?;
    resolve(&config.target, "target")?;

    if config.options.buffer_rows == 0 {
        return Err(SlingError::Config(
            "options.buffer_rows must be at least 1".into(),
        ));
    }
    if config.options.buffer_rows > MAX_BUFFER_ROWS {
        return Err(SlingError::Config(format!(
            "options.buffer_rows must be at most {}",
            MAX_BUFFER_ROWS
        )));
    }

    Ok(())
}

/// Resolve one side into exactly one endpoint.
pub fn resolve(side: &EndpointConfig, name: &str) -> Result<Endpoint> {
    let has_file = side.file.is_some();
    let has_conn = side.conn.is_some() || side.table.is_some();

    match (has_file, has_conn) {
        (true, true) => Err(SlingError::Config(format!(
            "{}: specify either file or conn+table, not both",
            name
        ))),
        (false, false) => Err(SlingError::Config(format!(
            "{}: one of file or conn+table is required",
            name
        ))),
        (true, false) => {
            let path = side.file.clone().unwrap_or_default();
            if path.as_os_str().is_empty() {
                return Err(SlingError::Config(format!("{}.file is empty", name)));
            }
            Ok(Endpoint::File(path))
        }
        (false, true) => {
            let conn = side
                .conn
                .as_deref()
                .ok_or_else(|| SlingError::Config(format!("{}.conn is required with table", name)))?;
            let table = side
                .table
                .as_deref()
                .ok_or_else(|| SlingError::Config(format!("{}.table is required with conn", name)))?;
            let address = Address::parse(conn)
                .map_err(|e| SlingError::Config(format!("{}.conn: {}", name, strip_prefix(e))))?;
            let table = TableRef::parse(table)
                .map_err(|e| SlingError::Config(format!("{}.table: {}", name, strip_prefix(e))))?;
            Ok(Endpoint::Table {
                address,
                table,
                props: side.props(),
            })
        }
    }
}

fn strip_prefix(err: SlingError) -> String {
    match err {
        SlingError::Config(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferOptions;

    fn valid_config() -> Config {
        Config {
            source: EndpointConfig::file("data/test1.csv"),
            target: EndpointConfig::table("postgres://u:pw@localhost/db", "public.test1"),
            options: TransferOptions::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_both_endpoints_rejected() {
        let mut config = valid_config();
        config.source.conn = Some("postgres://localhost/db".into());
        config.source.table = Some("public.t".into());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("not both"));
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let mut config = valid_config();
        config.target = EndpointConfig::default();
        assert!(matches!(validate(&config), Err(SlingError::Config(_))));
    }

    #[test]
    fn test_conn_without_table_rejected() {
        let mut config = valid_config();
        config.target.table = None;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("target.table is required"));
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let mut config = valid_config();
        config.target.table = Some("test1".into());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("schema.table"));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut config = valid_config();
        config.options.buffer_rows = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let mut config = valid_config();
        config.options.buffer_rows = MAX_BUFFER_ROWS;
        assert!(validate(&config).is_ok());
        config.options.buffer_rows = usize::MAX;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("at most"));
    }

    #[test]
    fn test_endpoint_config_debug_redacts_password() {
        let config = valid_config();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains(":[REDACTED]@"));
        assert!(!debug_output.contains(":pw@"));
    }
}
