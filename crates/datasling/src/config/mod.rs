//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Build a configuration from its parts.
    pub fn new(source: EndpointConfig, target: EndpointConfig, options: TransferOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Resolved source endpoint.
    pub fn source_endpoint(&self) -> Result<Endpoint> {
        validation::resolve(&self.source, "source")
    }

    /// Resolved target endpoint.
    pub fn target_endpoint(&self) -> Result<Endpoint> {
        validation::resolve(&self.target, "target")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::props::ALLOW_BULK_EXPORT;
    use crate::error::SlingError;

    const YAML: &str = r#"
source:
  conn: postgres://user:pw@localhost/db?sslmode=disable
  table: public.test1
  properties:
    allow_bulk_export: "true"
target:
  file: out.csv.gz
options:
  drop_target: true
"#;

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(YAML).unwrap();
        assert!(config.options.drop_target);
        assert_eq!(config.options.buffer_rows, 1000);
        assert!(config.options.staging.is_none());

        match config.source_endpoint().unwrap() {
            Endpoint::Table { table, props, .. } => {
                assert_eq!(table.to_string(), "public.test1");
                assert!(props.get_bool(ALLOW_BULK_EXPORT));
            }
            other => panic!("unexpected source {:?}", other),
        }
        assert!(matches!(config.target_endpoint().unwrap(), Endpoint::File(_)));
    }

    #[test]
    fn test_from_yaml_rejects_ambiguous_side() {
        let yaml = "source:\n  file: a.csv\n  conn: postgres://h/db\n  table: s.t\ntarget:\n  file: b.csv\n";
        assert!(matches!(Config::from_yaml(yaml), Err(SlingError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/datasling.yaml"),
            Err(SlingError::Io(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.yaml");
        std::fs::write(&path, YAML).unwrap();
        assert!(Config::load(&path).is_ok());
    }
}
