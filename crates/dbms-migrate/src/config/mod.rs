//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_policy;

use crate::error::Result;
use std::path::Path;

impl Config {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: mssql.internal
  database: Sales
  user: sa
  password: secret
target:
  host: pg.internal
  database: sales
  user: postgres
  password: secret
  ssl_mode: disable
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.source.schema, "dbo");
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.target.r#type, "postgresql");
        assert_eq!(config.migration.verbosity, Verbosity::PerTable);
        assert_eq!(config.migration.batch_timeout_secs, 3600);
    }

    #[test]
    fn test_from_yaml_reads_policy() {
        let yaml = format!(
            "{}migration:\n  update: true\n  chunk_size: 5000\n  exclude_tables: [sysdiagrams]\n  verbosity: per_step\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.migration.update);
        assert_eq!(config.migration.chunk_size, Some(5000));
        assert_eq!(config.migration.exclude_tables, vec!["sysdiagrams"]);
        assert_eq!(config.migration.verbosity, Verbosity::PerStep);
    }

    #[test]
    fn test_negative_chunk_size_is_rejected() {
        let yaml = format!("{}migration:\n  chunk_size: -10\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.source.database, "Sales");
    }
}
