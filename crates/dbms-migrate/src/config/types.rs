//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::fmt;
use sysinfo::System;
use tracing::info;

/// Default memory ceiling for a single in-memory batch (2 GiB).
pub const DEFAULT_MEMORY_THRESHOLD_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default per-batch deadline in seconds.
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 3600;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_bytes: sys.total_memory(),
            cpu_cores: sys.cpus().len().max(1),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration policy.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "mssql" for now).
    #[serde(default = "default_mssql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgresql" for now).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// How much progress the engine reports.
///
/// Purely observational; never changes what the engine does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Nothing beyond warnings and errors.
    Off,
    /// One line when the run finishes.
    Summary,
    /// One line per table ending in "Done." or "Failed.".
    #[default]
    PerTable,
    /// Every step of every table.
    PerStep,
}

impl Verbosity {
    /// Parse a verbosity level from a CLI string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "off" | "0" => Some(Verbosity::Off),
            "summary" | "1" => Some(Verbosity::Summary),
            "per_table" | "table" | "2" => Some(Verbosity::PerTable),
            "per_step" | "step" | "3" => Some(Verbosity::PerStep),
            _ => None,
        }
    }
}

/// Migration policy: immutable configuration for one run.
///
/// Performance fields use `Option<T>` to distinguish "not set" (auto-tuned)
/// from "explicitly set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Table names to skip. Matched case-insensitively against either the
    /// bare table name or `schema.table`.
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Include source file tables (MSSQL FileTable) in the run.
    #[serde(default)]
    pub include_file_tables: bool,

    /// Estimated batch size in bytes above which a batch is split.
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_bytes: u64,

    /// Rows per read chunk. When unset the size is chosen per table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,

    /// Re-copy tables that already exist at the destination.
    #[serde(default)]
    pub update: bool,

    /// Number of tables migrated concurrently. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Maximum MSSQL connections. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<usize>,

    /// Maximum PostgreSQL connections. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,

    /// Deadline for a single batch read or write, in seconds. 0 disables.
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,

    /// How many times a failed table is retried from scratch.
    #[serde(default)]
    pub table_retries: u32,

    /// Progress reporting level.
    #[serde(default)]
    pub verbosity: Verbosity,

    /// Ask for confirmation before starting the run.
    #[serde(default = "default_true")]
    pub confirm: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            exclude_tables: Vec::new(),
            include_file_tables: false,
            memory_threshold_bytes: DEFAULT_MEMORY_THRESHOLD_BYTES,
            chunk_size: None,
            update: false,
            workers: None,
            max_source_connections: None,
            max_target_connections: None,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            table_retries: 0,
            verbosity: Verbosity::default(),
            confirm: true,
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores.max(1);

        // Connection pools: two per core, 4-64 range
        if self.max_target_connections.is_none() {
            self.max_target_connections = Some((cores * 2).clamp(4, 64));
        }
        if self.max_source_connections.is_none() {
            self.max_source_connections = Some((cores * 2).clamp(4, 64));
        }

        // Workers: one table per core, never more than the smaller pool
        if self.workers.is_none() {
            let pool_cap = self
                .get_max_target_connections()
                .min(self.get_max_source_connections());
            self.workers = Some(cores.min(pool_cap).max(1));
        }

        info!(
            "Auto-tuned config: workers={}, mssql_conns={}, pg_conns={}",
            self.get_workers(),
            self.get_max_source_connections(),
            self.get_max_target_connections(),
        );

        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    pub fn get_max_source_connections(&self) -> usize {
        self.max_source_connections.unwrap_or(8)
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections.unwrap_or(8)
    }

    /// Whether a table is excluded by name.
    pub fn is_excluded(&self, schema: &str, table: &str) -> bool {
        let qualified = format!("{}.{}", schema, table);
        self.exclude_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table) || t.eq_ignore_ascii_case(&qualified))
    }
}

// Default value functions for serde
fn default_mssql() -> String {
    "mssql".to_string()
}

fn default_postgres() -> String {
    "postgresql".to_string()
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_true() -> bool {
    true
}

fn default_memory_threshold() -> u64 {
    DEFAULT_MEMORY_THRESHOLD_BYTES
}

fn default_batch_timeout() -> u64 {
    DEFAULT_BATCH_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_tuning_caps_workers_at_pool_size() {
        let resources = SystemResources {
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            cpu_cores: 16,
        };
        let config = MigrationConfig {
            max_target_connections: Some(6),
            ..Default::default()
        };
        let tuned = config.with_auto_tuning(&resources);
        assert_eq!(tuned.workers, Some(6));
        assert_eq!(tuned.max_source_connections, Some(32));
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_values() {
        let resources = SystemResources {
            total_memory_bytes: 0,
            cpu_cores: 2,
        };
        let config = MigrationConfig {
            workers: Some(9),
            ..Default::default()
        };
        let tuned = config.with_auto_tuning(&resources);
        assert_eq!(tuned.workers, Some(9));
        assert_eq!(tuned.max_target_connections, Some(4));
    }

    #[test]
    fn test_is_excluded_matches_bare_and_qualified_names() {
        let config = MigrationConfig {
            exclude_tables: vec!["AuditLog".into(), "sales.Archive".into()],
            ..Default::default()
        };
        assert!(config.is_excluded("dbo", "auditlog"));
        assert!(config.is_excluded("sales", "Archive"));
        assert!(!config.is_excluded("dbo", "Archive"));
        assert!(!config.is_excluded("dbo", "orders"));
    }

    #[test]
    fn test_verbosity_parse() {
        assert_eq!(Verbosity::parse("off"), Some(Verbosity::Off));
        assert_eq!(Verbosity::parse("per-table"), Some(Verbosity::PerTable));
        assert_eq!(Verbosity::parse("PER_STEP"), Some(Verbosity::PerStep));
        assert_eq!(Verbosity::parse("loud"), None);
        assert!(Verbosity::PerStep > Verbosity::PerTable);
    }

    #[test]
    fn test_policy_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.memory_threshold_bytes, 2 * 1024 * 1024 * 1024);
        assert!(config.chunk_size.is_none());
        assert!(!config.update);
        assert!(!config.include_file_tables);
        assert!(config.confirm);
    }
}
