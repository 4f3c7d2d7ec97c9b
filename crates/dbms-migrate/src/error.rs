//! Error types for the migration engine.
//!
//! Errors fall into two scopes. Run-scoped errors (configuration problems, a
//! failure while listing source tables) abort a migration before any table is
//! touched. Table-scoped errors (reads, writes, key propagation, timeouts) are
//! caught at the orchestrator's per-table boundary and recorded in the
//! [`ErrorLog`](crate::orchestrator::ErrorLog).

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Invalid configuration or policy (run-scoped).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A metadata query against a catalog failed.
    #[error("Catalog error ({context}): {message}")]
    Catalog { context: String, message: String },

    /// Fetching a batch from the source failed.
    #[error("Read failed for table {table}: {message}")]
    Read { table: String, message: String },

    /// Writing a batch to the destination failed.
    #[error("Write failed for table {table}: {message}")]
    Write { table: String, message: String },

    /// Copying the primary key to the destination failed.
    #[error("Primary key propagation failed for table {table}: {message}")]
    KeyPropagation { table: String, message: String },

    /// A batch read or write exceeded its deadline.
    #[error("Batch deadline of {seconds}s exceeded for table {table}")]
    Timeout { table: String, seconds: u64 },

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source database driver error.
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database driver error.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Catalog error.
    pub fn catalog(context: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Catalog {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a Read error.
    pub fn read(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Read {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Write error.
    pub fn write(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Write {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a KeyPropagation error.
    pub fn key_propagation(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::KeyPropagation {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the whole run rather than a single table.
    pub fn is_run_scoped(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::Io(_)
                | MigrateError::Yaml(_)
                | MigrateError::Json(_)
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 3,
            MigrateError::Pool { .. } | MigrateError::Source(_) | MigrateError::Target(_) => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_scoped_errors_are_not_run_scoped() {
        assert!(!MigrateError::read("dbo.orders", "boom").is_run_scoped());
        assert!(!MigrateError::write("dbo.orders", "boom").is_run_scoped());
        assert!(!MigrateError::key_propagation("dbo.orders", "boom").is_run_scoped());
        assert!(!MigrateError::Cancelled.is_run_scoped());
        assert!(MigrateError::Config("bad".into()).is_run_scoped());
    }

    #[test]
    fn test_error_messages_name_the_table() {
        let err = MigrateError::write("dbo.orders", "duplicate key");
        assert_eq!(
            err.to_string(),
            "Write failed for table dbo.orders: duplicate key"
        );

        let err = MigrateError::Timeout {
            table: "dbo.orders".into(),
            seconds: 30,
        };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 3);
        assert_eq!(MigrateError::pool("x", "y").exit_code(), 4);
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
        assert_eq!(MigrateError::catalog("listing", "x").exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_without_chain() {
        let err = MigrateError::Config("source.host is required".into());
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Configuration error: source.host is required"));
        assert!(!detailed.contains("Caused by"));
    }
}
