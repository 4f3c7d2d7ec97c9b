//! Table and column metadata shared by the catalogs, drivers and orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database engine behind a [`DatabaseHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mssql,
    Postgresql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Mssql => "mssql",
            Dialect::Postgresql => "postgresql",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an open database: which engine, where, and the default schema.
///
/// Drivers own the actual connection pool; this is what the rest of the
/// engine sees of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseHandle {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub schema: String,
}

impl DatabaseHandle {
    pub fn new(
        dialect: Dialect,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            host: host.into(),
            port,
            database: database.into(),
            schema: schema.into(),
        }
    }
}

impl fmt::Display for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{} (schema {})",
            self.dialect, self.host, self.port, self.database, self.schema
        )
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Declared type as reported by the catalog, lower case (e.g. "nvarchar").
    pub data_type: String,

    /// Maximum length for character and binary types (-1 = MAX).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,
}

impl Column {
    /// Convenience constructor for a column with no length or precision.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable,
        }
    }

    pub fn with_max_length(mut self, max_length: i32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }
}

/// Snapshot of one table as seen by a catalog.
///
/// Refreshed each time the orchestrator visits a table; never cached for the
/// rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Columns in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names in key order (empty when the table has none).
    pub primary_key: Vec<String>,

    /// Approximate row count.
    pub row_count: i64,

    /// Source-specific file table (SQL Server FileTable).
    pub is_file_table: bool,
}

impl TableDescriptor {
    /// A descriptor with only an identity; used by listings before the
    /// table is described in full.
    pub fn named(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            row_count: 0,
            is_file_table: false,
        }
    }

    /// `schema.name`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let table = TableDescriptor::named("dbo", "orders");
        assert_eq!(table.full_name(), "dbo.orders");
        assert!(!table.has_pk());
        assert!(!table.is_file_table);
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let mut table = TableDescriptor::named("dbo", "orders");
        table.columns.push(Column::new("OrderId", "INT", false));
        assert_eq!(table.column("orderid").map(|c| c.data_type.as_str()), Some("int"));
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_handle_display() {
        let handle = DatabaseHandle::new(Dialect::Postgresql, "pg", 5432, "sales", "public");
        assert_eq!(handle.to_string(), "postgresql://pg:5432/sales (schema public)");
    }
}
