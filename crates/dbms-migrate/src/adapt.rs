//! Type adaptation for source columns with no exact destination analog.
//!
//! Each column is classified once per table into a [`ColumnTypeClass`]. The
//! class decides how the column is selected at the source, how its values are
//! transformed in flight, and which type it gets at the destination.

use std::borrow::Cow;

use crate::core::identifier::quote_mssql;
use crate::core::{Batch, SqlValue, TableDescriptor};
use crate::error::Result;
use crate::typemap::mssql_to_postgres;

/// Adaptation class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTypeClass {
    /// `hierarchyid`: read as its string path, backslashes doubled, stored as bytea.
    HierarchicalPath,
    /// `varbinary`, `binary`, `image`: raw bytes stored as bytea.
    LargeBinary,
    /// `geometry`, `geography`: copied as opaque bytes and left for follow-up.
    Geometry,
    /// Everything else.
    Plain,
}

/// Declared types that need adaptation. Anything absent is `Plain`.
const SPECIAL_TYPES: &[(&str, ColumnTypeClass)] = &[
    ("hierarchyid", ColumnTypeClass::HierarchicalPath),
    ("varbinary", ColumnTypeClass::LargeBinary),
    ("binary", ColumnTypeClass::LargeBinary),
    ("image", ColumnTypeClass::LargeBinary),
    ("geometry", ColumnTypeClass::Geometry),
    ("geography", ColumnTypeClass::Geometry),
];

impl ColumnTypeClass {
    /// Classify a declared source type.
    pub fn classify(data_type: &str) -> Self {
        SPECIAL_TYPES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(data_type.trim()))
            .map(|(_, class)| *class)
            .unwrap_or(ColumnTypeClass::Plain)
    }
}

/// How one column travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedColumn {
    pub name: String,
    pub class: ColumnTypeClass,
    /// Source select expression, aliased back to the column name.
    pub select_expr: String,
    /// Type of the value the select expression produces.
    pub read_type: String,
    /// Destination column type.
    pub write_type: String,
}

/// Per-table adaptation, computed once per visit and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptationPlan {
    pub columns: Vec<AdaptedColumn>,
}

impl AdaptationPlan {
    /// Build the plan for a table.
    pub fn for_table(table: &TableDescriptor) -> Result<Self> {
        let mut columns = Vec::with_capacity(table.columns.len());

        for col in &table.columns {
            let class = ColumnTypeClass::classify(&col.data_type);
            let quoted = quote_mssql(&col.name)?;

            let (select_expr, read_type, write_type) = match class {
                ColumnTypeClass::HierarchicalPath => (
                    format!("{}.ToString() AS {}", quoted, quoted),
                    "nvarchar".to_string(),
                    "bytea".to_string(),
                ),
                ColumnTypeClass::LargeBinary => {
                    (quoted, col.data_type.clone(), "bytea".to_string())
                }
                ColumnTypeClass::Geometry => (
                    format!("CAST({} AS VARBINARY(MAX)) AS {}", quoted, quoted),
                    "varbinary".to_string(),
                    "bytea".to_string(),
                ),
                ColumnTypeClass::Plain => (
                    quoted,
                    col.data_type.clone(),
                    mssql_to_postgres(&col.data_type, col.max_length, col.precision, col.scale),
                ),
            };

            columns.push(AdaptedColumn {
                name: col.name.clone(),
                class,
                select_expr,
                read_type,
                write_type,
            });
        }

        Ok(Self { columns })
    }

    pub fn select_exprs(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.select_expr.clone()).collect()
    }

    pub fn read_types(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.read_type.clone()).collect()
    }

    /// Destination type for a column.
    pub fn write_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.write_type.as_str())
    }

    /// Columns copied without conversion that an operator should revisit.
    pub fn deferred_columns(&self) -> impl Iterator<Item = &AdaptedColumn> {
        self.columns
            .iter()
            .filter(|c| c.class == ColumnTypeClass::Geometry)
    }

    /// Whether any column needs a per-value transform.
    pub fn transforms_values(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.class == ColumnTypeClass::HierarchicalPath)
    }

    /// Apply per-value transforms to every row of a batch in place.
    pub fn adapt_batch(&self, batch: &mut Batch) {
        if !self.transforms_values() {
            return;
        }
        for row in &mut batch.rows {
            for (value, col) in row.iter_mut().zip(&self.columns) {
                if col.class == ColumnTypeClass::HierarchicalPath {
                    escape_hierarchy_path(value);
                }
            }
        }
    }
}

/// Double every backslash in a hierarchy path value.
fn escape_hierarchy_path(value: &mut SqlValue<'static>) {
    if let SqlValue::Text(text) = value {
        if text.contains('\\') {
            *text = Cow::Owned(text.replace('\\', "\\\\"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, SqlNullType};

    fn table() -> TableDescriptor {
        let mut t = TableDescriptor::named("dbo", "org");
        t.columns = vec![
            Column::new("id", "int", false),
            Column::new("node", "hierarchyid", true),
            Column::new("photo", "varbinary", true).with_max_length(-1),
            Column::new("shape", "geography", true),
            Column::new("title", "nvarchar", true).with_max_length(50),
        ];
        t
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            ColumnTypeClass::classify("HierarchyId"),
            ColumnTypeClass::HierarchicalPath
        );
        assert_eq!(ColumnTypeClass::classify("image"), ColumnTypeClass::LargeBinary);
        assert_eq!(ColumnTypeClass::classify("binary"), ColumnTypeClass::LargeBinary);
        assert_eq!(ColumnTypeClass::classify("geometry"), ColumnTypeClass::Geometry);
        assert_eq!(ColumnTypeClass::classify("nvarchar"), ColumnTypeClass::Plain);
    }

    #[test]
    fn test_plan_select_exprs_and_write_types() {
        let plan = AdaptationPlan::for_table(&table()).unwrap();
        assert_eq!(
            plan.select_exprs(),
            vec![
                "[id]".to_string(),
                "[node].ToString() AS [node]".to_string(),
                "[photo]".to_string(),
                "CAST([shape] AS VARBINARY(MAX)) AS [shape]".to_string(),
                "[title]".to_string(),
            ]
        );
        assert_eq!(plan.write_type("id"), Some("integer"));
        assert_eq!(plan.write_type("node"), Some("bytea"));
        assert_eq!(plan.write_type("photo"), Some("bytea"));
        assert_eq!(plan.write_type("shape"), Some("bytea"));
        assert_eq!(plan.write_type("title"), Some("varchar(50)"));
        assert_eq!(plan.deferred_columns().count(), 1);
        assert_eq!(
            plan.read_types(),
            vec!["int", "nvarchar", "varbinary", "varbinary", "nvarchar"]
        );
    }

    #[test]
    fn test_hierarchy_backslashes_are_doubled() {
        let plan = AdaptationPlan::for_table(&table()).unwrap();
        let mut batch = Batch::new(
            0,
            vec![vec![
                SqlValue::I32(1),
                SqlValue::from(r"/1\2/"),
                SqlValue::from(vec![0x5c_u8]),
                SqlValue::Null(SqlNullType::Bytes),
                SqlValue::from(r"a\b"),
            ]],
        );
        plan.adapt_batch(&mut batch);

        let row = &batch.rows[0];
        assert_eq!(row[1], SqlValue::from(r"/1\\2/"));
        // Binary and plain columns are untouched
        assert_eq!(row[2], SqlValue::from(vec![0x5c_u8]));
        assert_eq!(row[4], SqlValue::from(r"a\b"));
    }

    #[test]
    fn test_plain_table_has_no_transforms() {
        let mut t = TableDescriptor::named("dbo", "orders");
        t.columns = vec![Column::new("id", "int", false)];
        let plan = AdaptationPlan::for_table(&t).unwrap();
        assert!(!plan.transforms_values());
        assert_eq!(plan.deferred_columns().count(), 0);
    }
}
