//! Destination column types for MSSQL source columns.

/// Largest length PostgreSQL accepts for `varchar(n)` / `char(n)`.
const PG_MAX_CHAR_LENGTH: i32 = 10_485_760;

/// Map an MSSQL data type to the PostgreSQL type used in `CREATE TABLE`.
pub fn mssql_to_postgres(mssql_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    match mssql_type.to_lowercase().as_str() {
        "bit" => "boolean".to_string(),

        "tinyint" | "smallint" => "smallint".to_string(),
        "int" => "integer".to_string(),
        "bigint" => "bigint".to_string(),

        "decimal" | "numeric" if precision > 0 => format!("numeric({},{})", precision, scale),
        "decimal" | "numeric" => "numeric".to_string(),
        "money" => "numeric(19,4)".to_string(),
        "smallmoney" => "numeric(10,4)".to_string(),

        "float" => "double precision".to_string(),
        "real" => "real".to_string(),

        "char" | "nchar" if (1..=PG_MAX_CHAR_LENGTH).contains(&max_length) => {
            format!("char({})", max_length)
        }
        "varchar" | "nvarchar" if (1..=PG_MAX_CHAR_LENGTH).contains(&max_length) => {
            format!("varchar({})", max_length)
        }
        "char" | "nchar" | "varchar" | "nvarchar" | "text" | "ntext" | "sysname" => {
            "text".to_string()
        }

        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => "bytea".to_string(),

        "date" => "date".to_string(),
        "time" => "time".to_string(),
        "datetime" | "datetime2" | "smalldatetime" => "timestamp".to_string(),
        "datetimeoffset" => "timestamptz".to_string(),

        "uniqueidentifier" => "uuid".to_string(),
        "xml" => "xml".to_string(),

        // hierarchyid, geometry and geography are overridden by the type adapter
        _ => "text".to_string(),
    }
}

/// Whether a declared type (either dialect) holds character data.
///
/// Primary-key columns of these types get NULLs coalesced to `''` before the
/// constraint is added.
pub fn is_textual(data_type: &str) -> bool {
    let base = data_type
        .split('(')
        .next()
        .unwrap_or(data_type)
        .trim()
        .to_lowercase();
    matches!(
        base.as_str(),
        "char"
            | "nchar"
            | "varchar"
            | "nvarchar"
            | "text"
            | "ntext"
            | "sysname"
            | "character"
            | "character varying"
            | "bpchar"
            | "citext"
    )
}
