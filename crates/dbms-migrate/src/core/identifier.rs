//! Identifier quoting for dynamically built SQL.
//!
//! Table and column names cannot be bound as parameters, so every name that
//! ends up in generated SQL goes through one of these functions.

use crate::error::{MigrateError, Result};

/// Longest identifier either engine accepts (SQL Server allows 128).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject identifiers that are empty, too long, or contain NUL bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config("Identifier cannot be empty".into()));
    }
    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }
    Ok(())
}

/// Quote a PostgreSQL identifier: `"name"`, inner quotes doubled.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a SQL Server identifier: `[name]`, closing brackets doubled.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Name of the primary-key constraint created on the destination.
///
/// PostgreSQL truncates identifiers at 63 bytes; the name is cut on a char
/// boundary so the constraint keeps a valid UTF-8 name.
pub fn pk_constraint_name(table: &str) -> String {
    let mut name = format!("pk_{}", table);
    if name.len() > 63 {
        let mut end = 63;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_pg() {
        assert_eq!(quote_pg("orders").unwrap(), "\"orders\"");
        assert_eq!(quote_pg("odd\"name").unwrap(), "\"odd\"\"name\"");
        assert!(quote_pg("").is_err());
        assert!(quote_pg("bad\0name").is_err());
    }

    #[test]
    fn test_quote_mssql() {
        assert_eq!(quote_mssql("orders").unwrap(), "[orders]");
        assert_eq!(quote_mssql("odd]name").unwrap(), "[odd]]name]");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify_pg("public", "orders").unwrap(), "\"public\".\"orders\"");
        assert_eq!(qualify_mssql("dbo", "orders").unwrap(), "[dbo].[orders]");
    }

    #[test]
    fn test_pk_constraint_name_is_bounded() {
        assert_eq!(pk_constraint_name("orders"), "pk_orders");
        let long = "x".repeat(100);
        assert_eq!(pk_constraint_name(&long).len(), 63);
    }

    #[test]
    fn test_identifier_too_long() {
        assert!(validate_identifier(&"a".repeat(129)).is_err());
        assert!(validate_identifier(&"a".repeat(128)).is_ok());
    }
}
