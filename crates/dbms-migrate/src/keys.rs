//! Primary key propagation to the destination.

use tracing::{debug, info};

use crate::core::{Catalog, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::typemap::is_textual;

/// What [`propagate_primary_key`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The constraint was added.
    Added,
    /// The destination already had a primary key.
    AlreadyPresent,
    /// The source table has no primary key.
    NoSourceKey,
}

/// Copy a source primary key onto the destination table.
///
/// Runs only when the destination currently reports zero primary-key columns.
/// Textual key columns get their NULLs replaced with `''` first, since a
/// primary key column cannot hold NULL. Failures leave written data in place.
pub async fn propagate_primary_key(
    dest: &dyn TargetWriter,
    schema: &str,
    table: &str,
    source_keys: &[String],
) -> Result<KeyOutcome> {
    let qualified = format!("{}.{}", schema, table);

    if source_keys.is_empty() {
        return Ok(KeyOutcome::NoSourceKey);
    }

    let existing = dest
        .primary_keys(schema, table)
        .await
        .map_err(|e| MigrateError::key_propagation(&qualified, e))?;
    if !existing.is_empty() {
        debug!(
            "{}: destination already has primary key ({})",
            qualified,
            existing.join(", ")
        );
        return Ok(KeyOutcome::AlreadyPresent);
    }

    let types = dest
        .column_types(schema, table)
        .await
        .map_err(|e| MigrateError::key_propagation(&qualified, e))?;

    for key in source_keys {
        let Some(data_type) = types.get(key) else {
            return Err(MigrateError::key_propagation(
                &qualified,
                format!("key column {} not found at destination", key),
            ));
        };
        if is_textual(data_type) {
            let changed = dest
                .coalesce_nulls(schema, table, key)
                .await
                .map_err(|e| MigrateError::key_propagation(&qualified, e))?;
            if changed > 0 {
                info!(
                    "{}: replaced {} NULL values in key column {} with ''",
                    qualified, changed, key
                );
            }
        }
    }

    dest.add_primary_key(schema, table, source_keys)
        .await
        .map_err(|e| MigrateError::key_propagation(&qualified, e))?;

    debug!("{}: primary key ({}) added", qualified, source_keys.join(", "));
    Ok(KeyOutcome::Added)
}
