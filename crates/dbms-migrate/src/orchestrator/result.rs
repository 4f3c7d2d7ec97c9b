//! Run results: per-table outcomes, the error log and the run summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Table name (`schema.table`) to error message for every failed table.
///
/// Empty means every visited table succeeded or was skipped.
pub type ErrorLog = BTreeMap<String, String>;

/// Where a table ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    /// Never started (run cancelled first).
    Pending,
    /// Destination already present and updates disabled.
    Skipped,
    /// Still running; never present in a finished result.
    InProgress,
    Done,
    Failed,
}

/// Outcome of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOutcome {
    /// `schema.table` at the source.
    pub table: String,
    pub state: TableState,
    pub rows: u64,
    /// Attempts made (0 for skipped and pending tables).
    pub attempts: u32,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Spatial columns copied as opaque bytes, awaiting manual conversion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred_columns: Vec<String>,
}

impl TableOutcome {
    pub fn new(table: impl Into<String>, state: TableState) -> Self {
        Self {
            table: table.into(),
            state,
            rows: 0,
            attempts: 0,
            duration_seconds: 0.0,
            error: None,
            deferred_columns: Vec::new(),
        }
    }
}

/// Summary of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// `completed`, `completed_with_errors`, `cancelled` or `declined`.
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// Tables visited after filtering.
    pub tables_total: usize,
    pub tables_done: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,
    pub tables_pending: usize,

    pub rows_transferred: u64,

    /// Failed tables and why.
    pub error_log: ErrorLog,

    /// Per-table outcomes in listing order.
    pub outcomes: Vec<TableOutcome>,
}

impl MigrationResult {
    /// Assemble a result from finished outcomes.
    pub fn from_outcomes(
        run_id: String,
        started_at: DateTime<Utc>,
        outcomes: Vec<TableOutcome>,
        cancelled: bool,
    ) -> Self {
        let completed_at = Utc::now();
        let count = |state: TableState| outcomes.iter().filter(|o| o.state == state).count();

        let error_log: ErrorLog = outcomes
            .iter()
            .filter(|o| o.state == TableState::Failed)
            .map(|o| (o.table.clone(), o.error.clone().unwrap_or_default()))
            .collect();

        let status = if cancelled {
            "cancelled"
        } else if error_log.is_empty() {
            "completed"
        } else {
            "completed_with_errors"
        };

        Self {
            run_id,
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            tables_total: outcomes.len(),
            tables_done: count(TableState::Done),
            tables_skipped: count(TableState::Skipped),
            tables_failed: count(TableState::Failed),
            tables_pending: count(TableState::Pending),
            rows_transferred: outcomes.iter().map(|o| o.rows).sum(),
            error_log,
            outcomes,
        }
    }

    /// Result of a run the operator declined to start.
    pub fn declined(run_id: String, started_at: DateTime<Utc>) -> Self {
        let mut result = Self::from_outcomes(run_id, started_at, Vec::new(), false);
        result.status = "declined".to_string();
        result
    }

    /// Whether every visited table succeeded or was skipped.
    pub fn is_success(&self) -> bool {
        self.error_log.is_empty()
    }

    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.outcomes.iter().find(|o| o.table == table)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(table: &str, state: TableState, rows: u64) -> TableOutcome {
        let mut o = TableOutcome::new(table, state);
        o.rows = rows;
        if state == TableState::Failed {
            o.error = Some("boom".into());
        }
        o
    }

    #[test]
    fn test_counts_and_error_log() {
        let result = MigrationResult::from_outcomes(
            "run".into(),
            Utc::now(),
            vec![
                outcome("dbo.a", TableState::Done, 10),
                outcome("dbo.b", TableState::Failed, 3),
                outcome("dbo.c", TableState::Skipped, 0),
            ],
            false,
        );
        assert_eq!(result.status, "completed_with_errors");
        assert_eq!(result.tables_total, 3);
        assert_eq!(result.tables_done, 1);
        assert_eq!(result.tables_failed, 1);
        assert_eq!(result.tables_skipped, 1);
        assert_eq!(result.rows_transferred, 13);
        assert_eq!(result.error_log.len(), 1);
        assert_eq!(result.error_log.get("dbo.b").map(String::as_str), Some("boom"));
        assert!(!result.is_success());
    }

    #[test]
    fn test_declined_and_json() {
        let result = MigrationResult::declined("run".into(), Utc::now());
        assert_eq!(result.status, "declined");
        assert!(result.is_success());
        let json = result.to_json().unwrap();
        assert!(json.contains("\"status\": \"declined\""));
    }
}
