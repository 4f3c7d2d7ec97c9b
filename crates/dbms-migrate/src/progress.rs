//! Progress reporting gated by [`Verbosity`].
//!
//! Reporting is observational only: nothing here feeds back into the
//! orchestrator's decisions.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::Verbosity;

/// Emits progress events at the configured verbosity.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    verbosity: Verbosity,
}

impl Progress {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }

    /// A single step inside a table's pipeline.
    pub fn step(&self, table: &str, message: impl AsRef<str>) {
        if self.enabled(Verbosity::PerStep) {
            info!("{}: {}", table, message.as_ref());
        }
    }

    pub fn table_skipped(&self, table: &str) {
        if self.enabled(Verbosity::PerTable) {
            info!("{}: exists at destination, skipped.", table);
        }
    }

    pub fn table_done(&self, table: &str, rows: u64, elapsed: Duration) {
        if self.enabled(Verbosity::PerTable) {
            info!(
                "{}: {} rows in {:.1}s. Done.",
                table,
                rows,
                elapsed.as_secs_f64()
            );
        }
    }

    /// Failures are always surfaced as warnings; the per-table line follows
    /// the usual gating.
    pub fn table_failed(&self, table: &str, error: &str) {
        warn!("{}: {}", table, error);
        if self.enabled(Verbosity::PerTable) {
            info!("{}: Failed.", table);
        }
    }

    pub fn table_retry(&self, table: &str, attempt: u32, max: u32) {
        if self.enabled(Verbosity::PerTable) {
            info!("{}: retrying (attempt {}/{})", table, attempt, max);
        }
    }

    /// One line for the whole run.
    pub fn summary(&self, done: usize, skipped: usize, failed: usize, rows: u64, elapsed: Duration) {
        if self.enabled(Verbosity::Summary) {
            info!(
                "Migration finished: {} done, {} skipped, {} failed, {} rows in {:.1}s",
                done,
                skipped,
                failed,
                rows,
                elapsed.as_secs_f64()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_cumulative() {
        let p = Progress::new(Verbosity::PerTable);
        assert!(p.enabled(Verbosity::Summary));
        assert!(p.enabled(Verbosity::PerTable));
        assert!(!p.enabled(Verbosity::PerStep));

        let off = Progress::new(Verbosity::Off);
        assert!(!off.enabled(Verbosity::Summary));
    }
}
