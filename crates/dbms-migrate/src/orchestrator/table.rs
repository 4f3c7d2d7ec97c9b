//! The per-table pipeline: skip check, read, adapt, split, write, keys.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapt::AdaptationPlan;
use crate::config::MigrationConfig;
use crate::core::{
    Catalog, ChunkPlan, ReadOptions, SourceReader, TableDescriptor, TargetWriter,
};
use crate::error::{MigrateError, Result};
use crate::governor::maybe_split;
use crate::keys::{propagate_primary_key, KeyOutcome};
use crate::progress::Progress;

use super::result::{TableOutcome, TableState};

/// Pause before retrying a failed table.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// What a successful copy produced.
struct Copied {
    rows: u64,
    deferred_columns: Vec<String>,
}

/// Everything a table task needs, shared across workers.
#[derive(Clone)]
pub(crate) struct TableContext {
    pub source: Arc<dyn SourceReader>,
    pub target: Arc<dyn TargetWriter>,
    pub policy: Arc<MigrationConfig>,
    pub progress: Progress,
    pub cancel: CancellationToken,
}

impl TableContext {
    /// Run one table to a final state. Never returns an error: failures are
    /// captured in the outcome.
    pub async fn run(&self, listed: TableDescriptor) -> TableOutcome {
        let name = listed.full_name();
        let started = Instant::now();

        if self.cancel.is_cancelled() {
            return TableOutcome::new(name, TableState::Pending);
        }

        let dest_schema = self.target.handle().schema.clone();
        match self.target.table_exists(&dest_schema, &listed.name).await {
            Ok(true) if !self.policy.update => {
                self.progress.table_skipped(&name);
                return TableOutcome::new(name, TableState::Skipped);
            }
            Ok(_) => {}
            Err(e) => return self.failed(name, 0, started, &e),
        }

        let max_attempts = self.policy.table_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.copy_table(&listed, &name).await {
                Ok(Copied { rows, deferred_columns }) => {
                    let elapsed = started.elapsed();
                    self.progress.table_done(&name, rows, elapsed);
                    let mut outcome = TableOutcome::new(name, TableState::Done);
                    outcome.rows = rows;
                    outcome.deferred_columns = deferred_columns;
                    outcome.attempts = attempt;
                    outcome.duration_seconds = elapsed.as_secs_f64();
                    return outcome;
                }
                Err(e) if attempt < max_attempts && !matches!(e, MigrateError::Cancelled) => {
                    debug!("{}: attempt {} failed: {}", name, attempt, e);
                    self.progress.table_retry(&name, attempt + 1, max_attempts);
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                        _ = self.cancel.cancelled() => {
                            return self.failed(name, attempt, started, &MigrateError::Cancelled);
                        }
                    }
                }
                Err(e) => return self.failed(name, attempt, started, &e),
            }
        }
    }

    fn failed(&self, name: String, attempts: u32, started: Instant, error: &MigrateError) -> TableOutcome {
        let message = error.to_string();
        self.progress.table_failed(&name, &message);
        let mut outcome = TableOutcome::new(name, TableState::Failed);
        outcome.attempts = attempts;
        outcome.duration_seconds = started.elapsed().as_secs_f64();
        outcome.error = Some(message);
        outcome
    }

    /// Copy a table from scratch.
    async fn copy_table(&self, listed: &TableDescriptor, name: &str) -> Result<Copied> {
        let mut table = self
            .source
            .describe_table(&listed.schema, &listed.name)
            .await?;
        table.is_file_table = listed.is_file_table;

        let plan = AdaptationPlan::for_table(&table)?;
        let deferred_columns: Vec<String> =
            plan.deferred_columns().map(|c| c.name.clone()).collect();
        if !deferred_columns.is_empty() {
            warn!(
                "{}: spatial columns ({}) copied as opaque bytes; conversion needs manual follow-up",
                name,
                deferred_columns.join(", ")
            );
        }
        let chunk_plan = ChunkPlan::for_table(table.row_count, self.policy.chunk_size);
        self.progress.step(
            name,
            format!(
                "{} columns, ~{} rows, {:?}",
                table.columns.len(),
                table.row_count,
                chunk_plan
            ),
        );

        let mut stream = self
            .source
            .read_table(ReadOptions::new(&table, &plan, chunk_plan));

        let mut rows = 0u64;
        let mut batches = 0usize;
        while let Some(next) = self.bounded(name, stream.recv()).await? {
            let mut batch = next?;
            batches += 1;
            plan.adapt_batch(&mut batch);

            let parts = maybe_split(batch, self.policy.memory_threshold_bytes);
            if parts.len() > 1 {
                self.progress.step(
                    name,
                    format!("batch {} split into {} parts", parts[0].sequence_index, parts.len()),
                );
            }

            for part in parts {
                let mode = part.write_mode();
                let written = self
                    .bounded(name, self.target.write_batch(&table, &plan, &part, mode))
                    .await??;
                rows += written;
                self.progress.step(
                    name,
                    format!(
                        "batch {}.{} written ({:?}, {} rows)",
                        part.sequence_index, part.sub_index, mode, written
                    ),
                );
            }
        }

        if batches == 0 {
            return Err(MigrateError::read(name, "reader ended without producing a batch"));
        }

        let dest_schema = &self.target.handle().schema;
        match propagate_primary_key(self.target.as_ref(), dest_schema, &table.name, &table.primary_key)
            .await?
        {
            KeyOutcome::Added => self.progress.step(name, "primary key added"),
            KeyOutcome::AlreadyPresent => self.progress.step(name, "primary key already present"),
            KeyOutcome::NoSourceKey => self.progress.step(name, "no primary key at source"),
        }

        Ok(Copied {
            rows,
            deferred_columns,
        })
    }

    /// Await a batch-level operation under the batch deadline and the run's
    /// cancellation token.
    async fn bounded<F: Future>(&self, name: &str, fut: F) -> Result<F::Output> {
        let seconds = self.policy.batch_timeout_secs;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(MigrateError::Cancelled),
            out = async {
                if seconds == 0 {
                    Ok(fut.await)
                } else {
                    tokio::time::timeout(Duration::from_secs(seconds), fut)
                        .await
                        .map_err(|_| MigrateError::Timeout {
                            table: name.to_string(),
                            seconds,
                        })
                }
            } => out,
        }
    }
}
