//! Seams between the engine and the databases.
//!
//! - [`Catalog`]: read-only metadata queries, implemented by both drivers
//! - [`SourceReader`]: streams a table's rows as batches
//! - [`BatchStream`]: the receiving end of a table read
//! - [`TargetWriter`]: writes batches and adds primary keys
//!
//! The orchestrator only talks to these traits, so the whole pipeline can be
//! driven against in-memory implementations.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapt::AdaptationPlan;
use crate::error::{MigrateError, Result};

use super::chunk::ChunkPlan;
use super::schema::{Column, DatabaseHandle, TableDescriptor};
use super::value::{Batch, WriteMode};

/// What to read from a source table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Column names in ordinal order.
    pub columns: Vec<String>,
    /// Select expression per column (e.g. `[Node].ToString()`).
    pub select_exprs: Vec<String>,
    /// Type produced by each select expression, used to decode values.
    pub col_types: Vec<String>,
    /// How to slice the stream into batches.
    pub chunk_plan: ChunkPlan,
    /// Optional ordering columns. Natural scan order when empty.
    pub order_by: Vec<String>,
}

impl ReadOptions {
    /// Build read options from a table and its adaptation plan.
    pub fn new(table: &TableDescriptor, plan: &AdaptationPlan, chunk_plan: ChunkPlan) -> Self {
        Self {
            schema: table.schema.clone(),
            table: table.name.clone(),
            columns: table.column_names(),
            select_exprs: plan.select_exprs(),
            col_types: plan.read_types(),
            chunk_plan,
            order_by: Vec::new(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Read-only metadata queries against one database.
///
/// Nothing is cached: every call goes to the database.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Identity of the database behind this catalog.
    fn handle(&self) -> &DatabaseHandle;

    /// Base tables in a schema, with `is_file_table` set.
    ///
    /// Columns and keys are not loaded; use [`Catalog::describe_table`].
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>>;

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    /// Row count. May be approximate on engines that keep cheap statistics.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Primary key column names in key order, empty when there is none.
    async fn primary_keys(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Column definitions in ordinal order.
    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<Column>>;

    /// Column name to declared type.
    async fn column_types(&self, schema: &str, table: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .columns(schema, table)
            .await?
            .into_iter()
            .map(|c| (c.name, c.data_type))
            .collect())
    }

    /// Fresh snapshot of a table.
    async fn describe_table(&self, schema: &str, table: &str) -> Result<TableDescriptor> {
        let mut descriptor = TableDescriptor::named(schema, table);
        descriptor.columns = self.columns(schema, table).await?;
        descriptor.primary_key = self.primary_keys(schema, table).await?;
        descriptor.row_count = self.row_count(schema, table).await?;
        Ok(descriptor)
    }
}

/// Batches of one table read, fed by a background task.
///
/// The stream owns the producing task. When the channel closes, the task's
/// exit is checked: a panicked or aborted producer surfaces as a read error
/// rather than a clean end of stream. Dropping the stream aborts the task.
pub struct BatchStream {
    table: String,
    rx: mpsc::Receiver<Result<Batch>>,
    task: Option<JoinHandle<()>>,
}

impl BatchStream {
    /// Spawn `producer` with the sending half of a channel holding at most
    /// `capacity` batches.
    pub fn spawn<F, Fut>(table: impl Into<String>, capacity: usize, producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<Result<Batch>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(producer(tx));
        Self {
            table: table.into(),
            rx,
            task: Some(task),
        }
    }

    /// Next batch, or `None` once the producer has finished normally.
    pub async fn recv(&mut self) -> Option<Result<Batch>> {
        if let Some(next) = self.rx.recv().await {
            return Some(next);
        }

        let task = self.task.take()?;
        match task.await {
            Ok(()) => None,
            Err(e) if e.is_panic() => {
                Some(Err(MigrateError::read(&self.table, "reader task panicked")))
            }
            Err(e) => Some(Err(MigrateError::read(&self.table, e))),
        }
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Streams rows out of a source database.
pub trait SourceReader: Catalog {
    /// Start streaming a table.
    ///
    /// Batches arrive in order with `sequence_index` 0, 1, 2, ... A table
    /// with no rows yields exactly one empty batch. The channel is bounded,
    /// so a slow consumer slows the reader down.
    fn read_table(&self, opts: ReadOptions) -> BatchStream;
}

/// Writes into a destination database. Tables land in the schema of
/// [`Catalog::handle`].
#[async_trait]
pub trait TargetWriter: Catalog {
    /// Write one batch.
    ///
    /// Creates the destination schema if absent. With
    /// [`WriteMode::Replace`] the table is created if absent and emptied if
    /// present; [`WriteMode::Append`] only inserts. Returns rows written.
    async fn write_batch(
        &self,
        table: &TableDescriptor,
        plan: &AdaptationPlan,
        batch: &Batch,
        mode: WriteMode,
    ) -> Result<u64>;

    /// Replace NULLs in a column with the empty string. Returns rows changed.
    async fn coalesce_nulls(&self, schema: &str, table: &str, column: &str) -> Result<u64>;

    /// Add a primary key constraint over `columns`.
    async fn add_primary_key(&self, schema: &str, table: &str, columns: &[String]) -> Result<()>;
}
