//! # dbms-migrate
//!
//! Table-by-table migration from Microsoft SQL Server to PostgreSQL.
//!
//! Each eligible source table is copied to the destination schema:
//!
//! - **Skip or replace**: tables already present at the destination are
//!   skipped unless updates are enabled, in which case they are truncated
//!   and reloaded
//! - **Chunked reads** for large tables, with a memory governor that splits
//!   oversized batches before they are written
//! - **Type adaptation** for hierarchyid, geometry/geography and large
//!   binary columns
//! - **Primary key propagation** once the data is in place
//! - **Fault isolation**: a failing table lands in the [`ErrorLog`] and the
//!   run moves on
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbms_migrate::{AutoConfirm, Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> dbms_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::connect(&config).await?;
//!     let result = orchestrator
//!         .migrate(&AutoConfirm, CancellationToken::new())
//!         .await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod adapt;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod governor;
pub mod keys;
pub mod orchestrator;
pub mod progress;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig, Verbosity};
pub use core::{
    Batch, BatchStream, Catalog, Column, DatabaseHandle, Dialect, ReadOptions, SourceReader,
    SqlValue, TableDescriptor, TargetWriter, WriteMode,
};
pub use error::{MigrateError, Result};
pub use keys::{propagate_primary_key, KeyOutcome};
pub use orchestrator::{
    health_check, migrate, AutoConfirm, ConfirmationGate, ErrorLog, MigrationResult,
    Orchestrator, TableOutcome, TableState,
};
