//! Migration orchestrator - coordinates the table-by-table copy.

mod gate;
mod result;
mod table;

pub use gate::{AutoConfirm, ConfirmationGate};
pub use result::{ErrorLog, MigrationResult, TableOutcome, TableState};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{validate_policy, Config, MigrationConfig, SystemResources};
use crate::core::{Catalog, SourceReader, TableDescriptor, TargetWriter};
use crate::drivers::{MssqlSource, PostgresTarget};
use crate::error::Result;
use crate::progress::Progress;

use table::TableContext;

/// Runs a migration between one source and one destination.
pub struct Orchestrator {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    policy: MigrationConfig,
}

impl Orchestrator {
    /// Build an orchestrator over already-connected endpoints.
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        policy: MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            policy,
        }
    }

    /// Connect to the configured MSSQL source and PostgreSQL destination.
    ///
    /// Unset worker and pool sizes are derived from the host's resources.
    pub async fn connect(config: &Config) -> Result<Self> {
        let resources = SystemResources::detect();
        resources.log();

        let policy = config.migration.clone().with_auto_tuning(&resources);
        let max_source = policy.get_max_source_connections();
        let max_target = policy.get_max_target_connections();
        info!(
            "Workers: {}, source pool: {}, target pool: {}",
            policy.get_workers(),
            max_source,
            max_target
        );

        let source = MssqlSource::connect(&config.source, max_source as u32).await?;
        let target = PostgresTarget::connect(&config.target, max_target).await?;

        Ok(Self::new(Arc::new(source), Arc::new(target), policy))
    }

    pub fn policy(&self) -> &MigrationConfig {
        &self.policy
    }

    /// Tables a run would visit, in listing order.
    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let schema = &self.source.handle().schema;
        let tables = self.source.list_tables(schema).await?;
        Ok(filter_tables(tables, &self.policy))
    }

    /// Run the migration.
    ///
    /// Table failures are recorded in the result's error log and never abort
    /// the run. Returns `Err` only for run-level problems: an invalid policy
    /// or a source listing that cannot be produced.
    pub async fn migrate(
        &self,
        gate: &dyn ConfirmationGate,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        validate_policy(&self.policy)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        let prompt = format!(
            "Copy tables from {} to {}?",
            self.source.handle(),
            self.target.handle()
        );
        if !gate.confirm(&prompt, self.policy.confirm) {
            info!("Migration declined");
            return Ok(MigrationResult::declined(run_id, started_at));
        }

        info!("Starting migration run: {}", run_id);
        let tables = self.list_tables().await?;
        info!("Found {} tables to visit", tables.len());

        let progress = Progress::new(self.policy.verbosity);
        let ctx = TableContext {
            source: self.source.clone(),
            target: self.target.clone(),
            policy: Arc::new(self.policy.clone()),
            progress,
            cancel: cancel.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.policy.get_workers()));
        let mut jobs = Vec::with_capacity(tables.len());

        let mut remaining = tables.into_iter();
        for listed in remaining.by_ref() {
            let name = listed.full_name();
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                jobs.push((name, None));
                break;
            };

            let ctx = ctx.clone();
            let handle = tokio::spawn(async move {
                let outcome = ctx.run(listed).await;
                drop(permit);
                outcome
            });
            jobs.push((name, Some(handle)));
        }
        // Tables never handed to a worker.
        jobs.extend(remaining.map(|t| (t.full_name(), None)));

        let mut finished = Vec::with_capacity(jobs.len());
        for (name, handle) in jobs {
            let outcome = match handle {
                None => TableOutcome::new(name, TableState::Pending),
                Some(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("{}: task panicked - {}", name, e);
                        let mut outcome = TableOutcome::new(name, TableState::Failed);
                        outcome.error = Some(format!("Task panicked: {}", e));
                        outcome
                    }
                },
            };
            finished.push(outcome);
        }

        let result =
            MigrationResult::from_outcomes(run_id, started_at, finished, cancel.is_cancelled());
        progress.summary(
            result.tables_done,
            result.tables_skipped,
            result.tables_failed,
            result.rows_transferred,
            started.elapsed(),
        );

        Ok(result)
    }
}

/// Copy every eligible table from `source` to `dest` without prompting.
///
/// Returns the error log: empty when every visited table succeeded or was
/// skipped.
pub async fn migrate(
    source: Arc<dyn SourceReader>,
    dest: Arc<dyn TargetWriter>,
    policy: MigrationConfig,
) -> Result<ErrorLog> {
    let orchestrator = Orchestrator::new(source, dest, policy);
    let result = orchestrator
        .migrate(&AutoConfirm, CancellationToken::new())
        .await?;
    Ok(result.error_log)
}

/// Check that both configured endpoints accept connections.
pub async fn health_check(config: &Config) -> Result<()> {
    let source = MssqlSource::connect(&config.source, 1).await?;
    source.test_connection().await?;
    info!("Source OK: {}", source.handle());

    let target = PostgresTarget::connect(&config.target, 1).await?;
    target.test_connection().await?;
    info!("Target OK: {}", target.handle());

    Ok(())
}

/// Apply exclusions and the file-table policy, dropping duplicate listings.
fn filter_tables(tables: Vec<TableDescriptor>, policy: &MigrationConfig) -> Vec<TableDescriptor> {
    let mut seen = HashSet::new();
    tables
        .into_iter()
        .filter(|t| !policy.is_excluded(&t.schema, &t.name))
        .filter(|t| policy.include_file_tables || !t.is_file_table)
        .filter(|t| seen.insert(t.full_name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(name: &str, file_table: bool) -> TableDescriptor {
        let mut t = TableDescriptor::named("dbo", name);
        t.is_file_table = file_table;
        t
    }

    #[test]
    fn test_filter_tables_applies_exclusions_and_file_tables() {
        let policy = MigrationConfig {
            exclude_tables: vec!["Audit".into()],
            ..Default::default()
        };
        let tables = vec![
            listed("orders", false),
            listed("audit", false),
            listed("documents", true),
            listed("orders", false),
        ];

        let names: Vec<_> = filter_tables(tables, &policy)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["orders"]);
    }

    #[test]
    fn test_filter_tables_keeps_file_tables_when_enabled() {
        let policy = MigrationConfig {
            include_file_tables: true,
            ..Default::default()
        };
        let kept = filter_tables(vec![listed("documents", true)], &policy);
        assert_eq!(kept.len(), 1);
    }
}
