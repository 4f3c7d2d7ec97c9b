//! dbms-migrate CLI - table-by-table MSSQL to PostgreSQL migration.

mod output;
mod prompt;

use clap::{Parser, Subcommand};
use dbms_migrate::drivers::MssqlSource;
use dbms_migrate::{
    health_check, AutoConfirm, Config, ConfirmationGate, MigrateError, MigrationResult,
    Orchestrator, Verbosity,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when the run finished but some tables failed.
const EXIT_TABLES_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "dbms-migrate")]
#[command(about = "Copy tables from MSSQL to PostgreSQL, one table at a time")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log level: debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Progress detail: off, summary, per-table, per-step [default: from config]
    #[arg(long)]
    verbosity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every eligible table to the destination
    Run {
        /// Start without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Reload tables that already exist at the destination
        #[arg(long)]
        update: bool,

        /// Skip a table (bare name or schema.table); repeatable
        #[arg(long, value_name = "TABLE")]
        exclude: Vec<String>,

        /// Include MSSQL FileTables
        #[arg(long)]
        include_file_tables: bool,

        /// Rows per read chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Number of tables copied concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Write the table error log to this file as JSON
        #[arg(long, value_name = "PATH")]
        error_log: Option<PathBuf>,
    },

    /// Show the tables a run would visit
    ListTables,

    /// Test database connections
    HealthCheck,

    /// Print a source spatial column as Well-Known Text, one row per line
    SpatialWkt {
        /// Table in the configured source schema
        #[arg(long)]
        table: String,

        /// Geometry or geography column
        #[arg(long)]
        column: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    if let Some(ref v) = cli.verbosity {
        config.migration.verbosity = Verbosity::parse(v)
            .ok_or_else(|| MigrateError::Config(format!("Unknown verbosity: {}", v)))?;
    }

    match cli.command {
        Commands::Run {
            yes,
            update,
            exclude,
            include_file_tables,
            chunk_size,
            workers,
            error_log,
        } => {
            // Apply overrides
            if update {
                config.migration.update = true;
            }
            config.migration.exclude_tables.extend(exclude);
            if include_file_tables {
                config.migration.include_file_tables = true;
            }
            if let Some(size) = chunk_size {
                config.migration.chunk_size = Some(size);
            }
            if let Some(w) = workers {
                config.migration.workers = Some(w);
            }
            if yes {
                config.migration.confirm = false;
            }

            let cancel = setup_signal_handler();
            let orchestrator = Orchestrator::connect(&config).await?;

            let gate: &dyn ConfirmationGate = if yes { &AutoConfirm } else { &prompt::PromptGate };
            let result = orchestrator.migrate(gate, cancel).await?;

            if let Some(ref path) = error_log {
                output::save_json(path, &result.error_log)?;
                info!("Error log written to {:?}", path);
            }

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result);
            }

            return Ok(exit_code_for(&result));
        }

        Commands::ListTables => {
            let orchestrator = Orchestrator::connect(&config).await?;
            let tables = orchestrator.list_tables().await?;

            if cli.output_json {
                let names: Vec<String> = tables.iter().map(|t| t.full_name()).collect();
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for table in &tables {
                    println!("{}", table.full_name());
                }
                println!("\n{} tables", tables.len());
            }
        }

        Commands::SpatialWkt { table, column } => {
            let source = MssqlSource::connect(&config.source, 1).await?;
            let values = source
                .read_column_wkt(&config.source.schema, &table, &column)
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for value in &values {
                    println!("{}", value.as_deref().unwrap_or("NULL"));
                }
            }
        }

        Commands::HealthCheck => {
            health_check(&config).await?;
            if cli.output_json {
                println!("{}", serde_json::json!({ "healthy": true }));
            } else {
                println!("Source (MSSQL): OK");
                println!("Target (PostgreSQL): OK");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_summary(result: &MigrationResult) {
    if result.status == "declined" {
        println!("Migration declined; nothing was copied.");
        return;
    }

    let headline = match result.status.as_str() {
        "cancelled" => "Migration cancelled.",
        "completed_with_errors" => "Migration completed with errors.",
        _ => "Migration completed!",
    };
    println!("\n{}", headline);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {} done, {} skipped, {} failed, {} pending",
        result.tables_done, result.tables_skipped, result.tables_failed, result.tables_pending
    );
    println!("  Rows: {}", result.rows_transferred);
    for outcome in result.outcomes.iter().filter(|o| !o.deferred_columns.is_empty()) {
        println!(
            "  {}: spatial columns left as bytes ({}); see spatial-wkt",
            outcome.table,
            outcome.deferred_columns.join(", ")
        );
    }
    if !result.error_log.is_empty() {
        println!("  Failed tables:");
        for (table, error) in &result.error_log {
            println!("    {}: {}", table, error);
        }
    }
}

fn exit_code_for(result: &MigrationResult) -> ExitCode {
    if result.status == "cancelled" {
        ExitCode::from(MigrateError::Cancelled.exit_code())
    } else if !result.error_log.is_empty() {
        ExitCode::from(EXIT_TABLES_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}

fn setup_logging(level: &str, format: &str) {
    let level = match level.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// Tables in flight stop at their next batch boundary; tables not yet
/// started stay pending.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current batches...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Could not install {} handler: {}", name, e),
        }
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batches...");
            token.cancel();
        }
    });

    cancel_token
}
