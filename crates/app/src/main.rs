use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trimatch::{commands, AppConfig};
use trimatch_ingest::{HttpAugmenter, IntakePipeline};
use trimatch_reconcile::ReconcileEngine;

#[derive(Parser)]
#[command(
    name = "trimatch",
    about = "Procurement document intake and three-way reconciliation",
    version
)]
struct Cli {
    /// TOML config: tolerances, FX table, optional augmentation service.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path (overrides the config file).
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every .txt document in a folder. Safe to re-run: identical
    /// content is skipped.
    Ingest { folder: PathBuf },
    /// Watch a folder and ingest new documents as they appear.
    Watch { folder: PathBuf },
    /// Re-derive reconciliation results for every PO in the store.
    Reconcile,
    /// Print KPIs and the vendor summary.
    Report {
        /// Also list every non-MATCH result.
        #[arg(long)]
        exceptions: bool,
    },
    /// Show the source → record → results chain for one invoice number.
    Audit { invoice_number: String },
    /// Export the reconciliation table to CSV.
    Export {
        #[arg(long, default_value = "reconciliation.csv")]
        out: PathBuf,
    },
}

fn build_pipeline(config: &AppConfig) -> anyhow::Result<IntakePipeline<HttpAugmenter>> {
    Ok(match &config.augment {
        Some(augment) => IntakePipeline::with_augmenter(
            config.tolerances.clone(),
            HttpAugmenter::new(augment.clone())?,
            Duration::from_secs(augment.timeout_secs),
        ),
        None => IntakePipeline::deterministic(config.tolerances.clone()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "trimatch=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let db = trimatch_storage::create_db(&config.db_path(cli.db.as_deref())).await?;

    match cli.command {
        Command::Ingest { folder } => {
            let pipeline = Arc::new(build_pipeline(&config)?);
            let stats = commands::ingest_folder(&db, pipeline, &folder).await?;
            println!(
                "Ingested {} ({} duplicates, {} unknown, {} incomplete, {} skipped, {} errors)",
                stats.ingested,
                stats.duplicates,
                stats.unknown,
                stats.incomplete,
                stats.skipped,
                stats.errors
            );
        }
        Command::Watch { folder } => {
            let pipeline = Arc::new(build_pipeline(&config)?);
            commands::watch_folder(&db, pipeline, &folder).await?;
        }
        Command::Reconcile => {
            let engine = ReconcileEngine::new(config.tolerances.clone());
            let stats = commands::reconcile_all(&db, &engine).await?;
            println!(
                "Reconciled {} POs: {} results, {} exceptions",
                stats.po_count, stats.results, stats.exceptions
            );
        }
        Command::Report { exceptions } => {
            commands::print_report(&db, exceptions).await?;
        }
        Command::Audit { invoice_number } => {
            commands::print_audit(&db, &invoice_number).await?;
        }
        Command::Export { out } => {
            let rows = commands::export_results_csv(&db, &out).await?;
            println!("Wrote {} rows to {}", rows, out.display());
        }
    }

    Ok(())
}
