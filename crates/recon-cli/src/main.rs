use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use recon_sync::{RetentionCleaner, SyncConfig};

#[derive(Debug, Parser)]
#[command(name = "recon-cli")]
#[command(about = "Patient roster reconciliation command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enrich and reconcile every registered tenant once.
    Sync,
    /// Apply the retention policy to every registered tenant.
    Cleanup {
        /// Report what would be removed without removing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print latest-run aggregates per tenant.
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = recon_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} tenants={} failed_tenants={} candidates={} inserted={} updated={} skipped={} failed={} lookup_failures={}",
                summary.run_id,
                summary.tenant_count,
                summary.failed_tenants.len(),
                summary.candidates_seen,
                summary.stats.inserted,
                summary.stats.updated,
                summary.stats.skipped,
                summary.stats.failed,
                summary.lookup_failures,
            );
        }
        Commands::Cleanup { dry_run } => {
            let cleaner = RetentionCleaner::new(SyncConfig::from_env());
            if dry_run {
                let previews = cleaner.preview_all().await?;
                println!("cleanup dry run, cutoff={}", cleaner.cutoff());
                for preview in previews {
                    println!(
                        "  tenant={} single_visit_deletable={} multi_visit_candidates={}",
                        preview.tenant_id,
                        preview.stats.single_visit_deletable,
                        preview.stats.multi_visit_candidates,
                    );
                }
            } else {
                let report = cleaner.cleanup_all().await?;
                println!(
                    "cleanup complete: cutoff={} failed_tenants={}",
                    report.cutoff,
                    report.failed_tenants.len()
                );
                for tenant in report.tenants {
                    println!(
                        "  tenant={} deleted={} cleaned={} pruned_visits={}",
                        tenant.tenant_id,
                        tenant.deleted_single_visit,
                        tenant.cleaned_records,
                        tenant.pruned_visits,
                    );
                }
            }
        }
        Commands::Report => {
            let reports = recon_sync::report_all(&SyncConfig::from_env()).await?;
            for (tenant_id, row) in reports {
                match row {
                    Some(row) => println!(
                        "tenant={} latest_run={} rows={} with_identity={} with_history={} total_visits={}",
                        tenant_id,
                        row.latest_run,
                        row.total_rows,
                        row.with_identity,
                        row.with_history,
                        row.total_visits,
                    ),
                    None => println!("tenant={} no reconciliation rows yet", tenant_id),
                }
            }
        }
    }

    Ok(())
}
