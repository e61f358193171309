use anyhow::Result;
use clap::Parser;
use ragsync::{Config, Indexer, SyncMode};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ragsync")]
#[command(about = "Sync a knowledge source into a vector collection (incremental by default)")]
struct Args {
    /// Job run name recorded in the job status store (defaults to a random UUID)
    #[arg(long)]
    run_name: Option<String>,

    /// Also delete vectors for chunks the source no longer produces
    #[arg(long)]
    full: bool,

    /// Compute and print the plan without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Source: {}", config.knowledge_source.fqn());
    log::info!("Collection: {}", config.indexer.collection_name);

    let mut indexer = Indexer::from_config(&config).await?;
    if args.full {
        indexer = indexer.with_sync_mode(SyncMode::Full);
    }

    // Ctrl-C stops the run at the next batch boundary
    let cancel = indexer.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; stopping after the current batch");
            cancel.cancel();
        }
    });

    let start = Instant::now();

    if args.dry_run {
        let plan = indexer.dry_run().await?;
        println!("to_insert: {}", plan.to_insert.len());
        println!("to_delete: {}", plan.to_delete.len());
        println!("unchanged: {}", plan.unchanged.len());
        return Ok(());
    }

    let run_name = args.run_name.unwrap_or_else(|| format!("ragsync-{}", uuid::Uuid::new_v4()));
    log::info!("Starting run {}", run_name);

    let report = indexer.index_collection(&run_name).await?;

    log::info!("=== Sync Complete ===");
    log::info!("Stored before run: {}", report.existing);
    log::info!("Inserted: {}", report.inserted);
    log::info!("Deleted: {}", report.deleted);
    log::info!("Unchanged (skipped): {}", report.unchanged);
    log::info!("Time: {:?}", start.elapsed());

    Ok(())
}
