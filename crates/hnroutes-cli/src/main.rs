use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hnroutes_storage::RecordStore;
use hnroutes_sync::{MergeStore, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hnroutes")]
#[command(about = "Hainan Airlines route listing mirror")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every source once and merge into the store.
    Sync,
    /// Serve the JSON query API with the refresh scheduler.
    Serve,
    /// Recompute provinces of stored flights without fetching.
    Reclassify,
    /// Print the province a city name resolves to.
    Classify { city: String },
    /// Print cities that resolve to no province, as JSON.
    Missing,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = hnroutes_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} sources={}/{} rows={} new={} total={}",
                summary.run_id,
                summary.sources_succeeded,
                summary.sources_attempted,
                summary.rows_extracted,
                summary.new_flights,
                summary.total_flights
            );
        }
        Commands::Serve => hnroutes_web::serve_from_env().await?,
        Commands::Reclassify => {
            let config = SyncConfig::from_env();
            let merge = MergeStore::from_config(&config).await?;
            let set = merge.reclassify().await?;
            println!(
                "reclassified {} flights (last_update {})",
                set.total_flights, set.last_update
            );
        }
        Commands::Classify { city } => {
            println!("{}", hnroutes_core::classify(&city));
        }
        Commands::Missing => {
            let config = SyncConfig::from_env();
            let set = RecordStore::new(config.data_file)
                .read()
                .await
                .into_record_set();
            let report = hnroutes_web::missing_cities(&set.flights);
            let json = serde_json::to_string_pretty(&report).context("encoding report")?;
            println!("{json}");
        }
    }

    Ok(())
}
