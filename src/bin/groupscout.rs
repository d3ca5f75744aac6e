//! groupscout CLI
//!
//! Usage:
//!   groupscout run [--iterations N]     Crawl scheduled keywords until Ctrl+C
//!   groupscout discover <topic> [--json]
//!   groupscout sweep [--once]           Re-check joined groups
//!   groupscout sync                     Mark every group in the dialog list as joined
//!   groupscout preview [--limit N]      Show upcoming round-robin keywords
//!
//! Environment variables (see `.env`):
//!   SCOUT_GATEWAY_URL - Protocol bridge base URL (required except for `preview`)
//!   SCOUT_DB_PATH - SQLite database path (default: groupscout.db)
//!   SCOUT_LLM_URL / SCOUT_LLM_API_KEY - Optional keyword suggester
//!   RUST_LOG - Log filter (default: info)

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use groupscout::discovery::{DiscoveryOutcome, DiscoveryStatus};
use groupscout::scheduler::QueryScheduler;
use groupscout::store::{SqliteStore, Store};
use groupscout::telegram::{HttpGatewayClient, ProtocolClient};
use groupscout::{AppConfig, Runtime};
use log::{error, info};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "groupscout", about = "Discover and track public chat groups", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl scheduled keywords until shutdown
    Run {
        /// Stop after this many batches
        #[arg(long)]
        iterations: Option<usize>,
    },
    /// Find the best matching group for a topic, handle or link
    Discover {
        topic: String,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-check membership of every joined group
    Sweep {
        /// Run a single sweep instead of looping
        #[arg(long)]
        once: bool,
    },
    /// Sync local membership with the account's dialog list
    Sync,
    /// Show the next keywords of the round-robin fallback
    Preview {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    info!("🚀 groupscout {}", env!("CARGO_PKG_VERSION"));
    info!("   └─ Database: {}", config.db_path);

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.db_path)?);

    if let Command::Preview { limit } = cli.command {
        let scheduler = QueryScheduler::new(store, config.scheduler.clone());
        for (i, keyword) in scheduler.preview(limit).iter().enumerate() {
            println!("{:>3}. {}", i + 1, keyword);
        }
        return Ok(());
    }

    let gateway_url = config.require_gateway_url()?.to_string();
    let client: Arc<dyn ProtocolClient> = Arc::new(HttpGatewayClient::new(&config.gateway, &gateway_url)?);
    info!("   └─ Gateway: {}", gateway_url);

    let runtime = Runtime::new(config, client, store);
    runtime.control.install_ctrl_c_handler();

    match cli.command {
        Command::Run { iterations } => {
            let mut crawler = runtime.crawler();
            crawler.run(iterations).await;
        }
        Command::Discover { topic, json } => {
            let mut pipeline = runtime.discovery();
            match pipeline.discover(&topic).await {
                Ok(outcome) if json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => {
                    error!("❌ Discovery failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Command::Sweep { once } => {
            runtime.tracker().run(once).await?;
        }
        Command::Sync => {
            let report = runtime.tracker().sync_joined().await?;
            println!("{} groups in dialogs, {} newly marked joined", report.seen, report.newly_joined);
        }
        Command::Preview { .. } => {}
    }

    info!("👋 Shutdown complete");
    Ok(())
}

fn print_outcome(outcome: &DiscoveryOutcome) {
    let status = match outcome.status {
        DiscoveryStatus::Found => "FOUND",
        DiscoveryStatus::Ambiguous => "AMBIGUOUS",
        DiscoveryStatus::NotFound => "NOT FOUND",
    };
    println!("{}: {}", status, outcome.topic);

    if let Some(best) = &outcome.best {
        println!(
            "  best: {} [{:?}, {:.2}] via '{}'",
            best.candidate.label(),
            best.confidence,
            best.score,
            best.matched_query
        );
    }

    for alt in &outcome.alternatives {
        println!("  alt:  {} [{:.2}]", alt.candidate.label(), alt.score);
    }

    if outcome.status == DiscoveryStatus::NotFound {
        println!("  queries tried: {}", outcome.queries.join(", "));
        let failures = outcome.attempts.iter().filter(|a| a.is_failed()).count();
        if failures > 0 {
            println!("  failed attempts: {}", failures);
        }
    }
}
