//! workpool CLI: operator interface to the work-queue store.

use clap::{Parser, Subcommand};
use workpool::config::Config;
use workpool::db::Db;
use workpool::engine::{ReclaimConfig, Reclaimer};
use workpool::telemetry::{TelemetryConfig, init_telemetry};
use workpool::{NewWork, Partition, PartitionStore, Record, WorkQueue};

#[derive(Parser)]
#[command(name = "workpool", about = "Persistent partitioned work queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reclamation loop until interrupted
    Serve,
    /// Add a work item to the pending partition
    Enqueue {
        /// Work kind
        kind: String,
        /// JSON object with work parameters
        #[arg(long)]
        data: Option<String>,
    },
    /// Lease pending work into the in-progress partition
    Lease {
        /// Maximum items to lease
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Retire a leased item with its result
    Complete {
        /// Work item id
        id: String,
        /// JSON object with the result
        #[arg(long)]
        data: Option<String>,
    },
    /// Show a completed result
    Show {
        /// Work item id
        id: String,
    },
    /// Print partition counts
    Stats,
    /// Run one reclamation sweep and exit
    Sweep,
    /// List records in a partition
    List {
        /// Partition name
        partition: String,
        /// Maximum records to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workpool".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::open(&config.db_path)?;
    let queue = WorkQueue::new(PartitionStore::new(db), config.partitions.clone());

    match cli.command {
        Command::Serve => cmd_serve(&queue, &config).await,
        Command::Enqueue { kind, data } => {
            let data = parse_object(data)?;
            let ids = queue.enqueue(vec![NewWork::new(kind, data)]).await?;
            for id in ids {
                println!("{id}");
            }
            Ok(())
        }
        Command::Lease { count } => {
            let leased = queue.lease(count).await?;
            if leased.is_empty() {
                println!("No pending work.");
            }
            for record in &leased {
                print_record(record)?;
            }
            Ok(())
        }
        Command::Complete { id, data } => {
            let data = parse_object(data)?;
            queue.complete(vec![(id.clone(), data)]).await?;
            println!("Completed: {id}");
            Ok(())
        }
        Command::Show { id } => match queue.inspect(&id).await? {
            Some(record) => print_record(&record),
            None => anyhow::bail!("no completed result for '{id}'"),
        },
        Command::Stats => {
            let stats = queue.stats().await?;
            println!("pending:     {}", stats.pending);
            println!("in_progress: {}", stats.in_progress);
            println!("completed:   {}", stats.completed);
            Ok(())
        }
        Command::Sweep => {
            let reclaimer = reclaimer_for(&queue, &config);
            let report = reclaimer.run_once().await;
            for (partition, n) in &report.reclaimed {
                println!("{partition}: {n} stale");
            }
            if report.failures > 0 {
                anyhow::bail!("{} reclamation policies failed, see log", report.failures);
            }
            Ok(())
        }
        Command::List { partition, limit } => cmd_list(&queue, &partition, limit).await,
    }
}

fn reclaimer_for(queue: &WorkQueue, config: &Config) -> Reclaimer {
    Reclaimer::new(
        queue.store().clone(),
        queue.reclaim_policies(config.reclaim_max_age),
        ReclaimConfig {
            interval: config.reclaim_interval,
        },
    )
}

async fn cmd_serve(queue: &WorkQueue, config: &Config) -> anyhow::Result<()> {
    let handle = reclaimer_for(queue, config).spawn();
    let stats = queue.stats().await?;
    tracing::info!(
        pending = stats.pending,
        in_progress = stats.in_progress,
        completed = stats.completed,
        "workpool serving"
    );

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await?;
    Ok(())
}

async fn cmd_list(queue: &WorkQueue, partition: &str, limit: usize) -> anyhow::Result<()> {
    let partition: Partition = partition.parse()?;
    let store = queue.store();
    let mut cursor = store.cursor(&partition).page_size(limit.max(1));

    println!("{:<24}  {:<20}  PAYLOAD", "ID", "CREATED");
    println!("{}", "-".repeat(80));
    let mut shown = 0;
    while shown < limit {
        let Some(record) = cursor.next().await? else {
            break;
        };
        println!(
            "{:<24}  {:<20}  {}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.payload
        );
        shown += 1;
    }
    println!("\n{shown} of {} record(s)", store.count(&partition).await?);
    Ok(())
}

fn parse_object(raw: Option<String>) -> anyhow::Result<serde_json::Value> {
    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(serde_json::json!({})),
    }
}

fn print_record(record: &Record) -> anyhow::Result<()> {
    println!("ID:        {}", record.id);
    println!("Partition: {}", record.partition);
    println!("Created:   {}", record.created_at);
    println!(
        "Payload:   {}",
        serde_json::to_string_pretty(&record.payload)?
    );
    Ok(())
}
