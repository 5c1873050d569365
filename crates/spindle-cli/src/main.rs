//! spindle CLI - operator interface to a spindle queue.

mod producer;
mod sink;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spindle_core::config::SpindleConfig;
use spindle_core::domain::FeedItem;
use spindle_core::ports::Producer;
use spindle_core::queue::{EnqueueReport, QueueHandle, QueueRegistry, enqueue_from};
use spindle_core::worker::{Worker, WorkerGroup};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::producer::{JsonFileProducer, SampleProducer, Source};
use crate::sink::JsonLinesSink;

#[derive(Parser)]
#[command(name = "spindle", about = "Durable lease-based work queue")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and SPINDLE_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Queue name (overrides config and SPINDLE_QUEUE)
    #[arg(long, global = true)]
    queue: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a single item
    Enqueue {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: Option<String>,
    },
    /// Enqueue numbered sample items
    Sample {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Enqueue a JSON array of {title, body} objects (`-` reads stdin)
    Import { source: String },
    /// Show item counts by state
    Count,
    /// List every item with its state
    List,
    /// Run one worker tick into a JSON-lines file
    Drain {
        #[arg(long, default_value = "spindle-records.jsonl")]
        sink_file: PathBuf,
    },
    /// Run periodic workers until Ctrl-C
    Run {
        #[arg(long, default_value = "spindle-records.jsonl")]
        sink_file: PathBuf,
    },
    /// Delete every item in the queue
    DeleteQueue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let config = load_config(&cli)?;
    let registry = QueueRegistry::sqlite(&config.database)
        .with_context(|| format!("opening {}", config.database.display()))?
        .with_default_lease(config.lease());
    let queue = registry.open(&config.queue)?;

    match cli.command {
        Command::Enqueue { title, body } => {
            let before = queue.number_of_items().await?;
            let id = queue
                .create_item(FeedItem {
                    title: Some(title),
                    body,
                })
                .await?;
            let after = queue.number_of_items().await?;
            println!("created {id}");
            print_report(
                &queue,
                EnqueueReport {
                    before,
                    added: 1,
                    after,
                },
            );
        }
        Command::Sample { count } => cmd_enqueue(&SampleProducer::new(count), &queue).await?,
        Command::Import { source } => {
            let producer = JsonFileProducer::new(Source::from_arg(&source));
            cmd_enqueue(&producer, &queue).await?;
        }
        Command::Count => {
            let counts = queue.counts().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::List => cmd_list(&queue).await?,
        Command::Drain { sink_file } => cmd_drain(&config, queue, sink_file).await?,
        Command::Run { sink_file } => cmd_run(&config, queue, sink_file).await?,
        Command::DeleteQueue => {
            let before = queue.number_of_items().await?;
            queue.delete_queue().await?;
            let after = queue.number_of_items().await?;
            println!(
                "The queue \"{}\" has been deleted ({before} items before, {after} after).",
                queue.name()
            );
        }
    }
    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("could not install tracing subscriber: {e}"))
}

fn load_config(cli: &Cli) -> anyhow::Result<SpindleConfig> {
    let mut config = SpindleConfig::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(queue) = &cli.queue {
        config.queue = queue.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_report(queue: &QueueHandle, report: EnqueueReport) {
    println!(
        "The queue \"{}\" had {} items. Added {}. Now it has {} items.",
        queue.name(),
        report.before,
        report.added,
        report.after
    );
}

async fn cmd_enqueue(producer: &dyn Producer, queue: &QueueHandle) -> anyhow::Result<()> {
    let report = enqueue_from(producer, queue).await?;
    print_report(queue, report);
    Ok(())
}

async fn cmd_list(queue: &QueueHandle) -> anyhow::Result<()> {
    let items = queue.list_items().await?;
    if items.is_empty() {
        println!("No items.");
        return Ok(());
    }
    println!("{:<12} {:<14} {:>8}  TITLE", "ID", "STATE", "ATTEMPTS");
    for listed in items {
        let state = serde_json::to_value(listed.state)?;
        let title = listed.item.payload["title"].as_str().unwrap_or("-");
        println!(
            "{:<12} {:<14} {:>8}  {}",
            listed.item.id.to_string(),
            state.as_str().unwrap_or("?"),
            listed.item.attempts,
            title
        );
    }
    Ok(())
}

async fn open_worker(
    config: &SpindleConfig,
    queue: QueueHandle,
    sink_file: PathBuf,
) -> anyhow::Result<(Worker, Arc<JsonLinesSink>)> {
    let sink = Arc::new(
        JsonLinesSink::open(&sink_file)
            .await
            .with_context(|| format!("opening sink {}", sink_file.display()))?,
    );
    let worker = Worker::with_config(queue, sink.clone(), config.worker_config());
    Ok((worker, sink))
}

async fn cmd_drain(
    config: &SpindleConfig,
    queue: QueueHandle,
    sink_file: PathBuf,
) -> anyhow::Result<()> {
    let (worker, sink) = open_worker(config, queue, sink_file).await?;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let report = worker.tick(&shutdown_rx).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("sink holds {} records", sink.recorded().await);
    Ok(())
}

async fn cmd_run(
    config: &SpindleConfig,
    queue: QueueHandle,
    sink_file: PathBuf,
) -> anyhow::Result<()> {
    let (worker, _sink) = open_worker(config, queue, sink_file).await?;
    let interval = config.tick_interval();
    let group = WorkerGroup::spawn(config.worker.workers, worker, interval);
    info!(
        workers = config.worker.workers,
        interval_secs = interval.as_secs(),
        "workers started, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    let totals = group.shutdown_and_join().await;
    println!("{}", serde_json::to_string_pretty(&totals)?);
    Ok(())
}
