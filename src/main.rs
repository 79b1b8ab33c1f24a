//! Spindle main entry point
//!
//! Command-line glue over the SQLite backend: start crawls, run workers and
//! inspect or repair crawl state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use spindle::config::{load_config_with_hash, validate, Config};
use spindle::state::print_statistics;
use spindle::{CrawlContext, CrawlMaintenance, CrawlStarter, CrawlStatistics, Worker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Spindle: a distributed crawl coordinator
///
/// Workers share crawl state and the job queue through one SQLite database,
/// so any number of `spindle work` processes on a host can serve the same
/// crawls.
#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(version)]
#[command(about = "A distributed crawl coordinator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a crawl and enqueue its seed jobs
    Start {
        /// Base url of the crawl
        url: String,

        /// Explicit crawl id (generated when omitted)
        #[arg(long)]
        crawl_id: Option<String>,

        /// Maximum depth
        #[arg(long)]
        depth_limit: Option<u32>,

        /// Maximum number of pages fetched
        #[arg(long)]
        crawl_limit: Option<u64>,
    },

    /// Process crawl jobs
    Work {
        /// Exit once the crawl queue is empty instead of polling
        #[arg(long)]
        until_idle: bool,

        /// Number of concurrent workers in this process
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },

    /// Show the statistics of one crawl
    Status {
        crawl_id: String,
    },

    /// Show crawl queue depth and failed job count
    Stats,

    /// List failed crawl jobs
    Failed {
        /// Only jobs of this crawl
        #[arg(long)]
        crawl_id: Option<String>,
    },

    /// Requeue the failed jobs of a crawl
    Requeue {
        crawl_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = load(cli.config.as_deref())?;
    let backend = Arc::new(
        spindle::storage::open_backend(Path::new(&config.storage.database_path))
            .with_context(|| format!("opening {}", config.storage.database_path))?,
    );
    let ctx = Arc::new(
        CrawlContext::with_backend(backend, config.worker.clone())
            .context("building crawl context")?,
    );

    match cli.command {
        Command::Start {
            url,
            crawl_id,
            depth_limit,
            crawl_limit,
        } => {
            let mut options = config.crawl.clone();
            options.crawl_id = crawl_id.or(options.crawl_id);
            options.depth_limit = depth_limit.or(options.depth_limit);
            options.crawl_limit = crawl_limit.or(options.crawl_limit);

            let request = CrawlStarter::new(ctx).start(&url, options).await?;
            println!("{}", request.crawl_id);
        }
        Command::Work {
            until_idle,
            workers,
        } => handle_work(ctx, until_idle, workers.max(1)).await?,
        Command::Status { crawl_id } => {
            let stats = CrawlStatistics::load(&ctx.crawl_state(&crawl_id)).await?;
            print_statistics(&stats);
        }
        Command::Stats => {
            let stats = maintenance(&ctx).stats().await?;
            println!("Queued: {}", stats.queued);
            println!("Failed: {}", stats.failed);
        }
        Command::Failed { crawl_id } => {
            let maintenance = maintenance(&ctx);
            let records = match crawl_id {
                Some(id) => maintenance.failed_jobs_for_crawl(&id).await?,
                None => maintenance.failed_jobs().await?,
            };
            for record in &records {
                println!(
                    "{}  {}  {}  {}",
                    record.failed_at.to_rfc3339(),
                    record.crawl_id().unwrap_or("-"),
                    record
                        .payload
                        .get("url")
                        .and_then(|u| u.as_str())
                        .unwrap_or("-"),
                    record.error
                );
            }
            println!("{} failed job(s)", records.len());
        }
        Command::Requeue { crawl_id } => {
            let count = maintenance(&ctx).requeue_failed_jobs(&crawl_id).await?;
            println!("Requeued {} job(s)", count);
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("spindle=info,warn"),
            1 => EnvFilter::new("spindle=debug,info"),
            2 => EnvFilter::new("spindle=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    };

    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);
    Ok(config)
}

fn maintenance(ctx: &CrawlContext) -> CrawlMaintenance {
    CrawlMaintenance::new(ctx.queue.clone(), &ctx.worker.crawl_queue)
}

/// Runs `count` workers until the queue drains or Ctrl-C
async fn handle_work(ctx: Arc<CrawlContext>, until_idle: bool, count: usize) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let worker = Worker::new(ctx.clone());
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if until_idle {
                worker.run_until_idle().await.map(|events| events.len())
            } else {
                worker.run(shutdown).await.map(|_| 0)
            }
        }));
    }

    if !until_idle {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down workers");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let mut processed = 0;
    for handle in handles {
        processed += handle.await.context("worker task failed")??;
    }
    if until_idle {
        tracing::info!("Queue drained after {} job(s)", processed);
    }
    Ok(())
}
