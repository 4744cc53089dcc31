use anyhow::Result;
use clap::{Parser, Subcommand};
use pq_dashboard::db::{self, QueueRepository, StorageError};
use pq_dashboard::{cli, config, http};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Debug, Parser)]
#[command(
    name = "pq-dashboard",
    author,
    version,
    about = "Web dashboard and CLI utility for managing pq queues"
)]
struct Args {
    /// Path to YAML config file (default: .pq-dash.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// IP or hostname for the server
    #[arg(long)]
    host: Option<String>,

    /// Port for the server to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Print an annotated example config and exit
    #[arg(long)]
    print_example_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show queue statistics
    Stats {
        /// Comma-separated queue names (default: all queues)
        queues: Option<String>,
    },
    /// Clean up processed items from one or more queues
    Cleanup {
        /// Comma-separated queue names
        #[arg(required = true)]
        queues: Vec<String>,
    },
    /// Cancel queued items from one or more queues
    CancelAll {
        /// Comma-separated queue names
        #[arg(required = true)]
        queues: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example_config {
        print!("{}", config::example());
        return Ok(ExitCode::SUCCESS);
    }
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        cfg.server.host = host;
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }

    let pool = db::init_pool(&cfg.database.url, cfg.acquire_timeout())?;
    let table = cfg.table()?;
    let queues = QueueRepository::new(pool.clone(), table);

    let report = match args.command {
        None => {
            let state = http::AppState::new(pool, cfg)?;
            http::serve(state).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Some(Command::Stats { queues: names }) => {
            cli::show_stats(&queues, &cli::split_names(names)).await
        }
        Some(Command::Cleanup { queues: names }) => {
            cli::cleanup(&queues, &cli::split_names(names)).await
        }
        Some(Command::CancelAll { queues: names }) => {
            cli::cancel_all(&queues, &cli::split_names(names)).await
        }
    };

    match report {
        Ok(text) => {
            println!();
            print!("{text}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err @ StorageError::Unavailable(_)) => {
            error!(?err, "storage unavailable");
            eprintln!();
            eprintln!("Error: Unable to connect to the queue database");
            eprintln!();
            eprintln!("{err}");
            eprintln!("Check your configuration");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}
