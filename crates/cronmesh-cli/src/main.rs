mod init;
mod jobs;
mod logs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cronmesh_config::CronMeshConfig;
use cronmesh_types::Response;

#[derive(Parser)]
#[command(name = "cronmesh", about = "Distributed cron job model and execution log tool")]
struct Cli {
    /// Config file (defaults to ~/.cronmesh/config.json5)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log store database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the next trigger instants of a cron expression
    Plan {
        /// Cron expression (e.g. "*/5 * * * * *")
        #[arg(short, long)]
        cron: String,

        /// Number of instants to show
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// Validate a job definition payload as stored in the coordination layer
    Check {
        /// JSON payload with name, command, cronExpr and optional workIp
        payload: String,
    },
    /// List execution logs of a job, most recent first
    Logs {
        /// Job name (empty string lists every job)
        name: String,

        /// Records to skip
        #[arg(long, default_value_t = 0)]
        skip: u64,

        /// Records to return (0 returns everything)
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Delete every execution log of a job
    Purge {
        /// Job name
        name: String,
    },
    /// Import a JSON array of log records through the batching sink
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Check the log store and print the effective configuration
    Health,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => cronmesh_config::load_config_from(path),
        None => cronmesh_config::load_config(),
    };
    let (config, config_error) = match config {
        Ok(config) => (config, None),
        Err(e) => (CronMeshConfig::default(), Some(e)),
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {e}");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let response = rt
        .block_on(run(cli, config))
        .unwrap_or_else(|e| Response::failure(format!("{e:#}")));

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, config: CronMeshConfig) -> anyhow::Result<Response> {
    let db = cli.db;
    match cli.command {
        Commands::Plan { cron, count } => jobs::plan(&cron, count, &config),
        Commands::Check { payload } => jobs::check(payload.as_bytes(), &config),
        Commands::Logs { name, skip, limit } => {
            let store = logs::open_store(&config, db.as_deref()).await?;
            logs::list(&store, &name, skip, limit).await
        }
        Commands::Purge { name } => {
            let store = logs::open_store(&config, db.as_deref()).await?;
            logs::purge(&store, &name).await
        }
        Commands::Import { file } => {
            let store = logs::open_store(&config, db.as_deref()).await?;
            logs::import(store, &file, &config).await
        }
        Commands::Health => {
            let store = logs::open_store(&config, db.as_deref()).await?;
            logs::health(&store, &config).await
        }
        Commands::Init { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => cronmesh_config::config_file_path()?,
            };
            init::init(&path, force)
        }
    }
}
