use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyscope::observability::{init_logging, LogConfig};
use keyscope::{
    AnalysisRunner, CancelSignal, ClusterScanner, Config, NodeAddr, NodeRegistry, RedisDataType,
    ScanFilter,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Keyscope - scan and analyse the keyspace of a Redis server or cluster
#[derive(Parser)]
#[command(name = "keyscope")]
#[command(version)]
#[command(about = "Cluster-aware Redis key scanner", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seed node host (overrides [connection] host)
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    /// Seed node port (overrides [connection] port)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page of keys and print it as JSON
    Scan {
        /// Cursor returned by a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Glob pattern; a pattern without wildcards looks up one key
        #[arg(short = 'm', long = "match")]
        pattern: Option<String>,

        /// Only keys of this type (string, hash, list, ...)
        #[arg(short = 't', long = "type")]
        key_type: Option<String>,

        /// Keys wanted in the page
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Print key names only
        #[arg(long)]
        no_info: bool,
    },

    /// Walk the whole keyspace and print an analysis as JSON
    Analyze {
        #[arg(short = 'm', long = "match")]
        pattern: Option<String>,

        #[arg(short = 't', long = "type")]
        key_type: Option<String>,

        /// Namespace delimiter
        #[arg(short, long, default_value = ":")]
        delimiter: String,
    },
}

/// Load the configuration file and apply command line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config file '{}'", path.display()))?,
        None => Config::default(),
    };

    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn build_filter(pattern: Option<String>, key_type: Option<String>) -> ScanFilter {
    let mut filter = ScanFilter::new();
    if let Some(pattern) = pattern {
        filter = filter.with_match(pattern);
    }
    if let Some(key_type) = key_type {
        filter = filter.with_type(RedisDataType::from_type_name(&key_type));
    }
    filter
}

/// Cancel the returned signal on Ctrl-C
fn cancel_on_ctrl_c() -> CancelSignal {
    let cancel = CancelSignal::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current round");
            signal.cancel();
        }
    });
    cancel
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let log_config = LogConfig::from_config(&config.logging)?;
    init_logging(&log_config)?;

    let seed = NodeAddr::new(config.connection.host.clone(), config.connection.port);
    info!("Connecting to {}", seed);
    let registry = NodeRegistry::connect(seed.clone(), &config.connection)
        .await
        .with_context(|| format!("failed to connect to {}", seed))?;
    info!(
        "Discovered {} node(s) ({})",
        registry.len(),
        if registry.topology().is_cluster() {
            "cluster"
        } else {
            "standalone"
        }
    );

    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Scan {
            cursor,
            pattern,
            key_type,
            count,
            no_info,
        } => {
            let mut filter = build_filter(pattern, key_type);
            if let Some(count) = count {
                filter = filter.with_count(count);
            }
            if no_info {
                filter = filter.names_only();
            }

            let scanner = ClusterScanner::new(&registry, config.scan.clone());
            let page = scanner
                .start_or_resume_scan(cursor.as_deref(), &filter, &cancel)
                .await?;
            print_json(&page)?;
        }
        Commands::Analyze {
            pattern,
            key_type,
            delimiter,
        } => {
            let filter = build_filter(pattern, key_type);
            let report = AnalysisRunner::new(&registry, config.scan.clone())
                .with_delimiter(delimiter)
                .run(&filter, &cancel)
                .await?;
            print_json(&report)?;
        }
    }

    Ok(())
}
