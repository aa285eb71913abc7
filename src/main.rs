use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use live_code_search::config::Config;
use live_code_search::search::{IndexService, IndexStatus, Query, SearchResult};
use live_code_search::telemetry;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};

/// How often `watch` logs a status line.
const STATUS_EVERY: Duration = Duration::from_secs(30);

/// Live Code Search - auto-refreshing source tree index with lexical and regex search
#[derive(Parser, Debug)]
#[command(name = "live_code_search")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Additional roots to index (can be repeated, adds to configured roots)
    #[arg(short, long = "root", value_name = "PATH", global = true)]
    roots: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Generate a template configuration file and exit
    #[arg(long, value_name = "FILE")]
    init: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the roots and keep the index current until Ctrl-C
    Watch,

    /// Index the roots once and run a query
    Search {
        /// Terms, all of which must occur in a file
        #[arg(required = true)]
        terms: Vec<String>,

        /// Restrict to root-relative paths matching this glob (comma separated alternatives)
        #[arg(short, long)]
        glob: Option<String>,

        /// Treat terms as regular expressions
        #[arg(long)]
        regex: bool,

        /// Maximum number of result lines
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index the roots once and print status
    Status {
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_logging(log_level)?;

    if let Some(init_path) = args.init {
        let path = if init_path.as_os_str().is_empty() {
            PathBuf::from("live_code_search.toml")
        } else {
            init_path
        };

        if path.exists() {
            anyhow::bail!(
                "Config file already exists: {}\nRemove it first or choose a different path.",
                path.display()
            );
        }

        Config::write_template(&path)?;
        println!("Generated config file: {}", path.display());
        println!("\nEdit the file to add your project roots, then start watching with:");
        println!("  live_code_search --config {} watch", path.display());
        return Ok(());
    }

    let mut config = load_config(&args.config, args.roots)?;

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            info!(
                roots = ?config.indexer.root_paths(),
                interval_secs = config.indexer.interval().as_secs_f64(),
                backend = ?config.indexer.backend,
                "Configuration loaded"
            );
            let service = IndexService::start(config).context("Failed to start indexer")?;
            log_status(&service.status());
            watch(service).await
        }
        Command::Search {
            terms,
            glob,
            regex,
            limit,
            json,
        } => {
            config.indexer.enabled = false;
            let service = IndexService::start(config).context("Failed to build index")?;

            let mut query = Query::new(terms).with_regex(regex);
            if let Some(glob) = glob {
                query = query.with_glob(glob);
            }
            if let Some(limit) = limit {
                query = query.with_limit(limit);
            }
            let results = service.search(&query)?;
            print_results(&results, json)
        }
        Command::Status { json } => {
            config.indexer.enabled = false;
            let service = IndexService::start(config).context("Failed to build index")?;
            let status = service.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                log_status(&status);
            }
            Ok(())
        }
    }
}

async fn watch(mut service: IndexService) -> Result<()> {
    let mut ticker = tokio::time::interval(STATUS_EVERY);
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
            _ = ticker.tick() => log_status(&service.status()),
        }
    }
    tokio::task::block_in_place(|| service.stop());
    Ok(())
}

fn log_status(status: &IndexStatus) {
    info!(
        version = status.version,
        files = status.file_count,
        pending = status.pending_batch_size,
        indexing = status.indexing,
        running = status.running,
        backend = status.backend,
        "Index status"
    );
}

fn print_results(results: &[SearchResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    for result in results {
        println!("{}:{}: {}", result.relative_path, result.line_number, result.line);
    }
    if results.is_empty() {
        eprintln!("No matches");
    }
    Ok(())
}

fn load_config(config_path: &Option<PathBuf>, extra_roots: Vec<String>) -> Result<Config> {
    let base_config = if let Some(config_path) = config_path {
        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found: {}\nUse --init {} to generate a template.",
                config_path.display(),
                config_path.display()
            );
        }
        info!(path = %config_path.display(), "Loading config from file");
        Config::from_file(config_path)?
    } else {
        match Config::from_default_locations()? {
            Some((config, path)) => {
                info!(path = %path.display(), "Loading config from default location");
                config
            }
            None => {
                info!("No config file found, using defaults");
                Config::default()
            }
        }
    };

    Ok(base_config.with_overrides(extra_roots))
}
