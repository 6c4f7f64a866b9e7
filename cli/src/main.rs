//! chainpipe CLI — run indexing, backfills and fetch jobs, inspect indexer state.
//!
//! Usage:
//! ```bash
//! # Index the next batch of heights (or keep following the head)
//! chainpipe index --batch-size 500
//! chainpipe index --follow
//!
//! # Migrate heights indexed at older versions
//! chainpipe backfill --parallel
//!
//! # Process one height without persisting anything
//! chainpipe run --height 1200 --dry
//!
//! # Prefetch raw data in the background
//! chainpipe jobs
//! ```
//!
//! Every command accepts `--config <PATH>` (default `config/chainpipe.json`).

use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainpipe_core::config::{IndexerConfig, LogConfig};
use chainpipe_core::error::IndexerError;
use chainpipe_indexer::{
    BackfillRequest, ClientFetchWorker, HttpChainClient, HttpClientConfig, IndexRequest, Indexer,
    IndexerBuilder, JobManager, RunHeightRequest,
};

const DEFAULT_CONFIG_PATH: &str = "config/chainpipe.json";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "index" => cmd_index(&args[2..]).await,
        "backfill" => cmd_backfill(&args[2..]).await,
        "run" => cmd_run(&args[2..]).await,
        "jobs" => cmd_jobs(&args[2..]).await,
        "purge" => cmd_purge(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "info" => cmd_info(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("chainpipe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainpipe {}", env!("CARGO_PKG_VERSION"));
    println!("Staged, versioned indexer for validator-based chains\n");
    println!("USAGE:");
    println!("    chainpipe <COMMAND> [--config <PATH>]\n");
    println!("COMMANDS:");
    println!("    index     Index new heights up to the chain head");
    println!("    backfill  Reindex heights stored at an older index version");
    println!("    run       Process a single height");
    println!("    jobs      Run the fetch job manager until interrupted");
    println!("    purge     Delete sequences past their retention window");
    println!("    status    Print indexer and chain status as JSON");
    println!("    info      Show configured versions and tasks");
    println!("    version   Print version");
    println!("    help      Print this help\n");
    println!("INDEX FLAGS:");
    println!("    --batch-size <N>       Heights per run (0 = up to head)");
    println!("    --start-height <H>     Resume from this height");
    println!("    --follow               Keep indexing as the head advances\n");
    println!("BACKFILL FLAGS:");
    println!("    --parallel         Reindex heights in any order");
    println!("    --force            Discard unfinished reindex reports first");
    println!("    --targets <IDS>    Comma-separated target ids to rerun\n");
    println!("RUN FLAGS:");
    println!("    --height <HEIGHT>  Height to process  [required]");
    println!("    --versions <IDS>   Comma-separated version ids (default: all)");
    println!("    --targets <IDS>    Comma-separated target ids");
    println!("    --dry              Skip persistence and print the payload");
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn cmd_index(args: &[String]) -> Result<(), IndexerError> {
    let indexer = setup(args).await?;
    let cancel = cancel_on_ctrl_c();
    let req = IndexRequest {
        batch_size: parse_num(args, "--batch-size")?,
        start_height: parse_num(args, "--start-height")?,
    };

    if !has_flag(args, "--follow") {
        return print_json(&indexer.start_index(&cancel, req).await?);
    }

    let poll = indexer.config().jobs.poll_interval();
    let batch_size = req.batch_size;
    // The explicit start height only applies to the first run.
    let mut start_height = req.start_height;
    while !cancel.is_cancelled() {
        let run = IndexRequest {
            batch_size,
            start_height: start_height.take(),
        };
        match indexer.start_index(&cancel, run).await {
            Ok(summary) => tracing::info!(
                start = summary.start_height,
                end = summary.end_height,
                indexed = summary.success_count,
                "index run complete"
            ),
            Err(IndexerError::NothingToProcess(_)) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            Err(IndexerError::Cancelled) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn cmd_backfill(args: &[String]) -> Result<(), IndexerError> {
    let indexer = setup(args).await?;
    let req = BackfillRequest {
        parallel: has_flag(args, "--parallel"),
        force: has_flag(args, "--force"),
        target_ids: parse_ids(args, "--targets")?,
    };
    print_json(&indexer.backfill(&cancel_on_ctrl_c(), req).await?)
}

async fn cmd_run(args: &[String]) -> Result<(), IndexerError> {
    let indexer = setup(args).await?;
    let height = parse_num(args, "--height")?
        .ok_or_else(|| IndexerError::Config("--height is required".into()))?;
    let req = RunHeightRequest {
        height,
        version_ids: parse_ids(args, "--versions")?,
        target_ids: parse_ids(args, "--targets")?,
        dry: has_flag(args, "--dry"),
    };
    print_json(&indexer.run_height(&cancel_on_ctrl_c(), req).await?)
}

async fn cmd_jobs(args: &[String]) -> Result<(), IndexerError> {
    let config = load_config(args)?;
    init_tracing(&config.log);
    let store = chainpipe_storage::connect(&config.database_url).await?;
    let client = Arc::new(HttpChainClient::new(&config.chain_rpc_url, HttpClientConfig::default())?);
    let worker = Arc::new(ClientFetchWorker::new(client.clone(), store.raw_heights.clone()));

    let mut manager = JobManager::new(
        store.jobs.clone(),
        client,
        worker,
        config.jobs.clone(),
        config.first_block_height,
    );
    manager.run(cancel_on_ctrl_c()).await
}

async fn cmd_purge(args: &[String]) -> Result<(), IndexerError> {
    let indexer = setup(args).await?;
    print_json(&indexer.purge().await?)
}

async fn cmd_status(args: &[String]) -> Result<(), IndexerError> {
    let indexer = setup(args).await?;
    print_json(&indexer.status().await?)
}

fn cmd_info(args: &[String]) -> Result<(), IndexerError> {
    let config = load_config(args)?;
    let versions = chainpipe_core::VersionConfig::from_file(&config.version_config_path)?;

    println!("ChainPipe v{}", env!("CARGO_PKG_VERSION"));
    println!("  Chain RPC:        {}", config.chain_rpc_url);
    println!("  Database:         {}", config.database_url);
    println!("  First height:     {}", config.first_block_height);
    println!("  Current version:  {}", versions.current_version_id());
    for version in &versions.versions {
        let seq = if version.sequential { " (sequential)" } else { "" };
        println!("    v{}{seq}: targets {:?}", version.id, version.targets);
    }
    println!("  Targets:");
    for target in &versions.available_targets {
        println!("    {} {:<24} {}", target.id, target.name, target.tasks.join(", "));
    }
    println!("  Storage backends: memory, SQLite");
    Ok(())
}

// ─── Setup ────────────────────────────────────────────────────────────────────

fn load_config(args: &[String]) -> Result<IndexerConfig, IndexerError> {
    match parse_flag(args, "--config") {
        Some(path) => IndexerConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => IndexerConfig::from_file(DEFAULT_CONFIG_PATH),
        None => {
            let mut config = IndexerConfig::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn setup(args: &[String]) -> Result<Indexer, IndexerError> {
    let config = load_config(args)?;
    init_tracing(&config.log);

    let store = chainpipe_storage::connect(&config.database_url).await?;
    let client = HttpChainClient::new(&config.chain_rpc_url, HttpClientConfig::default())?;
    IndexerBuilder::new()
        .config(config)
        .client(Arc::new(client))
        .store(store)
        .build()
}

/// Initialise tracing from the log config. Called once per process.
fn init_tracing(config: &LogConfig) {
    // RUST_LOG wins over the config file.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current height");
            child.cancel();
        }
    });
    token
}

// ─── Flags / output ───────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> Result<(), IndexerError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_num(args: &[String], flag: &str) -> Result<Option<u64>, IndexerError> {
    parse_flag(args, flag)
        .map(|v| {
            v.parse()
                .map_err(|_| IndexerError::Config(format!("{flag} expects a number, got {v}")))
        })
        .transpose()
}

fn parse_ids(args: &[String], flag: &str) -> Result<Vec<u64>, IndexerError> {
    let Some(raw) = parse_flag(args, flag) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse()
                .map_err(|_| IndexerError::Config(format!("{flag}: invalid id {s}")))
        })
        .collect()
}
