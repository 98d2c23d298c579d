mod commands;
mod logging;

use std::process;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use serde_json::Value;
use snapfs_agent_core::backoff::Backoff;
use snapfs_agent_core::transport::WsConnector;
use snapfs_agent_core::{AppConfig, BatchApplier, Database, StreamConsumer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match snapfs_agent_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Run) => run_agent(&config),
        Some(Commands::InitDb) => init_db(&config),
        Some(Commands::CreateSnapshot { root, label }) => {
            create_snapshot(&config, &root, label.as_deref())
        }
        Some(Commands::Lookup { path }) => lookup(&config, &path),
        Some(Commands::Query { sql, csv }) => query(&config, &sql, csv),
        Some(Commands::Stats) => stats(&config),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn open_db(config: &AppConfig) -> Result<Database> {
    Database::open(&config.db_path).with_context(|| format!("opening database {}", config.db_path))
}

fn run_agent(config: &AppConfig) -> Result<()> {
    let db = open_db(config)?;
    if let Some(snapshot_id) = config.snapshot_id {
        let snapshot = db
            .get_snapshot(snapshot_id)?
            .ok_or_else(|| anyhow!("snapshot {} does not exist", snapshot_id))?;
        info!("Recording memberships for snapshot {} ({})", snapshot.id, snapshot.root_path);
    }

    let applier = BatchApplier::new(config.chunk_size).with_snapshot(config.snapshot_id);
    let connector = WsConnector::new(config.stream_uri());
    let mut consumer = StreamConsumer::new(connector, Arc::new(Mutex::new(db)), applier)
        .with_backoff(Backoff::new(config.backoff_initial(), config.backoff_max()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;

    let span = info_span!("agent", endpoint = %config.stream_uri(), snapshot = ?config.snapshot_id);
    let stats = runtime.block_on(
        async move {
            let cancel = CancellationToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown requested, finishing in-flight work");
                        signal_token.cancel();
                    }
                }
                .in_current_span(),
            );
            consumer.run(cancel).await
        }
        .instrument(span),
    );

    info!(
        "{} batches acked, {} events applied, {} failed batches, {} connections",
        format!("{}", stats.batches_acked).green(),
        format!("{}", stats.events_applied).green(),
        format!("{}", stats.batches_failed).red(),
        format!("{}", stats.connections).cyan(),
    );
    Ok(())
}

fn init_db(config: &AppConfig) -> Result<()> {
    info!("Using DB path: {}", config.db_path);
    let db = open_db(config)?;
    db.init_schema()?;
    println!("{}", "SnapFS schema initialized.".green());
    Ok(())
}

fn create_snapshot(config: &AppConfig, root: &str, label: Option<&str>) -> Result<()> {
    let db = open_db(config)?;
    let snapshot = db.create_snapshot(root, label)?;
    println!(
        "Created snapshot {} for {}",
        format!("{}", snapshot.id).cyan(),
        snapshot.root_path
    );
    Ok(())
}

fn lookup(config: &AppConfig, path: &str) -> Result<()> {
    let db = open_db(config)?;
    match db.lookup_cached(path)? {
        Some(row) => println!(
            "{}  {}:{}  {} bytes  mtime {}",
            row.path.bold(),
            row.algo,
            row.hash.green(),
            row.size,
            row.mtime
        ),
        None => println!("{}", format!("No cached content for {}", path).yellow()),
    }
    Ok(())
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn query(config: &AppConfig, sql: &str, as_csv: bool) -> Result<()> {
    let db = open_db(config)?;
    let rows = db.run_sql(sql)?;

    if as_csv {
        let mut writer = csv::Writer::from_writer(std::io::stdout());
        if let Some(first) = rows.first() {
            writer.write_record(first.keys())?;
        }
        for row in &rows {
            writer.write_record(row.values().map(csv_field))?;
        }
        writer.flush()?;
    } else {
        for row in rows {
            println!("{}", Value::Object(row));
        }
    }
    Ok(())
}

fn stats(config: &AppConfig) -> Result<()> {
    let db = open_db(config)?;
    let counts = db.entity_counts()?;
    println!("content          {}", format!("{}", counts.content).cyan());
    println!("physical files   {}", format!("{}", counts.physical_files).cyan());
    println!(
        "paths            {} ({} live)",
        format!("{}", counts.paths).cyan(),
        format!("{}", counts.live_paths).green()
    );
    println!("snapshots        {}", format!("{}", counts.snapshots).cyan());
    println!("snapshot files   {}", format!("{}", counts.snapshot_files).cyan());
    Ok(())
}
