use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "snapfs-agent")]
#[command(about = "Applies SnapFS file events to a normalized SQLite store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Consume the gateway event stream until interrupted
    Run,
    /// Create the database schema and views
    InitDb,
    /// Create a snapshot to attribute ingested files to
    CreateSnapshot {
        /// Root path the scan runs against
        #[arg(long)]
        root: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Show the cached content hash of a live path
    Lookup { path: String },
    /// Run a read-only SQL statement
    Query {
        sql: String,
        /// Print CSV instead of JSON lines
        #[arg(long)]
        csv: bool,
    },
    /// Print entity counts
    Stats,
    /// Print configuration values
    PrintConfig,
}
