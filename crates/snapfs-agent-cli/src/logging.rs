use std::env;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Consumer state changes and batch summaries are debug level; the
/// websocket stack only reports problems.
const DEFAULT_FILTER: &str = concat!(
    "info,snapfs_agent_core::consumer=debug,",
    "tungstenite=warn,tokio_tungstenite=warn"
);

pub fn init_logger() -> WorkerGuard {
    let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let filter_layer = EnvFilter::new(filter);

    let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "snapfs-agent.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .compact()
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    info!("Logging to stdout and {}/snapfs-agent.log.<date>", log_dir);

    guard
}
