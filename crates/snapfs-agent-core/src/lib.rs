pub mod applier;
pub mod backoff;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod resolver;
pub mod storage;
pub mod transport;

pub use applier::{ApplyReport, BatchApplier};
pub use config::AppConfig;
pub use consumer::{ConsumerState, ConsumerStats, StreamConsumer};
pub use error::Error;
pub use event::{EventRecord, FileData};
pub use storage::Database;
