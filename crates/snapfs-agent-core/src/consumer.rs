//! Resilient consumption of the gateway event stream.
//!
//! One consumer owns one subscription. It connects, reads frames strictly in
//! arrival order, hands each event batch to the [`BatchApplier`] and sends an
//! ack only once every chunk of the batch has committed. Anything that leaves
//! a batch unacknowledged tears the connection down; the gateway redelivers
//! unacked batches, and since every mutation is an idempotent overwrite the
//! already-committed prefix re-applies harmlessly.

use crate::applier::{ApplyReport, BatchApplier, ChunkFailure};
use crate::backoff::Backoff;
use crate::error::Error;
use crate::event::{decode_frame, encode_ack, flatten_events, EventRecord, Frame, WrappedMessage};
use crate::storage::Database;
use crate::transport::{Connection, Connector, TransportMessage};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Connected,
    Processing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub connections: u64,
    pub connect_failures: u64,
    pub batches_acked: u64,
    pub batches_failed: u64,
    pub events_applied: u64,
}

/// Why a connection was left.
enum SessionEnd {
    Cancelled,
    ConnectFailed(Error),
    Closed(Option<String>),
    Transport(Error),
    Upstream(String),
    ApplyFailed { batch: Value, failure: ChunkFailure },
    AckFailed(Error),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Cancelled => write!(f, "cancelled"),
            SessionEnd::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            SessionEnd::Closed(Some(reason)) => write!(f, "closed by peer: {}", reason),
            SessionEnd::Closed(None) => write!(f, "closed by peer"),
            SessionEnd::Transport(e) => write!(f, "transport error: {}", e),
            SessionEnd::Upstream(message) => write!(f, "upstream error: {}", message),
            SessionEnd::ApplyFailed { batch, failure } => write!(
                f,
                "batch {} not acked, first unapplied event #{} ({}): {}",
                batch,
                failure.first_unapplied,
                failure.path.as_deref().unwrap_or("-"),
                failure.error
            ),
            SessionEnd::AckFailed(e) => write!(f, "{}", e),
        }
    }
}

pub struct StreamConsumer<C: Connector> {
    connector: C,
    db: Arc<Mutex<Database>>,
    applier: BatchApplier,
    backoff: Backoff,
    state: ConsumerState,
    stats: ConsumerStats,
}

impl<C: Connector> StreamConsumer<C> {
    pub fn new(connector: C, db: Arc<Mutex<Database>>, applier: BatchApplier) -> Self {
        Self {
            connector,
            db,
            applier,
            backoff: Backoff::default(),
            state: ConsumerState::Disconnected,
            stats: ConsumerStats::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    fn transition(&mut self, next: ConsumerState) {
        if self.state != next {
            trace!("Consumer state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Consume until `cancel` fires. Cancellation is observed while waiting
    /// for a connection, a frame or a backoff delay; a chunk that is being
    /// applied always finishes first.
    pub async fn run(&mut self, cancel: CancellationToken) -> ConsumerStats {
        info!("Starting stream consumer for {}", self.connector.endpoint());

        loop {
            self.transition(ConsumerState::Connecting);
            info!("Connecting {}", self.connector.endpoint());

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            let end = match connected {
                Ok(conn) => {
                    info!("Connected {}", self.connector.endpoint());
                    self.backoff.reset();
                    self.stats.connections += 1;
                    self.transition(ConsumerState::Connected);
                    self.serve(conn, &cancel).await
                }
                Err(err) => {
                    self.stats.connect_failures += 1;
                    SessionEnd::ConnectFailed(err)
                }
            };

            self.transition(ConsumerState::Disconnected);
            if let SessionEnd::Cancelled = end {
                break;
            }

            let delay = self.backoff.next_delay();
            warn!("Stream loop: {}; retrying in {:?}", end, delay);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(ConsumerState::Disconnected);
        info!("Stream consumer stopped: {:?}", self.stats);
        self.stats.clone()
    }

    async fn serve(&mut self, mut conn: C::Conn, cancel: &CancellationToken) -> SessionEnd {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                message = conn.recv() => message,
            };

            let text = match message {
                None => return SessionEnd::Closed(None),
                Some(Err(err)) => return SessionEnd::Transport(err),
                Some(Ok(TransportMessage::Close(reason))) => return SessionEnd::Closed(reason),
                Some(Ok(TransportMessage::Other)) => continue,
                Some(Ok(TransportMessage::Text(text))) => text,
            };

            let frame = match decode_frame(&text) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Dropping frame: {}", err);
                    continue;
                }
            };

            match frame {
                Frame::Events { batch, messages } => {
                    self.transition(ConsumerState::Processing);
                    if let Err(end) = self.handle_batch(&mut conn, batch, messages).await {
                        return end;
                    }
                    self.transition(ConsumerState::Connected);
                }
                Frame::Error { message } => return SessionEnd::Upstream(message),
                Frame::Unknown => trace!("Ignoring frame with unrecognized type"),
            }
        }
    }

    async fn handle_batch(
        &mut self,
        conn: &mut C::Conn,
        batch: Value,
        messages: Vec<WrappedMessage>,
    ) -> Result<(), SessionEnd> {
        let events = flatten_events(messages);

        if !events.is_empty() {
            let total = events.len();
            let report = self.apply(events).await;
            self.stats.events_applied += report.applied as u64;
            if let Some(failure) = report.failure {
                self.stats.batches_failed += 1;
                return Err(SessionEnd::ApplyFailed { batch, failure });
            }
            debug!(
                "Batch {}: {} events, {} applied, {} rejected, {} ignored",
                batch, total, report.applied, report.rejected, report.ignored
            );
        }

        let ack = encode_ack(&batch).map_err(SessionEnd::AckFailed)?;
        conn.send_text(ack).await.map_err(|e| {
            SessionEnd::AckFailed(Error::AckSend {
                batch: batch.to_string(),
                reason: e.to_string(),
            })
        })?;
        self.stats.batches_acked += 1;
        Ok(())
    }

    /// Run the applier on the blocking pool; SQLite calls are synchronous.
    async fn apply(&self, events: Vec<EventRecord>) -> ApplyReport {
        let db = Arc::clone(&self.db);
        let applier = self.applier.clone();
        let span = tracing::Span::current();

        let handle = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let db = match db.lock() {
                Ok(db) => db,
                Err(_) => {
                    let err = Error::Apply("database lock poisoned".to_string());
                    return ApplyReport::aborted(err, events.first());
                }
            };
            applier.apply(&db, &events)
        });

        match handle.await {
            Ok(report) => report,
            Err(join_err) => {
                ApplyReport::aborted(Error::Apply(format!("apply task failed: {}", join_err)), None)
            }
        }
    }
}
