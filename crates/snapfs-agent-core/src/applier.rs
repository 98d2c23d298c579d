use crate::error::Error;
use crate::event::EventRecord;
use crate::resolver::{apply_event, Resolution};
use crate::storage::{Database, UnitOfWork};
use tracing::{debug, error, warn};

/// The chunk that stopped a batch, and where re-application has to resume.
#[derive(Debug)]
pub struct ChunkFailure {
    pub error: Error,
    /// Index of the first event that was not committed.
    pub first_unapplied: usize,
    pub path: Option<String>,
}

/// Outcome of applying one ordered event sequence.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Events stored in committed chunks.
    pub applied: usize,
    /// Events rejected as invalid inside committed chunks.
    pub rejected: usize,
    /// Events of kinds this agent does not handle.
    pub ignored: usize,
    pub chunks_committed: usize,
    pub failure: Option<ChunkFailure>,
}

impl ApplyReport {
    /// A report for a batch that could not be attempted at all.
    pub fn aborted(error: Error, first_event: Option<&EventRecord>) -> Self {
        Self {
            failure: Some(ChunkFailure {
                error,
                first_unapplied: 0,
                path: first_event.and_then(|e| e.path()).map(str::to_string),
            }),
            ..Self::default()
        }
    }

    /// True when every chunk committed.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Default)]
struct ChunkStats {
    applied: usize,
    rejected: usize,
    ignored: usize,
}

/// Applies events in chunks of at most `chunk_size`, one transaction per
/// chunk. Stops at the first chunk that fails; earlier chunks stay committed.
#[derive(Debug, Clone)]
pub struct BatchApplier {
    chunk_size: usize,
    snapshot_id: Option<i64>,
}

impl BatchApplier {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            snapshot_id: None,
        }
    }

    /// Record every applied, non-deleted path as a member of `snapshot_id`.
    pub fn with_snapshot(mut self, snapshot_id: Option<i64>) -> Self {
        self.snapshot_id = snapshot_id;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn apply(&self, db: &Database, events: &[EventRecord]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (chunk_idx, chunk) in events.chunks(self.chunk_size).enumerate() {
            let offset = chunk_idx * self.chunk_size;
            match self.apply_chunk(db, chunk) {
                Ok(stats) => {
                    report.applied += stats.applied;
                    report.rejected += stats.rejected;
                    report.ignored += stats.ignored;
                    report.chunks_committed += 1;
                    debug!(
                        "Committed chunk {} ({} events, {} applied, {} rejected)",
                        chunk_idx,
                        chunk.len(),
                        stats.applied,
                        stats.rejected
                    );
                }
                Err(err) => {
                    let path = chunk.first().and_then(|e| e.path()).map(str::to_string);
                    error!(
                        "Chunk {} failed, {} of {} events left unapplied: {}",
                        chunk_idx,
                        events.len() - offset,
                        events.len(),
                        err
                    );
                    report.failure = Some(ChunkFailure {
                        error: Error::Apply(format!("chunk starting at event {}: {}", offset, err)),
                        first_unapplied: offset,
                        path,
                    });
                    break;
                }
            }
        }

        report
    }

    fn apply_chunk(&self, db: &Database, chunk: &[EventRecord]) -> Result<ChunkStats, Error> {
        let uow = UnitOfWork::new(db.begin()?);
        let mut stats = ChunkStats::default();

        for event in chunk {
            match apply_event(&uow, event, self.snapshot_id) {
                Ok(Resolution::Applied(_)) => stats.applied += 1,
                Ok(Resolution::Ignored) => stats.ignored += 1,
                Err(Error::InvalidEvent(reason)) => {
                    warn!("Skipping invalid event: {}", reason);
                    stats.rejected += 1;
                }
                Err(err) => {
                    if let Err(rollback_err) = uow.rollback() {
                        warn!("Rollback failed: {}", rollback_err);
                    }
                    return Err(err);
                }
            }
        }

        uow.commit()?;
        Ok(stats)
    }
}
