//! # Batch Accumulator and Per-Submission State
//!
//! A [`Batch`] is the unit of coalescing: an append-only run of records that
//! will be committed together by one multi-row insert. Every `collect` call
//! lands a record in exactly one batch and walks away with a [`State`]: a
//! handle that resolves to that record's generated primary key, or to the
//! batch's commit error, once the flusher has finished with the batch.
//!
//! ## Completion Signalling
//!
//! The batch and its states form a deliberate one-way reference cycle: the
//! batch owns the records, each state holds a non-owning back-reference
//! (a [`watch`] receiver plus the record's index). Completion is a broadcast
//! one-shot:
//!
//! ```text
//!             ┌───────────────────────────────┐
//!             │            Batch              │
//!             │  records: [r0, r1, r2, ...]   │
//!             │  done: watch::Sender ─────────┼──► Some(BatchOutcome)
//!             └───────────────────────────────┘        (sent once)
//!                ▲            ▲            ▲
//!        State{rx, 0}  State{rx, 1}  State{rx, 2}
//!            id() = outcome.start_id + index
//! ```
//!
//! The `watch` channel retains the resolved value, so `id()`/`error()` can be
//! called repeatedly, from any number of tasks, before or after resolution,
//! and always observe the same outcome.
//!
//! ## Cost Model
//!
//! The append path is O(1): a vector push, an index computation, and one
//! receiver subscription. Sealing flips a flag. All per-record work happens
//! on the flusher side, outside the service mutex.

use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::{Error, Result};

// =============================================================================
// Batch Outcome
// =============================================================================

/// How a committed (or failed) batch resolved.
///
/// Cloneable so that every state of the batch can materialize its own view
/// of the result; the error is carried as a [`CommitFailure`] and turned
/// into an [`Error`] at read time.
#[derive(Debug, Clone)]
pub(crate) struct BatchOutcome {
    /// Primary key assigned to the batch's first record. Zero only when the
    /// batch failed.
    start_id: i64,

    /// Commit error, if the batch failed. `None` on success.
    failure: Option<CommitFailure>,
}

impl BatchOutcome {
    /// Outcome of a successfully committed batch.
    pub(crate) fn committed(start_id: i64) -> Self {
        Self {
            start_id,
            failure: None,
        }
    }

    /// Outcome of a batch whose commit procedure failed.
    pub(crate) fn failed(failure: CommitFailure) -> Self {
        Self {
            start_id: 0,
            failure: Some(failure),
        }
    }
}

/// A batch-level failure, broadcast to every contributor.
///
/// [`Error`] itself is not `Clone` (it can wrap a `rusqlite::Error`), so the
/// flusher stores the failure as a cloneable reason string tagged with the
/// failing stage, and each state rebuilds the matching [`Error`] variant.
#[derive(Debug, Clone)]
pub(crate) enum CommitFailure {
    /// The ID allocator could not reserve the batch's key range.
    Allocation(String),

    /// The inserter failed, or committed an unexpected number of rows.
    Insert(String),
}

impl CommitFailure {
    fn to_error(&self) -> Error {
        match self {
            CommitFailure::Allocation(reason) => Error::IdAllocation(reason.clone()),
            CommitFailure::Insert(reason) => Error::Commit(reason.clone()),
        }
    }
}

// =============================================================================
// Batch
// =============================================================================

/// An in-memory accumulator of records committed together by one insert.
///
/// Created empty, appended to under the service mutex, sealed exactly once
/// (by the size trigger inside `collect`, or by the flusher on timer expiry
/// or close), then committed and resolved by the flusher.
#[derive(Debug)]
pub(crate) struct Batch<R> {
    /// Ordered records; a record's position is its state's index.
    records: Vec<R>,

    /// When the batch received its first record. The flush deadline is
    /// measured from here and is not reset by later appends.
    first_at: Option<Instant>,

    /// Once true, no further appends are accepted.
    sealed: bool,

    /// Completion broadcast; starts at `None`, set exactly once.
    done: watch::Sender<Option<BatchOutcome>>,
}

impl<R> Batch<R> {
    pub(crate) fn new() -> Self {
        let (done, _) = watch::channel(None);
        Self {
            records: Vec::new(),
            first_at: None,
            sealed: false,
            done,
        }
    }

    /// Appends a record and returns the state handle bound to its position.
    ///
    /// The first append stamps `first_at`, which arms the batch's flush
    /// deadline.
    pub(crate) fn push(&mut self, record: R) -> State {
        debug_assert!(!self.sealed, "append to a sealed batch");

        if self.records.is_empty() {
            self.first_at = Some(Instant::now());
        }
        self.records.push(record);

        State {
            done: self.done.subscribe(),
            index: self.records.len() - 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Marks the batch sealed; it will accept no further appends.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    /// Instant at which a non-empty batch must be flushed, given the
    /// configured window. `None` while the batch is empty.
    pub(crate) fn deadline(&self, window: Duration) -> Option<Instant> {
        self.first_at.map(|first_at| first_at + window)
    }

    /// The records, for the inserter to consume and populate IDs on.
    pub(crate) fn records_mut(&mut self) -> &mut [R] {
        &mut self.records
    }

    /// Raises the batch's completion signal.
    ///
    /// Consumes the batch: resolution happens exactly once, and afterwards
    /// the records only live on until the last state lets go of the channel.
    pub(crate) fn resolve(self, outcome: BatchOutcome) {
        self.done.send_replace(Some(outcome));
    }
}

// =============================================================================
// State
// =============================================================================

/// A per-submission future: resolves to the record's generated primary key
/// and the batch's commit outcome.
///
/// Returned by [`Batcher::collect`](crate::Batcher::collect). Cheap to
/// clone; every clone observes the same resolution. Both accessors can be
/// awaited repeatedly and from multiple tasks.
#[derive(Clone)]
pub struct State {
    done: watch::Receiver<Option<BatchOutcome>>,
    index: usize,
}

impl State {
    /// Waits for the owning batch to commit and returns this record's
    /// primary key.
    ///
    /// With preset-ID allocation the key is the reserved range's start plus
    /// the record's position; otherwise it derives from the first-row ID the
    /// inserter reported. Fails with the batch-level error if the commit
    /// failed.
    pub async fn id(&self) -> Result<i64> {
        let outcome = self.outcome().await?;
        match outcome.failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(outcome.start_id + self.index as i64),
        }
    }

    /// Waits for the owning batch to commit and returns its outcome:
    /// `Ok(())` on success, the batch-level error otherwise.
    ///
    /// Every state of one batch returns the same outcome.
    pub async fn error(&self) -> Result<()> {
        match self.outcome().await?.failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    async fn outcome(&self) -> Result<BatchOutcome> {
        // Clone the receiver so `&self` methods can be called concurrently;
        // the channel retains the value, so late and repeated waits are fine.
        let mut done = self.done.clone();
        let result = match done.wait_for(Option::is_some).await {
            Ok(outcome) => Ok(outcome
                .clone()
                .unwrap_or_else(|| BatchOutcome::committed(0))),
            // Sender dropped without resolving: the flusher died with the
            // batch. Surface it rather than hanging the producer.
            Err(_) => Err(Error::Closed),
        };
        result
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("index", &self.index).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
