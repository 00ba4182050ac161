//! # Flusher
//!
//! The flusher is the single worker that seals and commits batches. There is
//! never more than one per batcher: it owns the [`Inserter`] (and through it
//! the database connection) outright, so the whole write path is free of
//! locking beyond the service mutex's short slot accesses.
//!
//! ## Thread Model
//!
//! SQLite's `Connection` is `Send` but not `Sync`, so the connection cannot
//! be shared across threads. Like the rest of the write path it lives on a
//! dedicated OS thread driving a current-thread Tokio runtime; producers
//! reach it only through the signal channel.
//!
//! ```text
//!  producers (any thread / task)
//!     │ collect()                        rowbatch-flusher thread
//!     ▼                                 ┌─────────────────────────┐
//!  ┌──────────────┐   Signal channel    │  loop:                  │
//!  │ current batch│ ──────────────────► │    wait (signal|timer)  │
//!  │  (mutex slot)│   Activity/Sealed/  │    seal / take batch    │
//!  └──────────────┘   Close             │    reserve IDs? insert  │
//!                                       │    resolve states       │
//!                                       └─────────────────────────┘
//! ```
//!
//! ## State Machine
//!
//! - **Idle**: open batch empty; wait on the channel with no deadline.
//! - **Armed**: open batch non-empty; wait with a deadline of
//!   `first_append + max_duration`. The deadline is a property of the batch,
//!   not of the wait: re-entering the loop recomputes it, appends never
//!   extend it.
//! - **Committing**: a sealed batch is being inserted; producers keep
//!   appending to the fresh successor in the slot.
//!
//! Sealed batches arrive through the channel already owned by this worker
//! (size trigger); on timer expiry or close the worker seals the slot's open
//! batch itself. The channel is FIFO and signals are sent under the slot
//! mutex, so commit order equals batch-creation order.
//!
//! ## Commit Procedure
//!
//! 1. Optionally reserve a contiguous ID range for the batch
//!    ([`Inserter::reserve_ids`], transient-transaction allocation).
//! 2. Run the multi-row insert; the inserter manages its own transaction.
//! 3. Check the affected-row count against the batch size.
//! 4. Resolve every state of the batch: with the starting ID on success,
//!    with the batch-level error otherwise.
//!
//! There are no retries. A failed batch resolves its own contributors and
//! the successor batch proceeds untouched.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::batch::{Batch, BatchOutcome, CommitFailure};
use crate::batcher::{PresetIdStrategy, Signal, Slot};
use crate::error::{Error, Result};
use crate::inserter::Inserter;

/// Spawns the flush worker on a dedicated thread.
pub(crate) fn spawn<I>(
    inserter: I,
    slot: Arc<Mutex<Slot<I::Record>>>,
    inbox: mpsc::UnboundedReceiver<Signal<I::Record>>,
    window: Duration,
    preset_ids: PresetIdStrategy,
) -> Result<()>
where
    I: Inserter,
{
    let flusher = Flusher {
        inserter,
        slot,
        inbox,
        window,
        preset_ids,
    };

    thread::Builder::new()
        .name("rowbatch-flusher".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("failed to create flusher runtime");

            rt.block_on(flusher.run());
        })
        .map_err(|e| Error::Config(format!("failed to spawn flusher thread: {e}")))?;

    Ok(())
}

struct Flusher<I: Inserter> {
    inserter: I,
    slot: Arc<Mutex<Slot<I::Record>>>,
    inbox: mpsc::UnboundedReceiver<Signal<I::Record>>,
    window: Duration,
    preset_ids: PresetIdStrategy,
}

impl<I: Inserter> Flusher<I> {
    async fn run(mut self) {
        loop {
            let received = match self.open_deadline() {
                // Armed: bound the wait by the open batch's deadline. A
                // queued signal still wins over an elapsed timer because the
                // channel is polled first.
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match timeout(wait, self.inbox.recv()).await {
                        Ok(signal) => signal,
                        Err(_) => {
                            self.flush_expired();
                            continue;
                        }
                    }
                }
                // Idle: nothing pending, nothing to time out.
                None => self.inbox.recv().await,
            };

            match received {
                Some(Signal::Activity) => {
                    // First record landed; loop back to arm the timer.
                }
                Some(Signal::Sealed(batch)) => self.commit(batch),
                Some(Signal::Close { ack }) => {
                    self.flush_pending();
                    let _ = ack.send(());
                    break;
                }
                None => {
                    // Every Batcher handle is gone; drain and exit.
                    self.flush_pending();
                    break;
                }
            }
        }
    }

    /// Deadline of the open batch, if it holds any records.
    fn open_deadline(&self) -> Option<Instant> {
        let slot = self.slot.lock().expect("batcher mutex poisoned");
        slot.open.deadline(self.window)
    }

    /// Timer expiry: seal and take the open batch, unless it was rotated
    /// out (size trigger) while we slept and the successor is still young.
    fn flush_expired(&mut self) {
        let expired = {
            let mut slot = self.slot.lock().expect("batcher mutex poisoned");
            match slot.open.deadline(self.window) {
                Some(deadline) if deadline <= Instant::now() => Some(slot.rotate()),
                _ => None,
            }
        };

        if let Some(batch) = expired {
            self.commit(batch);
        }
    }

    /// Close / drop path: commit the open batch regardless of its age.
    /// Sealed batches queued ahead of the close were already drained in
    /// channel order.
    fn flush_pending(&mut self) {
        let pending = {
            let mut slot = self.slot.lock().expect("batcher mutex poisoned");
            if slot.open.is_empty() {
                None
            } else {
                Some(slot.rotate())
            }
        };

        if let Some(batch) = pending {
            self.commit(batch);
        }
    }

    /// Runs the commit procedure and resolves the batch exactly once.
    fn commit(&mut self, mut batch: Batch<I::Record>) {
        let count = batch.len();
        debug_assert!(count > 0, "committing an empty batch");
        debug!("committing batch of {count} records");

        let outcome = match self.try_commit(&mut batch) {
            Ok(start_id) => BatchOutcome::committed(start_id),
            Err(failure) => {
                warn!(
                    "batch of {count} records failed: {}",
                    match &failure {
                        CommitFailure::Allocation(reason) => reason,
                        CommitFailure::Insert(reason) => reason,
                    }
                );
                BatchOutcome::failed(failure)
            }
        };

        batch.resolve(outcome);
    }

    fn try_commit(
        &mut self,
        batch: &mut Batch<I::Record>,
    ) -> std::result::Result<i64, CommitFailure> {
        let records = batch.records_mut();

        let preset_start = match self.preset_ids {
            PresetIdStrategy::TransientTransaction => {
                let start = self.inserter.reserve_ids(records.len()).map_err(|e| {
                    match e {
                        Error::IdAllocation(reason) => CommitFailure::Allocation(reason),
                        other => CommitFailure::Allocation(other.to_string()),
                    }
                })?;
                Some(start)
            }
            PresetIdStrategy::None => None,
        };

        let (affected, first_id) = self
            .inserter
            .insert(records, preset_start)
            .map_err(|e| match e {
                Error::Commit(reason) => CommitFailure::Insert(reason),
                other => CommitFailure::Insert(other.to_string()),
            })?;

        if affected != records.len() as u64 {
            return Err(CommitFailure::Insert(format!(
                "inserted {affected} of {} rows",
                records.len()
            )));
        }

        Ok(preset_start.unwrap_or(first_id))
    }
}

// =============================================================================
// Tests
// =============================================================================
