//! # Batcher Front Door
//!
//! [`Batcher`] is the thread-safe entry point producers talk to. `collect`
//! appends the record to the current open batch under a short critical
//! section and returns a [`State`] handle; all database work happens on the
//! flusher's dedicated thread.
//!
//! ## Why Coalesce?
//!
//! Each insert round-trip pays fixed costs: statement dispatch, transaction
//! begin/commit, an fsync on durable engines. Coalescing amortizes them:
//!
//! ```text
//! Without batching:                With batching:
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │ row1 → BEGIN → COMMIT    │     │ BEGIN                    │
//! │ row2 → BEGIN → COMMIT    │     │   INSERT ... VALUES      │
//! │ row3 → BEGIN → COMMIT    │     │     (row1),(row2),(row3) │
//! │ ...                      │     │ COMMIT                   │
//! │ 100 round-trips          │     │ 1 round-trip             │
//! └──────────────────────────┘     └──────────────────────────┘
//! ```
//!
//! ## Flush Triggers
//!
//! Two independent triggers seal a batch:
//!
//! - **Size**: the batch reached [`BatcherConfig::max_elements`]. `collect`
//!   seals it in place, installs a fresh successor, and hands the sealed
//!   batch to the flusher through the signal channel. Producers never wait
//!   on a commit.
//! - **Time**: the batch has been open for [`BatcherConfig::max_duration`],
//!   measured from its first record. The flusher seals and takes it. The
//!   deadline is not reset by later appends, so a steady stream of
//!   submissions cannot starve commits.
//!
//! When both would fire together, size wins: the sealed batch left the slot
//! inside `collect`'s critical section, so the expiring timer only ever
//! finds the fresh successor.
//!
//! ## Locking Discipline
//!
//! The service mutex guards the current-batch slot and nothing else. The
//! critical section in `collect` is O(1) (append, index computation, one
//! non-blocking signal send) and performs no I/O. The flusher takes the
//! same lock only to inspect the open batch's deadline or rotate it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::batch::{Batch, State};
use crate::error::{Error, Result};
use crate::flusher;
use crate::inserter::Inserter;

// =============================================================================
// Configuration
// =============================================================================

/// Default hard cap on records per coalesced batch.
pub const DEFAULT_MAX_ELEMENTS: usize = 1000;

/// Default batch age, in milliseconds, after which a non-empty batch is
/// flushed. Shorter = lower latency, longer = bigger batches.
pub const DEFAULT_MAX_DURATION_MS: u64 = 10;

/// How generated primary keys are assigned to batch members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresetIdStrategy {
    /// Let the engine assign keys during the insert; states derive their ID
    /// from the first-row ID the inserter reports.
    #[default]
    None,

    /// Reserve the batch's key range up front through
    /// [`Inserter::reserve_ids`] (the transient-transaction allocator), and
    /// insert rows with explicit keys from that range.
    TransientTransaction,
}

/// Configuration for the batcher.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Hard upper bound on records per coalesced batch; must be at least 1.
    /// Reaching it seals the batch immediately (size trigger).
    pub max_elements: usize,

    /// Maximum age of a non-empty batch before the flusher seals it (time
    /// trigger). Zero means flush as soon as the flusher gets the chance.
    pub max_duration: Duration,

    /// Primary-key assignment strategy.
    pub preset_ids: PresetIdStrategy,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_elements: DEFAULT_MAX_ELEMENTS,
            max_duration: Duration::from_millis(DEFAULT_MAX_DURATION_MS),
            preset_ids: PresetIdStrategy::None,
        }
    }
}

// =============================================================================
// Producer → Flusher Signals
// =============================================================================

/// What `collect`/`close` tell the flusher.
///
/// Signals are sent while holding the service mutex, so the channel carries
/// them in slot-mutation order; the single flusher consumes them FIFO, which
/// makes commit order equal batch-creation order.
#[derive(Debug)]
pub(crate) enum Signal<R> {
    /// The open batch received its first record; arm the flush timer.
    Activity,

    /// A batch reached `max_elements` and was sealed by `collect`. Ownership
    /// transfers to the flusher with the message.
    Sealed(Batch<R>),

    /// Seal and commit whatever is pending, then acknowledge and exit.
    Close { ack: oneshot::Sender<()> },
}

// =============================================================================
// Shared Slot
// =============================================================================

/// The mutex-guarded "current batch" slot shared by producers and the
/// flusher.
#[derive(Debug)]
pub(crate) struct Slot<R> {
    /// The open batch new records append to. Never sealed while it sits
    /// here: sealing always rotates it out.
    pub(crate) open: Batch<R>,

    /// Set by `close()`; rejects further submissions.
    pub(crate) closed: bool,
}

impl<R> Slot<R> {
    /// Seals the open batch and replaces it with a fresh successor,
    /// returning the sealed batch for the flusher to commit.
    pub(crate) fn rotate(&mut self) -> Batch<R> {
        let mut sealed = std::mem::replace(&mut self.open, Batch::new());
        sealed.seal();
        sealed
    }
}

// =============================================================================
// Batcher
// =============================================================================

/// Thread-safe front door to the insert coalescer.
///
/// Clone it freely; all clones feed the same flusher. Dropping every clone
/// without calling [`close`](Batcher::close) still flushes the pending
/// batch before the flusher exits.
///
/// The signal sender lives here, not in the state shared with the flusher:
/// once the last `Batcher` clone drops, the channel closes and the flusher
/// drains and exits.
#[derive(Debug)]
pub struct Batcher<R> {
    slot: Arc<Mutex<Slot<R>>>,
    signals: mpsc::UnboundedSender<Signal<R>>,
    max_elements: usize,
}

impl<R> Clone for Batcher<R> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            signals: self.signals.clone(),
            max_elements: self.max_elements,
        }
    }
}

/// Validates the configuration, spawns the flusher thread, and returns the
/// front door.
///
/// The inserter moves onto the flusher thread and is used exclusively
/// there, so it owns its database connection outright.
pub fn spawn_batcher<I>(inserter: I, config: BatcherConfig) -> Result<Batcher<I::Record>>
where
    I: Inserter,
{
    if config.max_elements < 1 {
        return Err(Error::Config(
            "max_elements must be at least 1".to_string(),
        ));
    }

    let (signals, inbox) = mpsc::unbounded_channel();
    let slot = Arc::new(Mutex::new(Slot {
        open: Batch::new(),
        closed: false,
    }));

    flusher::spawn(
        inserter,
        Arc::clone(&slot),
        inbox,
        config.max_duration,
        config.preset_ids,
    )?;

    Ok(Batcher {
        slot,
        signals,
        max_elements: config.max_elements,
    })
}

impl<R> Batcher<R> {
    /// Submits one record for batched insertion.
    ///
    /// Appends to the current batch and returns the [`State`] handle that
    /// will resolve once the batch commits. If the append fills the batch,
    /// it is sealed and handed to the flusher before this call returns; the
    /// commit itself still happens on the flusher thread.
    ///
    /// Fails with [`Error::Closed`] after [`close`](Batcher::close).
    pub fn collect(&self, record: R) -> Result<State> {
        let mut slot = self.slot.lock().expect("batcher mutex poisoned");
        if slot.closed {
            return Err(Error::Closed);
        }

        let state = slot.open.push(record);

        if slot.open.len() >= self.max_elements {
            // Size trigger: seal under the lock and transfer ownership. The
            // send can only fail if the flusher died; its batch then resolves
            // every state to `Closed` when the channel drops it.
            let sealed = slot.rotate();
            let _ = self.signals.send(Signal::Sealed(sealed));
        } else if slot.open.len() == 1 {
            // First record of a fresh batch: wake the flusher so it arms the
            // flush timer. Later appends don't touch the deadline.
            let _ = self.signals.send(Signal::Activity);
        }

        Ok(state)
    }

    /// Closes the batcher: commits the pending partial batch and waits for
    /// the flusher to finish it.
    ///
    /// Subsequent `collect` calls fail with [`Error::Closed`]. Outstanding
    /// [`State`] handles remain valid and resolve normally. Idempotent; a
    /// second call returns without waiting.
    pub async fn close(&self) {
        let ack = {
            let mut slot = self.slot.lock().expect("batcher mutex poisoned");
            if slot.closed {
                None
            } else {
                slot.closed = true;
                let (ack, done) = oneshot::channel();
                let _ = self.signals.send(Signal::Close { ack });
                Some(done)
            }
        };

        if let Some(done) = ack {
            // Err here means the flusher is already gone; nothing left to wait for.
            let _ = done.await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
