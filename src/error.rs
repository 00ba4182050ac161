//! # Error Handling for rowbatch
//!
//! This module defines the error types used throughout the crate. A single
//! error enum ([`Error`]) represents every failure mode, which keeps function
//! signatures small and lets callers match uniformly.
//!
//! ## Error Categories
//!
//! | Category | Variants | Surfaces |
//! |----------|----------|----------|
//! | Construction | [`Error::Config`] | synchronously, from `spawn_batcher` |
//! | Submission | [`Error::Closed`] | synchronously, from `Batcher::collect` |
//! | Batch-level | [`Error::IdAllocation`], [`Error::Commit`] | asynchronously, through every [`State`](crate::State) of the failed batch |
//! | Database | [`Error::Sqlite`] | from the inserter and allocator building blocks |
//!
//! Batch-level errors are broadcast: every contributor to a failed batch
//! observes the same error, and a failure in one batch never affects prior
//! or successor batches.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in rowbatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A construction-time parameter was invalid.
    ///
    /// Returned by [`spawn_batcher`](crate::spawn_batcher) when the
    /// configuration cannot produce a working batcher, for example a
    /// `max_elements` of zero.
    #[error("invalid batcher configuration: {0}")]
    Config(String),

    /// The batcher was closed before the operation could run.
    ///
    /// `collect` fails with this after `close()` has been called. A
    /// [`State`](crate::State) also resolves to this when the flusher went
    /// away without committing its batch (the flusher thread died), so
    /// waiters are never stranded.
    #[error("batcher is closed")]
    Closed,

    /// Reserving a contiguous auto-increment ID range failed.
    ///
    /// Raised by the transient-transaction allocator when the side
    /// transaction cannot be opened, the placeholder insert fails, or the
    /// engine reports an unusable starting ID. Attaches to every state of
    /// the batch that requested the reservation.
    #[error("id allocation failed: {0}")]
    IdAllocation(String),

    /// The inserter failed to commit a batch.
    ///
    /// Attaches to every state of the failed batch. The flusher does not
    /// retry; records submitted afterwards land in a fresh batch and commit
    /// normally.
    #[error("batch commit failed: {0}")]
    Commit(String),

    /// SQLite operation failed.
    ///
    /// Wraps any error from the `rusqlite` crate: a locked database file, a
    /// full disk, a constraint violation, a statement error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
