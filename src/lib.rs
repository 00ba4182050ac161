//! # rowbatch - Batched Insert Coalescer
//!
//! rowbatch turns many concurrent single-record submissions into few
//! multi-row database inserts. Producers call [`Batcher::collect`] and get a
//! [`State`] handle back immediately; a single flusher groups submissions
//! into size- and time-bounded batches, commits each batch through one
//! [`Inserter`] call, and resolves every contributor's handle with its
//! generated primary key or the batch's commit error.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Producers                               │
//! │          collect(record) → State      (any thread / task)       │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ append under mutex, O(1)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Current Batch                             │
//! │        size trigger ──┐         ┌── time trigger                │
//! └───────────────────────┼─────────┼───────────────────────────────┘
//!                         ▼         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Flusher (single worker)                     │
//! │   reserve ID range? → multi-row INSERT → resolve State handles  │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//!                            SQLite
//! ```
//!
//! ## Guarantees
//!
//! 1. **Exactly one batch per record**: a successfully collected record
//!    lands in exactly one batch and is committed (or failed) exactly once.
//! 2. **Per-batch feedback**: every state of a batch observes the same
//!    outcome; a failed batch never affects its predecessor or successor.
//! 3. **Bounded staleness**: a collected record commits within
//!    `max_duration` plus inserter latency.
//! 4. **Deterministic keys**: with preset-ID allocation, the record at
//!    position `i` of a batch gets `start_id + i`.
//!
//! No ordering is promised across batches, and the batcher holds no
//! persistent state of its own - durability is the database's job.
//!
//! ## Example
//!
//! ```rust,ignore
//! let conn = rusqlite::Connection::open("app.db")?;
//! let inserter: SqliteInserter<Person> =
//!     SqliteInserter::new(conn, "people", InserterConfig::default());
//!
//! let batcher = spawn_batcher(
//!     inserter,
//!     BatcherConfig {
//!         max_elements: 100,
//!         max_duration: Duration::from_millis(10),
//!         preset_ids: PresetIdStrategy::TransientTransaction,
//!     },
//! )?;
//!
//! let state = batcher.collect(person)?;
//! let id = state.id().await?;
//! batcher.close().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for rowbatch operations.
pub mod error;

/// Batch accumulator and the per-submission [`State`] handle.
pub mod batch;

/// The [`Batcher`] front door: configuration, `collect`, `close`.
pub mod batcher;

/// Contiguous auto-increment ID reservation via a rolled-back side
/// transaction.
pub mod allocator;

/// The [`Inserter`] contract, the [`Record`] row-mapping trait, and the
/// SQLite multi-row inserter.
pub mod inserter;

/// The single flush worker: trigger handling and the commit procedure.
mod flusher;

// =============================================================================
// Re-exports
// =============================================================================

pub use allocator::TransientIdAllocator;
pub use batch::State;
pub use batcher::{
    spawn_batcher, Batcher, BatcherConfig, PresetIdStrategy, DEFAULT_MAX_DURATION_MS,
    DEFAULT_MAX_ELEMENTS,
};
pub use error::{Error, Result};
pub use inserter::{Inserter, InserterConfig, Record, SqliteInserter, DEFAULT_BATCH_SIZE};
