//! # Inserters
//!
//! The flusher consumes an [`Inserter`]: one call per batch, a homogeneous
//! slice in, `(rows affected, first inserted ID)` out. The inserter owns its
//! database connection and manages its own transaction, which keeps the
//! whole write path on the flusher thread without any connection sharing.
//!
//! [`SqliteInserter`] is the bundled implementation: it assembles chunked
//! multi-row `INSERT` statements for any type implementing [`Record`], and
//! supports preset-ID writes from a range reserved by the
//! [`TransientIdAllocator`].
//!
//! ## First-Row ID Semantics
//!
//! The contract reports the primary key of the *first* row of the call, so
//! callers can derive every row's key as `first + position`. Engines differ
//! in what they report for a multi-row insert (MySQL hands back the first
//! key, SQLite the last), so [`SqliteInserter`] derives
//! `first = last_insert_rowid() - n + 1` per chunk.

use std::marker::PhantomData;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::allocator::TransientIdAllocator;
use crate::error::{Error, Result};

// =============================================================================
// Contracts
// =============================================================================

/// Commits one batch of records through a single logical insert.
///
/// Implementations open, commit, and close their own transaction per call.
/// The flusher is the only caller; `&mut self` reflects its exclusive
/// ownership.
pub trait Inserter: Send + 'static {
    type Record: Send + 'static;

    /// Inserts `records` as one multi-row operation.
    ///
    /// With `preset_start_id`, rows are written with explicit keys
    /// `start, start + 1, …` from a previously reserved range. Returns the
    /// number of rows inserted and the primary key of the first inserted
    /// row, and populates the auto-increment field on every record.
    fn insert(
        &mut self,
        records: &mut [Self::Record],
        preset_start_id: Option<i64>,
    ) -> Result<(u64, i64)>;

    /// Reserves `count` contiguous auto-increment keys and returns the
    /// first.
    ///
    /// ID reservation is an engine capability, not a given; the default
    /// refuses, which fails preset-ID batches with
    /// [`Error::IdAllocation`].
    fn reserve_ids(&mut self, count: usize) -> Result<i64> {
        let _ = count;
        Err(Error::IdAllocation(
            "inserter does not support id reservation".to_string(),
        ))
    }
}

/// Maps a record type onto a table row.
///
/// The batcher core treats records as opaque; only [`SqliteInserter`] needs
/// this view. `columns()` and `values()` must agree on order, and neither
/// includes the auto-increment key column; the inserter manages that one.
pub trait Record {
    /// Name of the auto-increment primary-key column.
    fn id_column() -> &'static str;

    /// Insert column list, excluding the key column.
    fn columns() -> &'static [&'static str];

    /// Bind values in `columns()` order.
    fn values(&self) -> Vec<Value>;

    /// Called with the generated primary key after a successful commit.
    fn set_id(&mut self, id: i64);
}

// =============================================================================
// Configuration
// =============================================================================

/// Default rows per `INSERT` statement chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Configuration for [`SqliteInserter`].
#[derive(Debug, Clone)]
pub struct InserterConfig {
    /// Rows per multi-row `INSERT` statement. Bounds the statement's bind
    /// parameter count; independent of the batcher's `max_elements`
    /// (a coalesced batch larger than this simply spans several statements
    /// inside one transaction).
    pub batch_size: usize,
}

impl Default for InserterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// =============================================================================
// SQLite Inserter
// =============================================================================

/// Multi-row insert service for a SQLite table.
///
/// Statement text depends only on the chunk's row count, so
/// `prepare_cached` reuses compiled statements across batches. The
/// transaction is managed with raw `BEGIN IMMEDIATE` / `COMMIT` /
/// `ROLLBACK` statements; either every chunk of the call commits or none
/// does.
pub struct SqliteInserter<R: Record> {
    conn: Connection,
    table: String,
    batch_size: usize,
    allocator: TransientIdAllocator,
    _record: PhantomData<R>,
}

impl<R: Record> SqliteInserter<R> {
    pub fn new(conn: Connection, table: impl Into<String>, config: InserterConfig) -> Self {
        let table = table.into();
        let allocator = TransientIdAllocator::new(table.clone(), R::id_column());
        Self {
            conn,
            table,
            batch_size: config.batch_size.max(1),
            allocator,
            _record: PhantomData,
        }
    }

    fn insert_rows(&self, records: &mut [R], preset_start_id: Option<i64>) -> Result<(u64, i64)> {
        let mut affected = 0u64;
        let mut first_id = 0i64;
        let mut offset = 0usize;

        for chunk in records.chunks_mut(self.batch_size) {
            let sql = self.insert_sql(chunk.len(), preset_start_id.is_some());

            let mut values: Vec<Value> =
                Vec::with_capacity(chunk.len() * (R::columns().len() + 1));
            for (i, record) in chunk.iter().enumerate() {
                if let Some(start) = preset_start_id {
                    values.push(Value::Integer(start + (offset + i) as i64));
                }
                values.extend(record.values());
            }

            let mut stmt = self.conn.prepare_cached(&sql)?;
            affected += stmt.execute(params_from_iter(values))? as u64;
            drop(stmt);

            let chunk_first = match preset_start_id {
                Some(start) => start + offset as i64,
                // SQLite reports the last rowid of a multi-row insert.
                None => self.conn.last_insert_rowid() - chunk.len() as i64 + 1,
            };
            for (i, record) in chunk.iter_mut().enumerate() {
                record.set_id(chunk_first + i as i64);
            }

            if offset == 0 {
                first_id = chunk_first;
            }
            offset += chunk.len();
        }

        Ok((affected, first_id))
    }

    fn insert_sql(&self, rows: usize, with_id: bool) -> String {
        let mut columns: Vec<&str> = Vec::with_capacity(R::columns().len() + 1);
        if with_id {
            columns.push(R::id_column());
        }
        columns.extend_from_slice(R::columns());

        let row = format!("({})", vec!["?"; columns.len()].join(", "));
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            columns.join(", "),
            vec![row.as_str(); rows].join(", ")
        )
    }
}

impl<R> Inserter for SqliteInserter<R>
where
    R: Record + Send + 'static,
{
    type Record = R;

    fn insert(&mut self, records: &mut [R], preset_start_id: Option<i64>) -> Result<(u64, i64)> {
        if records.is_empty() {
            return Ok((0, 0));
        }

        self.conn.execute("BEGIN IMMEDIATE", [])?;
        match self.insert_rows(records, preset_start_id) {
            Ok(result) => match self.conn.execute("COMMIT", []) {
                Ok(_) => Ok(result),
                Err(e) => {
                    let _ = self.conn.execute("ROLLBACK", []);
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    fn reserve_ids(&mut self, count: usize) -> Result<i64> {
        self.allocator.reserve(&self.conn, count)
    }
}

// =============================================================================
// Tests
// =============================================================================
