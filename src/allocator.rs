//! # Transient-Transaction ID Allocation
//!
//! [`TransientIdAllocator`] reserves a contiguous block of auto-increment
//! primary keys *before* a multi-row insert runs, so that every batch member
//! can learn its key deterministically from its position: record `i` gets
//! `start_id + i`.
//!
//! ## Protocol
//!
//! ```text
//! BEGIN IMMEDIATE                      -- side transaction
//!   INSERT INTO t (id) VALUES (NULL), (NULL), ... × count
//!   start = last_insert_rowid() - count + 1
//!   DELETE FROM t WHERE id BETWEEN start AND last
//! ROLLBACK                             -- rows gone, range captured
//! ```
//!
//! The placeholder rows never become visible: they are deleted and the
//! transaction rolled back. Only the engine's auto-increment counter is
//! consulted.
//!
//! ## Engine Contract
//!
//! The reservation is stable under one of two conditions:
//!
//! - the engine's auto-increment counter survives a rollback (MySQL/InnoDB
//!   class engines), so no later insert can be handed the reserved range; or
//! - reservation and the insert that writes the reserved keys explicitly are
//!   serialized on a single writer. SQLite rewinds its row-ID counter with
//!   the rollback, so this crate relies on the flusher being the only writer:
//!   it reserves and immediately inserts, with nothing in between.
//!
//! Two independent writers on the same SQLite table would race the counter;
//! that deployment is not supported.
//!
//! The placeholder insert names only the key column, so the target table's
//! remaining columns must be nullable or carry defaults.

use log::debug;
use rusqlite::{params, Connection};

use crate::error::{Error, Result};

/// Reserves contiguous auto-increment ID ranges via a rolled-back side
/// transaction.
#[derive(Debug, Clone)]
pub struct TransientIdAllocator {
    table: String,
    id_column: String,
}

impl TransientIdAllocator {
    pub fn new(table: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
        }
    }

    /// Reserves `count` consecutive IDs and returns the first.
    ///
    /// Every failure mode (opening the side transaction, the placeholder
    /// insert, an unusable reported range) surfaces as
    /// [`Error::IdAllocation`]; the side transaction is rolled back in all
    /// cases.
    pub fn reserve(&self, conn: &Connection, count: usize) -> Result<i64> {
        if count == 0 {
            return Err(Error::IdAllocation(
                "cannot reserve an empty id range".to_string(),
            ));
        }

        conn.execute("BEGIN IMMEDIATE", []).map_err(|e| {
            Error::IdAllocation(format!("failed to open side transaction: {e}"))
        })?;

        let reserved = self.reserve_in_tx(conn, count);

        // Roll back regardless of outcome; the reservation lives in the
        // counter, not in rows.
        let _ = conn.execute("ROLLBACK", []);

        if let Ok(start) = reserved {
            debug!(
                "reserved ids {start}..={} on {}",
                start + count as i64 - 1,
                self.table
            );
        }
        reserved
    }

    fn reserve_in_tx(&self, conn: &Connection, count: usize) -> Result<i64> {
        let placeholders = vec!["(NULL)"; count].join(", ");
        let insert = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table, self.id_column, placeholders
        );
        conn.execute(&insert, [])
            .map_err(|e| Error::IdAllocation(format!("placeholder insert failed: {e}")))?;

        let last = conn.last_insert_rowid();
        let start = last - count as i64 + 1;
        if start <= 0 {
            return Err(Error::IdAllocation(format!(
                "engine reported unusable starting id {start}"
            )));
        }

        // The delete half of the insert-and-delete pattern: the rollback
        // would discard the rows anyway, but engines that replicate the
        // side transaction must not ship placeholder rows.
        let delete = format!(
            "DELETE FROM {} WHERE {} BETWEEN ?1 AND ?2",
            self.table, self.id_column
        );
        conn.execute(&delete, params![start, last])
            .map_err(|e| Error::IdAllocation(format!("placeholder delete failed: {e}")))?;

        Ok(start)
    }
}

// =============================================================================
// Tests
// =============================================================================
