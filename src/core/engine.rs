//! Purpose: Define the read-only cursor surface the dumper consumes.
//! Exports: `Connection`, `RowCursor`.
//! Role: Single seam between traversal logic and a concrete engine, so a
//! file-backed store and an in-memory fake stay interchangeable.
//! Invariants: Cursors are forward-only; re-enumeration requires reopening.
//! Invariants: Column order reported by `columns` is stable for the cursor's lifetime.

use crate::core::column::{ColumnDescriptor, ColumnId};
use crate::core::error::Error;

/// A read-only session over one database. Exclusively owned by a single dump
/// operation; dropping it releases every engine resource it acquired.
pub trait Connection {
    type Rows: RowCursor;

    /// Opens a named table read-only. Fails with `ErrorKind::NotFound` if the
    /// name does not exist.
    fn open_table(&self, name: &str) -> Result<Self::Rows, Error>;
}

/// A positionable, forward-only cursor over one table's rows.
pub trait RowCursor {
    /// Positions on the first row. Returns false when the table is empty.
    fn move_first(&mut self) -> Result<bool, Error>;

    /// Advances to the next row. Returns false past the last row.
    fn move_next(&mut self) -> Result<bool, Error>;

    /// Ordered column descriptors, fixed for this cursor's lifetime.
    fn columns(&self) -> &[ColumnDescriptor];

    /// Raw cell bytes for `column` on the current row, or None when the cell
    /// is null. Only valid after a successful `move_first`/`move_next`.
    fn retrieve(&self, column: ColumnId) -> Result<Option<&[u8]>, Error>;
}
