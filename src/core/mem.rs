// In-memory engine implementing the same cursor surface as the file store.
// Exists so traversal logic can be exercised without touching disk; unit
// tests across the crate build fixtures with it.
use std::sync::Arc;

use crate::core::column::{ColumnDescriptor, ColumnId};
use crate::core::engine::{Connection, RowCursor};
use crate::core::error::{Error, ErrorKind};

type Row = Vec<Option<Vec<u8>>>;

#[derive(Clone, Debug)]
struct MemTable {
    name: String,
    columns: Arc<[ColumnDescriptor]>,
    rows: Arc<Vec<Row>>,
}

#[derive(Clone, Debug, Default)]
pub struct MemDb {
    tables: Vec<MemTable>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table. Each row's cell count must match the column count.
    pub fn insert_table(
        &mut self,
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        rows: Vec<Row>,
    ) {
        let name = name.into();
        for row in &rows {
            assert_eq!(
                row.len(),
                columns.len(),
                "row width mismatch in mem table {name}"
            );
        }
        self.tables.push(MemTable {
            name,
            columns: columns.into(),
            rows: Arc::new(rows),
        });
    }
}

impl Connection for MemDb {
    type Rows = MemCursor;

    fn open_table(&self, name: &str) -> Result<MemCursor, Error> {
        let table = self
            .tables
            .iter()
            .find(|table| table.name == name)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("no such table")
                    .with_table(name)
            })?;
        Ok(MemCursor {
            columns: Arc::clone(&table.columns),
            rows: Arc::clone(&table.rows),
            next_row: 0,
            current: None,
        })
    }
}

#[derive(Debug)]
pub struct MemCursor {
    columns: Arc<[ColumnDescriptor]>,
    rows: Arc<Vec<Row>>,
    next_row: usize,
    current: Option<usize>,
}

impl MemCursor {
    fn advance(&mut self) -> Result<bool, Error> {
        if self.next_row == self.rows.len() {
            self.current = None;
            return Ok(false);
        }
        self.current = Some(self.next_row);
        self.next_row += 1;
        Ok(true)
    }
}

impl RowCursor for MemCursor {
    fn move_first(&mut self) -> Result<bool, Error> {
        if self.next_row != 0 {
            return Err(Error::new(ErrorKind::Internal)
                .with_message("cursor cannot be restarted; reopen the table"));
        }
        self.advance()
    }

    fn move_next(&mut self) -> Result<bool, Error> {
        self.advance()
    }

    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn retrieve(&self, column: ColumnId) -> Result<Option<&[u8]>, Error> {
        let row = self.current.ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("cursor is not positioned on a row")
        })?;
        let index = self
            .columns
            .iter()
            .position(|descriptor| descriptor.id == column)
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("column id not in table")
            })?;
        Ok(self.rows[row][index].as_deref())
    }
}
