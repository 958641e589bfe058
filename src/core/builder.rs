// Store file authoring: buffers tables in memory, then writes header,
// catalog, and page-aligned row regions in one pass. Read-side code never
// goes through this module; it exists for fixtures, demos, and tooling.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::core::column::ColumnDescriptor;
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{SUPPORTED_PAGE_SIZES, STORE_FORMAT_VERSION, page_size_error};
use crate::core::store::{HEADER_PREFIX_LEN, StoreHeader};

/// Handle to a table registered with a builder.
#[derive(Clone, Copy, Debug)]
pub struct TableSlot(usize);

#[derive(Debug)]
struct PendingTable {
    name: String,
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
}

#[derive(Debug)]
pub struct StoreBuilder {
    path: PathBuf,
    page_size: u32,
    tables: Vec<PendingTable>,
}

impl StoreBuilder {
    pub fn create(path: impl AsRef<Path>, page_size: u32) -> Result<Self, Error> {
        if !SUPPORTED_PAGE_SIZES.contains(&page_size) {
            return Err(page_size_error(page_size));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            page_size,
            tables: Vec::new(),
        })
    }

    pub fn table(&mut self, name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> TableSlot {
        self.tables.push(PendingTable {
            name: name.into(),
            columns,
            rows: Vec::new(),
        });
        TableSlot(self.tables.len() - 1)
    }

    /// Queues one row. Cells are raw storage bytes in column order; None is a
    /// null cell. Cell count is checked against the table's columns at `finish`.
    pub fn row(&mut self, slot: TableSlot, cells: Vec<Option<Vec<u8>>>) {
        self.tables[slot.0].rows.push(cells);
    }

    pub fn finish(self) -> Result<(), Error> {
        let page = self.page_size as u64;

        for table in &self.tables {
            for row in &table.rows {
                if row.len() != table.columns.len() {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!(
                            "row has {} cells, table has {} columns",
                            row.len(),
                            table.columns.len()
                        ))
                        .with_table(table.name.clone()));
                }
            }
        }

        // Catalog size is independent of the offsets it records, so encode
        // once with placeholders to size it, then again with real offsets.
        let placeholder: Vec<(u64, u64)> = self.tables.iter().map(|_| (0, 0)).collect();
        let catalog_len = encode_catalog(&self.tables, &placeholder).len() as u64;

        let catalog_off = page;
        let mut region_off = align_up(catalog_off + catalog_len, page);
        let mut regions: Vec<(u64, u64)> = Vec::with_capacity(self.tables.len());
        let mut row_blobs: Vec<Vec<u8>> = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let blob = encode_rows(&table.rows);
            regions.push((region_off, blob.len() as u64));
            region_off = align_up(region_off + blob.len() as u64, page);
            row_blobs.push(blob);
        }
        let file_size = region_off.max(catalog_off + page);

        let catalog = encode_catalog(&self.tables, &regions);
        let header = StoreHeader {
            version: STORE_FORMAT_VERSION,
            page_size: self.page_size,
            table_count: self.tables.len() as u32,
            catalog_off,
            catalog_len,
            file_size,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&self.path).with_source(err))?;
        file.lock_exclusive()
            .map_err(|err| Error::new(ErrorKind::Busy).with_path(&self.path).with_source(err))?;

        file.set_len(file_size)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&self.path).with_source(err))?;

        let mut image = vec![0u8; file_size as usize];
        image[..HEADER_PREFIX_LEN].copy_from_slice(&header.encode());
        image[catalog_off as usize..catalog_off as usize + catalog.len()]
            .copy_from_slice(&catalog);
        for ((off, _), blob) in regions.iter().zip(&row_blobs) {
            image[*off as usize..*off as usize + blob.len()].copy_from_slice(blob);
        }

        file.write_all(&image)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&self.path).with_source(err))?;
        file.flush()
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&self.path).with_source(err))?;
        let _ = file.unlock();
        Ok(())
    }
}

fn align_up(value: u64, page: u64) -> u64 {
    value.div_ceil(page) * page
}

fn encode_rows(rows: &[Vec<Option<Vec<u8>>>]) -> Vec<u8> {
    let mut out = Vec::new();
    for row in rows {
        for cell in row {
            match cell {
                None => out.push(0),
                Some(bytes) => {
                    out.push(1);
                    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(bytes);
                }
            }
        }
    }
    out
}

fn encode_catalog(tables: &[PendingTable], regions: &[(u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (table, (rows_off, rows_len)) in tables.iter().zip(regions) {
        push_string(&mut out, &table.name);
        out.extend_from_slice(&rows_off.to_le_bytes());
        out.extend_from_slice(&rows_len.to_le_bytes());
        out.extend_from_slice(&(table.rows.len() as u32).to_le_bytes());
        out.extend_from_slice(&(table.columns.len() as u16).to_le_bytes());
        for column in &table.columns {
            push_string(&mut out, &column.name);
            out.push(column.tag);
            out.extend_from_slice(&column.id.0.to_le_bytes());
        }
    }
    out
}

fn push_string(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(&(text.len() as u16).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}
