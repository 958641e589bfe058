// Store file opening with header validation, catalog decode, and mmap-backed cursors.
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use libc::{EACCES, EPERM};
use memmap2::Mmap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::column::{ColumnDescriptor, ColumnId};
use crate::core::engine::{Connection, RowCursor};
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{
    SUPPORTED_PAGE_SIZES, SUPPORTED_STORE_FORMAT_VERSIONS, page_size_error, version_error,
};

pub const MAGIC: [u8; 4] = *b"CFFR";

/// Fixed header prefix at the start of page 0. The rest of the page is zero.
pub const HEADER_PREFIX_LEN: usize = 48;
const CHECKSUM_RANGE: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoreHeader {
    pub version: u32,
    pub page_size: u32,
    pub table_count: u32,
    pub catalog_off: u64,
    pub catalog_len: u64,
    pub file_size: u64,
}

impl StoreHeader {
    pub(crate) fn encode(&self) -> [u8; HEADER_PREFIX_LEN] {
        let mut buf = [0u8; HEADER_PREFIX_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.table_count.to_le_bytes());
        write_u64(&mut buf, 16, self.catalog_off);
        write_u64(&mut buf, 24, self.catalog_len);
        write_u64(&mut buf, 32, self.file_size);
        let checksum = header_checksum(&buf[..CHECKSUM_RANGE]);
        buf[CHECKSUM_RANGE..HEADER_PREFIX_LEN].copy_from_slice(&checksum);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_PREFIX_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("header too small"));
        }
        if buf[0..4] != MAGIC {
            return Err(Error::new(ErrorKind::Corrupt).with_message("bad magic"));
        }
        Ok(Self {
            version: u32::from_le_bytes(read_4(buf, 4)),
            page_size: u32::from_le_bytes(read_4(buf, 8)),
            table_count: u32::from_le_bytes(read_4(buf, 12)),
            catalog_off: read_u64(buf, 16),
            catalog_len: read_u64(buf, 24),
            file_size: read_u64(buf, 32),
        })
    }

    fn validate(&self, buf: &[u8], actual_file_size: u64) -> Result<(), Error> {
        if !SUPPORTED_STORE_FORMAT_VERSIONS.contains(&self.version) {
            return Err(version_error(self.version));
        }
        if !SUPPORTED_PAGE_SIZES.contains(&self.page_size) {
            return Err(page_size_error(self.page_size));
        }
        let computed = header_checksum(&buf[..CHECKSUM_RANGE]);
        if buf[CHECKSUM_RANGE..HEADER_PREFIX_LEN] != computed {
            return Err(Error::new(ErrorKind::Corrupt).with_message("header checksum mismatch"));
        }
        if self.file_size == 0 || self.file_size != actual_file_size {
            return Err(Error::new(ErrorKind::Corrupt).with_message("file size mismatch"));
        }
        let page = self.page_size as u64;
        if self.catalog_off < page || self.catalog_off % page != 0 {
            return Err(Error::new(ErrorKind::Corrupt).with_message("invalid catalog offset"));
        }
        let catalog_end = self.catalog_off.checked_add(self.catalog_len);
        if catalog_end.is_none_or(|end| end > self.file_size) {
            return Err(Error::new(ErrorKind::Corrupt).with_message("catalog out of bounds"));
        }
        Ok(())
    }
}

pub(crate) fn header_checksum(bytes: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Reads the page size a store file declares for itself, without attaching.
/// Only the fixed header prefix is touched; full validation happens in `open`.
pub fn declared_page_size(path: impl AsRef<Path>) -> Result<u32, Error> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    let mut prefix = [0u8; 12];
    file.read_exact(&mut prefix)
        .map_err(|err| Error::new(ErrorKind::Corrupt)
            .with_message("header too small")
            .with_path(path)
            .with_source(err))?;
    if prefix[0..4] != MAGIC {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("bad magic")
            .with_path(path));
    }
    Ok(u32::from_le_bytes(read_4(&prefix, 8)))
}

#[derive(Clone, Debug)]
pub(crate) struct TableMeta {
    pub name: String,
    pub rows_off: u64,
    pub rows_len: u64,
    pub row_count: u32,
    pub columns: Arc<[ColumnDescriptor]>,
}

/// A read-only connection to one store file. Holds a shared lock and a
/// read-only map for its whole lifetime; dropping it releases both, after
/// any cursors the traversal created have already gone away.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    file: File,
    mmap: Arc<Mmap>,
    header: StoreHeader,
    tables: Vec<TableMeta>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        // Two-phase open: resolve the declared page size first, then attach.
        let page_size = declared_page_size(&path)?;
        tracing::debug!(path = %path.display(), page_size, "opening store");

        let file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        file.lock_shared().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_path(&path)
                .with_source(err)
        })?;

        let actual_size = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };

        if mmap.len() < HEADER_PREFIX_LEN {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("header too small")
                .with_path(&path));
        }
        let header = StoreHeader::decode(&mmap[..HEADER_PREFIX_LEN])?;
        header.validate(&mmap[..HEADER_PREFIX_LEN], actual_size)?;
        debug_assert_eq!(header.page_size, page_size);

        let tables = decode_catalog(&mmap, &header)?;

        Ok(Self {
            path,
            file,
            mmap: Arc::new(mmap),
            header,
            tables,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> StoreHeader {
        self.header
    }

    pub fn page_size(&self) -> u32 {
        self.header.page_size
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|table| table.name.as_str())
    }

    pub fn open_table(&self, name: &str) -> Result<TableCursor, Error> {
        let meta = self
            .tables
            .iter()
            .find(|table| table.name == name)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("no such table")
                    .with_table(name)
                    .with_path(&self.path)
            })?;
        Ok(TableCursor::new(Arc::clone(&self.mmap), meta.clone()))
    }

    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            path: self.path.display().to_string(),
            format_version: self.header.version,
            page_size: self.header.page_size,
            file_size: self.header.file_size,
            tables: self
                .tables
                .iter()
                .map(|table| TableInfo {
                    name: table.name.clone(),
                    row_count: table.row_count,
                    column_count: table.columns.len() as u32,
                })
                .collect(),
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl Connection for Store {
    type Rows = TableCursor;

    fn open_table(&self, name: &str) -> Result<TableCursor, Error> {
        Store::open_table(self, name)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StoreInfo {
    pub path: String,
    pub format_version: u32,
    pub page_size: u32,
    pub file_size: u64,
    pub tables: Vec<TableInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u32,
    pub column_count: u32,
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

struct CatalogReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CatalogReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::new(ErrorKind::Corrupt).with_message("catalog truncated"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let bytes = self.bytes(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(out))
    }

    fn string(&mut self) -> Result<String, Error> {
        let len = self.u16()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::new(ErrorKind::Corrupt).with_message("catalog name not utf-8"))
    }
}

fn decode_catalog(mmap: &[u8], header: &StoreHeader) -> Result<Vec<TableMeta>, Error> {
    let start = header.catalog_off as usize;
    let end = start
        .checked_add(header.catalog_len as usize)
        .filter(|end| *end <= mmap.len())
        .ok_or_else(|| Error::new(ErrorKind::Corrupt).with_message("catalog out of bounds"))?;
    let mut reader = CatalogReader::new(&mmap[start..end]);
    let page = header.page_size as u64;

    let mut tables = Vec::with_capacity(header.table_count as usize);
    for _ in 0..header.table_count {
        let name = reader.string()?;
        let rows_off = reader.u64()?;
        let rows_len = reader.u64()?;
        let row_count = reader.u32()?;
        let rows_end = rows_off.checked_add(rows_len);
        if rows_off % page != 0 || rows_end.is_none_or(|end| end > header.file_size) {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("row region out of bounds")
                .with_table(name));
        }

        let column_count = reader.u16()?;
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let column_name = reader.string()?;
            let tag = reader.u8()?;
            let id = ColumnId(reader.u32()?);
            columns.push(ColumnDescriptor {
                name: column_name,
                tag,
                id,
            });
        }

        tables.push(TableMeta {
            name,
            rows_off,
            rows_len,
            row_count,
            columns: columns.into(),
        });
    }
    Ok(tables)
}

/// Forward-only cursor over one table's row region. Owns its own handle on
/// the map, so the connection's catalog stays untouched while rows stream.
#[derive(Debug)]
pub struct TableCursor {
    mmap: Arc<Mmap>,
    columns: Arc<[ColumnDescriptor]>,
    rows_end: usize,
    row_count: u32,
    next_off: usize,
    next_row: u32,
    // Cell spans (offset, len) per column for the current row, None when null.
    current: Option<Vec<Option<(usize, usize)>>>,
}

impl TableCursor {
    fn new(mmap: Arc<Mmap>, meta: TableMeta) -> Self {
        Self {
            mmap,
            columns: meta.columns,
            rows_end: (meta.rows_off + meta.rows_len) as usize,
            row_count: meta.row_count,
            next_off: meta.rows_off as usize,
            next_row: 0,
            current: None,
        }
    }

    fn advance(&mut self) -> Result<bool, Error> {
        if self.next_row == self.row_count {
            self.current = None;
            return Ok(false);
        }

        let mut cells = Vec::with_capacity(self.columns.len());
        let mut off = self.next_off;
        for _ in 0..self.columns.len() {
            let present = *self
                .mmap
                .get(off)
                .ok_or_else(|| Error::new(ErrorKind::Corrupt).with_message("row truncated"))?;
            off += 1;
            match present {
                0 => cells.push(None),
                1 => {
                    let len_end = off + 4;
                    if len_end > self.rows_end {
                        return Err(Error::new(ErrorKind::Corrupt).with_message("row truncated"));
                    }
                    let len = u32::from_le_bytes(read_4(&self.mmap, off)) as usize;
                    off = len_end;
                    let cell_end = off + len;
                    if cell_end > self.rows_end {
                        return Err(
                            Error::new(ErrorKind::Corrupt).with_message("cell out of bounds")
                        );
                    }
                    cells.push(Some((off, len)));
                    off = cell_end;
                }
                other => {
                    return Err(Error::new(ErrorKind::Corrupt)
                        .with_message(format!("bad cell presence byte {other}")));
                }
            }
        }

        self.next_off = off;
        self.next_row += 1;
        self.current = Some(cells);
        Ok(true)
    }
}

impl RowCursor for TableCursor {
    fn move_first(&mut self) -> Result<bool, Error> {
        // Forward-only: move_first is only valid on a fresh cursor.
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
        let cells = self.current.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("cursor is not positioned on a row")
        })?;
        let index = self
            .columns
            .iter()
            .position(|descriptor| descriptor.id == column)
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("column id not in table")
            })?;
        Ok(cells[index].map(|(start, len)| &self.mmap[start..start + len]))
    }
}

#[cfg(test)]
mod tests {
    use super::{Store, declared_page_size};
    use crate::core::builder::StoreBuilder;
    use crate::core::column::{ColumnDescriptor, ColumnId, StorageTag};
    use crate::core::engine::RowCursor;
    use crate::core::error::ErrorKind;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use std::path::Path;

    fn patch(path: &Path, offset: u64, bytes: &[u8]) {
        let mut file = OpenOptions::new().write(true).open(path).expect("open");
        file.seek(SeekFrom::Start(offset)).expect("seek");
        file.write_all(bytes).expect("write");
    }

    fn sample_store(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("sample.coffer");
        let mut builder = StoreBuilder::create(&path, 4096).expect("builder");
        let table = builder.table(
            "Numbers",
            vec![
                ColumnDescriptor::new("N", StorageTag::Long, ColumnId(1)),
                ColumnDescriptor::new("Label", StorageTag::Text, ColumnId(2)),
            ],
        );
        builder.row(table, vec![Some(5i32.to_le_bytes().to_vec()), None]);
        builder.row(
            table,
            vec![
                Some(9i32.to_le_bytes().to_vec()),
                Some(b"h\0i\0".to_vec()),
            ],
        );
        builder.finish().expect("finish");
        path
    }

    #[test]
    fn open_reads_declared_page_size_and_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());

        assert_eq!(declared_page_size(&path).expect("page size"), 4096);
        let store = Store::open(&path).expect("open");
        assert_eq!(store.page_size(), 4096);
        assert_eq!(store.table_names().collect::<Vec<_>>(), vec!["Numbers"]);

        let info = store.info();
        assert_eq!(info.tables.len(), 1);
        assert_eq!(info.tables[0].row_count, 2);
        assert_eq!(info.tables[0].column_count, 2);
    }

    #[test]
    fn cursor_walks_rows_and_retrieves_cells() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());
        let store = Store::open(&path).expect("open");

        let mut cursor = store.open_table("Numbers").expect("table");
        assert_eq!(cursor.columns().len(), 2);
        assert_eq!(cursor.columns()[0].name, "N");

        assert!(cursor.move_first().expect("first"));
        assert_eq!(
            cursor.retrieve(ColumnId(1)).expect("cell"),
            Some(&5i32.to_le_bytes()[..])
        );
        assert_eq!(cursor.retrieve(ColumnId(2)).expect("cell"), None);

        assert!(cursor.move_next().expect("next"));
        assert_eq!(
            cursor.retrieve(ColumnId(2)).expect("cell"),
            Some(&b"h\0i\0"[..])
        );
        assert!(!cursor.move_next().expect("end"));
        assert!(cursor.retrieve(ColumnId(1)).is_err());
    }

    #[test]
    fn cursor_is_forward_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());
        let store = Store::open(&path).expect("open");

        let mut cursor = store.open_table("Numbers").expect("table");
        assert!(cursor.move_first().expect("first"));
        let err = cursor.move_first().expect_err("restart");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn missing_table_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());
        let store = Store::open(&path).expect("open");

        let err = store.open_table("Absent").expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.table(), Some("Absent"));
    }

    #[test]
    fn missing_file_is_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Store::open(dir.path().join("absent.coffer")).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn foreign_file_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("foreign.bin");
        std::fs::write(&path, b"not a coffer file at all").expect("write");

        let err = declared_page_size(&path).expect_err("magic");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn unsupported_version_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());
        patch(&path, 4, &9u32.to_le_bytes());

        let err = Store::open(&path).expect_err("version");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.message().unwrap().contains("format version 9"));
    }

    #[test]
    fn unsupported_page_size_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());
        patch(&path, 8, &1234u32.to_le_bytes());

        let err = Store::open(&path).expect_err("page size");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.message().unwrap().contains("page size 1234"));
        assert!(err.message().unwrap().contains("4096"));
    }

    #[test]
    fn overflowing_catalog_offset_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());

        // Point the catalog just below u64::MAX (page-aligned) and refresh the
        // checksum so validation reaches the bounds arithmetic.
        let mut prefix = [0u8; super::CHECKSUM_RANGE];
        prefix.copy_from_slice(&std::fs::read(&path).expect("read")[..super::CHECKSUM_RANGE]);
        prefix[16..24].copy_from_slice(&(u64::MAX - 4095).to_le_bytes());
        prefix[24..32].copy_from_slice(&8192u64.to_le_bytes());
        patch(&path, 0, &prefix);
        patch(&path, 40, &super::header_checksum(&prefix));

        let err = Store::open(&path).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.message().unwrap().contains("catalog out of bounds"));
    }

    #[test]
    fn tampered_header_fails_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_store(dir.path());
        // Shrink the recorded catalog length without refreshing the checksum.
        patch(&path, 24, &1u64.to_le_bytes());

        let err = Store::open(&path).expect_err("checksum");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.message().unwrap().contains("checksum"));
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("short.coffer");
        std::fs::write(&path, &super::MAGIC[..]).expect("write");

        let err = declared_page_size(&path).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
