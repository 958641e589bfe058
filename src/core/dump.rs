//! Purpose: Traverse the Containers hierarchy and stream it as one JSON document.
//! Exports: `dump`, `ContainerIds`, `CONTAINERS_TABLE`, `container_table_name`.
//! Role: The traversal core; engine access stays behind the cursor traits and
//! output goes through the stream writer, so both sides are substitutable.
//! Invariants: Containers is fully enumerated and closed before any container
//! table opens; each container table is fully serialized before the next.
//! Invariants: Row properties follow the table's descriptor order, every row.

use std::io::Write;

use crate::core::column::{ColumnDescriptor, ColumnId};
use crate::core::decode::{DecodedValue, UNRECOGNIZED, decode, guid_string, hex_pairs};
use crate::core::engine::{Connection, RowCursor};
use crate::core::error::{Error, ErrorKind};
use crate::core::json::JsonWriter;

pub const CONTAINERS_TABLE: &str = "Containers";
pub const CONTAINER_ID_COLUMN: &str = "ContainerId";

pub fn container_table_name(id: i32) -> String {
    format!("Container_{id}")
}

/// Lazy, single-pass enumeration of container identifiers. Rows whose
/// ContainerId is null are skipped silently; this is the only place where an
/// absent value means "skip" rather than an error.
pub struct ContainerIds<C: RowCursor> {
    cursor: C,
    id_column: ColumnId,
    started: bool,
}

impl<C: RowCursor> ContainerIds<C> {
    pub fn new(cursor: C) -> Result<Self, Error> {
        let id_column = cursor
            .columns()
            .iter()
            .find(|descriptor| descriptor.name == CONTAINER_ID_COLUMN)
            .map(|descriptor| descriptor.id)
            .ok_or_else(|| {
                Error::new(ErrorKind::Corrupt)
                    .with_message("Containers table has no ContainerId column")
                    .with_table(CONTAINERS_TABLE)
            })?;
        Ok(Self {
            cursor,
            id_column,
            started: false,
        })
    }
}

impl<C: RowCursor> Iterator for ContainerIds<C> {
    type Item = Result<i32, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let moved = if self.started {
                self.cursor.move_next()
            } else {
                self.started = true;
                self.cursor.move_first()
            };
            match moved {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => return Some(Err(err)),
            }
            match self.cursor.retrieve(self.id_column) {
                Ok(None) => continue,
                Ok(Some(bytes)) => return Some(decode_container_id(bytes)),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

fn decode_container_id(bytes: &[u8]) -> Result<i32, Error> {
    let bytes: [u8; 4] = bytes.try_into().map_err(|_| {
        Error::new(ErrorKind::Corrupt)
            .with_message("ContainerId cell is not a 32-bit integer")
            .with_table(CONTAINERS_TABLE)
    })?;
    Ok(i32::from_le_bytes(bytes))
}

/// Dumps the whole database as one JSON document:
/// `{"containers":[{"Container_<id>":{"data":[...]}},...]}`.
///
/// A container identifier naming a missing table is fatal; the Containers row
/// is a contract that the table exists. Output is flushed incrementally, so
/// an aborted dump can leave a truncated document behind.
pub fn dump<C: Connection>(conn: &C, out: impl Write) -> Result<(), Error> {
    let mut writer = JsonWriter::new(out);

    let ids = {
        let cursor = conn.open_table(CONTAINERS_TABLE)?;
        ContainerIds::new(cursor)?.collect::<Result<Vec<i32>, Error>>()?
    };
    tracing::debug!(containers = ids.len(), "enumerated container ids");

    writer.begin_object()?;
    writer.property("containers")?;
    writer.begin_array()?;
    for id in ids {
        write_container(conn, &mut writer, id)?;
    }
    writer.end_array()?;
    writer.end_object()?;
    writer.finish()
}

fn write_container<C: Connection, W: Write>(
    conn: &C,
    writer: &mut JsonWriter<W>,
    id: i32,
) -> Result<(), Error> {
    let name = container_table_name(id);
    tracing::debug!(table = %name, "serializing container");
    let mut cursor = conn.open_table(&name)?;
    let columns: Vec<ColumnDescriptor> = cursor.columns().to_vec();

    writer.begin_object()?;
    writer.property(&name)?;
    writer.begin_object()?;
    writer.property("data")?;
    writer.begin_array()?;

    let mut has_row = cursor.move_first()?;
    while has_row {
        writer.begin_object()?;
        for column in &columns {
            writer.property(&column.name)?;
            let value = decode(cursor.retrieve(column.id)?, column.tag)?;
            write_value(writer, &value)?;
        }
        writer.end_object()?;
        has_row = cursor.move_next()?;
    }

    writer.end_array()?;
    writer.end_object()?;
    writer.end_object()?;
    Ok(())
}

fn write_value<W: Write>(writer: &mut JsonWriter<W>, value: &DecodedValue) -> Result<(), Error> {
    match value {
        DecodedValue::Empty => writer.string(""),
        DecodedValue::Null => writer.null(),
        DecodedValue::Bool(value) => writer.bool(*value),
        DecodedValue::UInt8(value) => writer.uint(u64::from(*value)),
        DecodedValue::UInt16(value) => writer.uint(u64::from(*value)),
        DecodedValue::UInt32(value) => writer.uint(u64::from(*value)),
        DecodedValue::Int16(value) => writer.int(i64::from(*value)),
        DecodedValue::Int32(value) => writer.int(i64::from(*value)),
        DecodedValue::Int64(value) => writer.int(*value),
        DecodedValue::Float64(value) => writer.float(*value),
        DecodedValue::Binary(bytes) => writer.string(&hex_pairs(bytes)),
        DecodedValue::Text(text) => writer.string(text),
        DecodedValue::Guid(bytes) => writer.string(&guid_string(bytes)),
        DecodedValue::Unrecognized(_) => writer.string(UNRECOGNIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::{CONTAINERS_TABLE, container_table_name, dump};
    use crate::core::column::{ColumnDescriptor, ColumnId, StorageTag};
    use crate::core::error::ErrorKind;
    use crate::core::mem::MemDb;

    fn utf16(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
    }

    fn id_cell(id: i32) -> Option<Vec<u8>> {
        Some(id.to_le_bytes().to_vec())
    }

    fn containers_column() -> Vec<ColumnDescriptor> {
        vec![ColumnDescriptor::new(
            "ContainerId",
            StorageTag::Long,
            ColumnId(1),
        )]
    }

    fn dump_string(db: &MemDb) -> String {
        let mut out = Vec::new();
        dump(db, &mut out).expect("dump");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn end_to_end_matches_expected_document() {
        let mut db = MemDb::new();
        db.insert_table(
            CONTAINERS_TABLE,
            containers_column(),
            vec![vec![id_cell(1)], vec![None], vec![id_cell(3)]],
        );
        db.insert_table(
            "Container_1",
            vec![ColumnDescriptor::new("Name", StorageTag::Text, ColumnId(1))],
            vec![vec![Some(utf16("A"))]],
        );
        db.insert_table("Container_3", Vec::new(), Vec::new());

        assert_eq!(
            dump_string(&db),
            r#"{"containers":[{"Container_1":{"data":[{"Name":"A"}]}},{"Container_3":{"data":[]}}]}"#
        );
    }

    #[test]
    fn empty_containers_table_is_well_formed() {
        let mut db = MemDb::new();
        db.insert_table(CONTAINERS_TABLE, containers_column(), Vec::new());
        assert_eq!(dump_string(&db), r#"{"containers":[]}"#);
    }

    #[test]
    fn all_null_ids_yield_no_entries() {
        let mut db = MemDb::new();
        db.insert_table(
            CONTAINERS_TABLE,
            containers_column(),
            vec![vec![None], vec![None]],
        );
        assert_eq!(dump_string(&db), r#"{"containers":[]}"#);
    }

    #[test]
    fn missing_container_table_is_fatal() {
        let mut db = MemDb::new();
        db.insert_table(CONTAINERS_TABLE, containers_column(), vec![vec![id_cell(7)]]);

        let err = dump(&db, Vec::new()).expect_err("missing table");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.table(), Some(container_table_name(7).as_str()));
    }

    #[test]
    fn missing_containers_table_is_fatal() {
        let db = MemDb::new();
        let err = dump(&db, Vec::new()).expect_err("no containers");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn missing_id_column_is_corrupt() {
        let mut db = MemDb::new();
        db.insert_table(
            CONTAINERS_TABLE,
            vec![ColumnDescriptor::new("Other", StorageTag::Long, ColumnId(1))],
            Vec::new(),
        );
        let err = dump(&db, Vec::new()).expect_err("no id column");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn malformed_container_id_is_corrupt() {
        let mut db = MemDb::new();
        db.insert_table(
            CONTAINERS_TABLE,
            containers_column(),
            vec![vec![Some(vec![1, 2])]],
        );
        let err = dump(&db, Vec::new()).expect_err("short id");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn values_keep_their_json_types() {
        let mut db = MemDb::new();
        db.insert_table(CONTAINERS_TABLE, containers_column(), vec![vec![id_cell(2)]]);
        db.insert_table(
            "Container_2",
            vec![
                ColumnDescriptor::new("Flag", StorageTag::Bit, ColumnId(1)),
                ColumnDescriptor::new("Blob", StorageTag::Binary, ColumnId(2)),
                ColumnDescriptor::new("Price", StorageTag::Currency, ColumnId(3)),
                ColumnDescriptor {
                    name: "Mystery".into(),
                    tag: 42,
                    id: ColumnId(4),
                },
                ColumnDescriptor::new("Note", StorageTag::Text, ColumnId(5)),
            ],
            vec![vec![
                Some(vec![1]),
                Some(vec![0xDE, 0xAD]),
                Some(9999i64.to_le_bytes().to_vec()),
                Some(vec![0]),
                None,
            ]],
        );

        assert_eq!(
            dump_string(&db),
            r#"{"containers":[{"Container_2":{"data":[{"Flag":true,"Blob":"DE-AD","Price":9999,"Mystery":"type not recognised","Note":null}]}}]}"#
        );
    }

    #[test]
    fn null_binary_is_empty_string() {
        let mut db = MemDb::new();
        db.insert_table(CONTAINERS_TABLE, containers_column(), vec![vec![id_cell(4)]]);
        db.insert_table(
            "Container_4",
            vec![ColumnDescriptor::new("Blob", StorageTag::LongBinary, ColumnId(1))],
            vec![vec![None]],
        );
        assert_eq!(
            dump_string(&db),
            r#"{"containers":[{"Container_4":{"data":[{"Blob":""}]}}]}"#
        );
    }

    #[test]
    fn column_order_is_stable_across_rows() {
        let mut db = MemDb::new();
        db.insert_table(CONTAINERS_TABLE, containers_column(), vec![vec![id_cell(5)]]);
        db.insert_table(
            "Container_5",
            vec![
                ColumnDescriptor::new("Zeta", StorageTag::Long, ColumnId(9)),
                ColumnDescriptor::new("Alpha", StorageTag::Long, ColumnId(3)),
            ],
            vec![
                vec![id_cell(1), id_cell(2)],
                vec![id_cell(3), id_cell(4)],
            ],
        );

        assert_eq!(
            dump_string(&db),
            r#"{"containers":[{"Container_5":{"data":[{"Zeta":1,"Alpha":2},{"Zeta":3,"Alpha":4}]}}]}"#
        );
    }

    #[test]
    fn entries_follow_enumeration_order() {
        let mut db = MemDb::new();
        db.insert_table(
            CONTAINERS_TABLE,
            containers_column(),
            vec![vec![id_cell(9)], vec![id_cell(2)]],
        );
        db.insert_table("Container_9", Vec::new(), Vec::new());
        db.insert_table("Container_2", Vec::new(), Vec::new());

        assert_eq!(
            dump_string(&db),
            r#"{"containers":[{"Container_9":{"data":[]}},{"Container_2":{"data":[]}}]}"#
        );
    }
}
