// Column storage tags and descriptors shared by the store, decoder, and dumper.
use serde::Serialize;

/// Storage tag codes as the engine defines them on disk. Code 13 is retired
/// and intentionally absent; anything outside this set is carried as a raw
/// byte and decodes to the unrecognized sentinel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum StorageTag {
    Nil = 0,
    Bit = 1,
    UnsignedByte = 2,
    Short = 3,
    Long = 4,
    Currency = 5,
    IeeeSingle = 6,
    IeeeDouble = 7,
    DateTime = 8,
    Binary = 9,
    Text = 10,
    LongBinary = 11,
    LongText = 12,
    UnsignedLong = 14,
    LongLong = 15,
    Guid = 16,
    UnsignedShort = 17,
}

impl StorageTag {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Nil,
            1 => Self::Bit,
            2 => Self::UnsignedByte,
            3 => Self::Short,
            4 => Self::Long,
            5 => Self::Currency,
            6 => Self::IeeeSingle,
            7 => Self::IeeeDouble,
            8 => Self::DateTime,
            9 => Self::Binary,
            10 => Self::Text,
            11 => Self::LongBinary,
            12 => Self::LongText,
            14 => Self::UnsignedLong,
            15 => Self::LongLong,
            16 => Self::Guid,
            17 => Self::UnsignedShort,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

/// Engine-assigned column identifier, opaque to callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct ColumnId(pub u32);

/// One column of a table. The ordered descriptor sequence is fixed for the
/// lifetime of a table handle and defines JSON property order for its rows.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub tag: u8,
    pub id: ColumnId,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, tag: StorageTag, id: ColumnId) -> Self {
        Self {
            name: name.into(),
            tag: tag.as_raw(),
            id,
        }
    }

    pub fn storage_tag(&self) -> Option<StorageTag> {
        StorageTag::from_raw(self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::StorageTag;

    #[test]
    fn raw_codes_round_trip() {
        for raw in 0u8..=17 {
            match StorageTag::from_raw(raw) {
                Some(tag) => assert_eq!(tag.as_raw(), raw),
                None => assert_eq!(raw, 13),
            }
        }
        assert!(StorageTag::from_raw(18).is_none());
        assert!(StorageTag::from_raw(255).is_none());
    }
}
