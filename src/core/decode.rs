//! Purpose: Map raw cell bytes plus a storage tag to a JSON-compatible value.
//! Exports: `DecodedValue`, `decode`, `hex_pairs`, `guid_string`, `UNRECOGNIZED`.
//! Role: The single translation point between engine storage and output values.
//! Invariants: Every defined tag decodes bit-exactly per its storage form;
//! unknown tags decode to the sentinel string, never to an error.
//! Invariants: Currency and date-time pass through as raw storage numbers.

use crate::core::column::StorageTag;
use crate::core::error::{Error, ErrorKind};

/// Sentinel emitted for any storage tag outside the defined set.
pub const UNRECOGNIZED: &str = "type not recognised";

/// A decoded cell. `Empty` is the Nil tag's empty-string form; `Null` is an
/// absent cell of any typed column (binary columns map absence to empty
/// bytes instead).
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedValue {
    Empty,
    Null,
    Bool(bool),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Float64(f64),
    Binary(Vec<u8>),
    Text(String),
    Guid([u8; 16]),
    Unrecognized(u8),
}

/// Decodes one cell. Total over tags: unknown tags yield `Unrecognized`, and
/// the only error path is a cell whose width contradicts its fixed-width tag,
/// which is engine corruption rather than a decode outcome.
pub fn decode(raw: Option<&[u8]>, tag: u8) -> Result<DecodedValue, Error> {
    let Some(tag) = StorageTag::from_raw(tag) else {
        return Ok(DecodedValue::Unrecognized(tag));
    };

    let Some(bytes) = raw else {
        return Ok(match tag {
            StorageTag::Nil => DecodedValue::Empty,
            StorageTag::Binary | StorageTag::LongBinary => DecodedValue::Binary(Vec::new()),
            _ => DecodedValue::Null,
        });
    };

    Ok(match tag {
        StorageTag::Nil => DecodedValue::Empty,
        StorageTag::Bit => DecodedValue::Bool(fixed::<1>(bytes)?[0] != 0),
        StorageTag::UnsignedByte => DecodedValue::UInt8(fixed::<1>(bytes)?[0]),
        StorageTag::Short => DecodedValue::Int16(i16::from_le_bytes(fixed(bytes)?)),
        StorageTag::UnsignedShort => DecodedValue::UInt16(u16::from_le_bytes(fixed(bytes)?)),
        StorageTag::Long => DecodedValue::Int32(i32::from_le_bytes(fixed(bytes)?)),
        StorageTag::UnsignedLong => DecodedValue::UInt32(u32::from_le_bytes(fixed(bytes)?)),
        // Currency stays in raw 64-bit integer units; no decimal scaling.
        StorageTag::Currency | StorageTag::LongLong => {
            DecodedValue::Int64(i64::from_le_bytes(fixed(bytes)?))
        }
        StorageTag::IeeeSingle => {
            DecodedValue::Float64(f32::from_le_bytes(fixed(bytes)?) as f64)
        }
        // Date-time stays a raw floating-point serial; no calendar conversion.
        StorageTag::IeeeDouble | StorageTag::DateTime => {
            DecodedValue::Float64(f64::from_le_bytes(fixed(bytes)?))
        }
        StorageTag::Binary | StorageTag::LongBinary => DecodedValue::Binary(bytes.to_vec()),
        StorageTag::Text | StorageTag::LongText => DecodedValue::Text(utf16_le(bytes)),
        StorageTag::Guid => DecodedValue::Guid(fixed(bytes)?),
    })
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], Error> {
    bytes.try_into().map_err(|_| {
        Error::new(ErrorKind::Corrupt).with_message(format!(
            "cell is {} bytes, expected {N}",
            bytes.len()
        ))
    })
}

fn utf16_le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Uppercase hex byte pairs joined by `-`: `[0xDE, 0xAD]` becomes `DE-AD`.
pub fn hex_pairs(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            out.push('-');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// Canonical lowercase hyphenated identifier text, straight byte order.
pub fn guid_string(bytes: &[u8; 16]) -> String {
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
