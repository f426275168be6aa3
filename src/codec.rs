//! Binary wire codec for [`Value`] trees.
//!
//! Every variant is prefixed with a one-byte type discriminant. Scalars are
//! fixed-width little-endian; strings and byte buffers carry an unsigned
//! LEB128 length prefix followed by raw bytes; lists, maps and structs carry
//! an element (or pair) count followed by their encoded children.
//!
//! The codec is schema-agnostic: it only knows the closed [`Value`] variants.
//! Decoding is total over arbitrary bytes and never panics; the wire side may
//! be a stale peer or a version-mismatched build, so every malformation maps
//! to a typed [`DecodeError`].

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::value::{Value, ValueMap};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_FLOAT64: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_ENUM: u8 = 8;
const TAG_STRUCT: u8 = 9;

/// Maximum nesting depth accepted by `decode`. Deeper input is rejected with
/// [`DecodeError::NestingTooDeep`] instead of risking stack exhaustion.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Typed decode failure. None of these abort the process; the dispatcher
/// turns them into an error response and carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes remained than a field declared.
    TruncatedInput,
    /// Unrecognized type discriminant.
    UnknownTypeTag(u8),
    /// A length prefix that overflows or exceeds the remaining input.
    MalformedLength,
    /// A string field that is not valid UTF-8.
    InvalidUtf8,
    /// Well-formed value followed by leftover bytes.
    TrailingBytes,
    /// Nesting beyond [`MAX_NESTING_DEPTH`].
    NestingTooDeep,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TruncatedInput => write!(f, "truncated input"),
            DecodeError::UnknownTypeTag(tag) => write!(f, "unknown type tag {}", tag),
            DecodeError::MalformedLength => write!(f, "malformed length prefix"),
            DecodeError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            DecodeError::TrailingBytes => write!(f, "trailing bytes after value"),
            DecodeError::NestingTooDeep => {
                write!(f, "nesting exceeds {} levels", MAX_NESTING_DEPTH)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encodes a value into its wire representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(&mut buf, value);
    buf
}

/// Decodes exactly one value from `bytes`, requiring full consumption.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let value = read_value(&mut cursor, 0)?;
    if cursor.position() != bytes.len() as u64 {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(if *b { 1 } else { 0 });
        }
        Value::Int64(i) => {
            buf.push(TAG_INT64);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float64(d) => {
            buf.push(TAG_FLOAT64);
            buf.extend_from_slice(&d.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(TAG_STRING);
            write_varint(buf, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            write_varint(buf, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::List(items) => {
            buf.push(TAG_LIST);
            write_varint(buf, items.len() as u64);
            for item in items {
                write_value(buf, item);
            }
        }
        Value::Map(map) => {
            buf.push(TAG_MAP);
            write_varint(buf, map.len() as u64);
            for (k, v) in map.iter() {
                write_value(buf, k);
                write_value(buf, v);
            }
        }
        Value::Enum(ordinal) => {
            buf.push(TAG_ENUM);
            buf.extend_from_slice(&ordinal.to_le_bytes());
        }
        Value::Struct(fields) => {
            buf.push(TAG_STRUCT);
            write_varint(buf, fields.len() as u64);
            for field in fields {
                write_value(buf, field);
            }
        }
    }
}

fn write_varint(buf: &mut Vec<u8>, mut n: u64) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn read_value(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Value, DecodeError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(DecodeError::NestingTooDeep);
    }
    let tag = cursor.read_u8().map_err(|_| DecodeError::TruncatedInput)?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => {
            let b = cursor.read_u8().map_err(|_| DecodeError::TruncatedInput)?;
            Ok(Value::Bool(b != 0))
        }
        TAG_INT64 => {
            let i = cursor
                .read_i64::<LittleEndian>()
                .map_err(|_| DecodeError::TruncatedInput)?;
            Ok(Value::Int64(i))
        }
        TAG_FLOAT64 => {
            let d = cursor
                .read_f64::<LittleEndian>()
                .map_err(|_| DecodeError::TruncatedInput)?;
            Ok(Value::Float64(d))
        }
        TAG_STRING => {
            let bytes = read_length_prefixed(cursor)?;
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| DecodeError::InvalidUtf8)
        }
        TAG_BYTES => Ok(Value::Bytes(read_length_prefixed(cursor)?)),
        TAG_LIST => {
            let count = read_count(cursor)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_value(cursor, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let count = read_count(cursor)?;
            let mut map = ValueMap::new();
            for _ in 0..count {
                let key = read_value(cursor, depth + 1)?;
                let value = read_value(cursor, depth + 1)?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        TAG_ENUM => {
            let ordinal = cursor
                .read_i32::<LittleEndian>()
                .map_err(|_| DecodeError::TruncatedInput)?;
            Ok(Value::Enum(ordinal))
        }
        TAG_STRUCT => {
            let count = read_count(cursor)?;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                fields.push(read_value(cursor, depth + 1)?);
            }
            Ok(Value::Struct(fields))
        }
        unknown => Err(DecodeError::UnknownTypeTag(unknown)),
    }
}

fn read_varint(cursor: &mut Cursor<&[u8]>) -> Result<u64, DecodeError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        if shift >= 64 {
            return Err(DecodeError::MalformedLength);
        }
        let byte = cursor.read_u8().map_err(|_| DecodeError::TruncatedInput)?;
        // The tenth byte holds only bit 64's predecessor; anything above it
        // would be shifted out of the u64 and alias a smaller value.
        if shift == 63 && (byte & 0x7f) > 1 {
            return Err(DecodeError::MalformedLength);
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    (cursor.get_ref().len() as u64).saturating_sub(cursor.position())
}

/// Reads a byte-length prefix and the bytes it declares.
fn read_length_prefixed(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, DecodeError> {
    let len = read_varint(cursor)?;
    if len > remaining(cursor) {
        return Err(DecodeError::TruncatedInput);
    }
    let len = usize::try_from(len).map_err(|_| DecodeError::MalformedLength)?;
    let mut bytes = vec![0u8; len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|_| DecodeError::TruncatedInput)?;
    Ok(bytes)
}

/// Reads an element count, rejecting counts that cannot possibly fit in the
/// remaining input (each element is at least one tag byte). This keeps a
/// hostile count prefix from pre-allocating unbounded memory.
fn read_count(cursor: &mut Cursor<&[u8]>) -> Result<usize, DecodeError> {
    let count = read_varint(cursor)?;
    if count > remaining(cursor) {
        return Err(DecodeError::TruncatedInput);
    }
    usize::try_from(count).map_err(|_| DecodeError::MalformedLength)
}
