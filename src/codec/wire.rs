//! Tagged binary encoding for [`Value`].
//!
//! Wire format (one tag byte per value, multi-byte fields little-endian):
//! ```text
//! nil      'z'
//! bool     't' | 'f'
//! string   's' len:u32 utf8-bytes
//! bytes    '!' len:u32 raw-bytes
//! double   'd' ieee754-bits:u64
//! integer  tag zigzag-varint        tags: i u w m q p l n
//! list     '{' value* '}'
//! map      '[' (key value)* ']'
//! ```
//! Integers are widened to 64 bits (unsigned ones reinterpreted as `i64`), zig-zag
//! mapped and written as a base-128 varint with continuation bit `0x80`.

use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

use super::value::Value;

pub const TAG_NIL: u8 = b'z';
pub const TAG_TRUE: u8 = b't';
pub const TAG_FALSE: u8 = b'f';
pub const TAG_STRING: u8 = b's';
pub const TAG_BYTES: u8 = b'!';
pub const TAG_DOUBLE: u8 = b'd';
pub const TAG_INT: u8 = b'i';
pub const TAG_UINT: u8 = b'u';
pub const TAG_I16: u8 = b'w';
pub const TAG_U16: u8 = b'm';
pub const TAG_I32: u8 = b'q';
pub const TAG_U32: u8 = b'p';
pub const TAG_I64: u8 = b'l';
pub const TAG_U64: u8 = b'n';
pub const TAG_LIST_BEGIN: u8 = b'{';
pub const TAG_LIST_END: u8 = b'}';
pub const TAG_MAP_BEGIN: u8 = b'[';
pub const TAG_MAP_END: u8 = b']';

/// Nesting limit for lists and maps on decode.
pub const MAX_DEPTH: usize = 64;

const MAX_VARINT_LEN: usize = 10;

/// Failure to decode wire bytes. Decoding never reads past the input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unknown tag byte 0x{0:02X}")]
    UnknownTag(u8),

    #[error("varint exceeds 64 bits")]
    VarintOverflow,

    #[error("varint has redundant continuation bytes")]
    NonCanonicalVarint,

    #[error("integer {value} out of range for tag '{tag}'")]
    IntegerOutOfRange { tag: char, value: i64 },

    #[error("string is not valid utf-8")]
    InvalidUtf8,

    #[error("nesting deeper than {MAX_DEPTH}")]
    TooDeep,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Encode one value into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(&mut buf, value);
    buf
}

/// Append the encoding of `value` to `buf`.
///
/// # Panics
///
/// Panics on a string or blob longer than `u32::MAX` bytes.
pub fn encode_into(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Nil => buf.push(TAG_NIL),
        Value::Bool(true) => buf.push(TAG_TRUE),
        Value::Bool(false) => buf.push(TAG_FALSE),
        Value::String(s) => encode_blob(buf, TAG_STRING, s.as_bytes()),
        Value::Bytes(b) => encode_blob(buf, TAG_BYTES, b),
        Value::Double(d) => {
            buf.push(TAG_DOUBLE);
            buf.extend_from_slice(&d.to_bits().to_le_bytes());
        }
        Value::Int(v) => encode_integer(buf, TAG_INT, *v),
        Value::UInt(v) => encode_integer(buf, TAG_UINT, *v as i64),
        Value::I16(v) => encode_integer(buf, TAG_I16, i64::from(*v)),
        Value::U16(v) => encode_integer(buf, TAG_U16, i64::from(*v)),
        Value::I32(v) => encode_integer(buf, TAG_I32, i64::from(*v)),
        Value::U32(v) => encode_integer(buf, TAG_U32, i64::from(*v)),
        Value::I64(v) => encode_integer(buf, TAG_I64, *v),
        Value::U64(v) => encode_integer(buf, TAG_U64, *v as i64),
        Value::List(items) => {
            buf.push(TAG_LIST_BEGIN);
            for item in items {
                encode_into(buf, item);
            }
            buf.push(TAG_LIST_END);
        }
        Value::Map(map) => {
            buf.push(TAG_MAP_BEGIN);
            for (key, val) in map {
                encode_into(buf, key);
                encode_into(buf, val);
            }
            buf.push(TAG_MAP_END);
        }
    }
}

/// Encode a sequence of values back to back (an argument list without brackets).
pub fn encode_args(args: &[Value]) -> Vec<u8> {
    let mut buf = Vec::new();
    for arg in args {
        encode_into(&mut buf, arg);
    }
    buf
}

fn encode_blob(buf: &mut Vec<u8>, tag: u8, data: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(&blob_len(data.len()).to_le_bytes());
    buf.extend_from_slice(data);
}

/// The 4-byte length field of a string or blob.
///
/// # Panics
///
/// Panics when `len` does not fit in a `u32`. Such a value is outside the
/// format's domain and truncating the prefix would desync every later value.
fn blob_len(len: usize) -> u32 {
    u32::try_from(len)
        .unwrap_or_else(|_| panic!("{} byte string or blob exceeds the u32 length field", len))
}

fn encode_integer(buf: &mut Vec<u8>, tag: u8, value: i64) {
    buf.push(tag);
    write_varint(buf, zigzag_encode(value));
}

/// Map signed integers onto unsigned so small magnitudes stay short.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

/// Append `value` as a little-endian base-128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decode exactly one value; trailing bytes are an error.
pub fn decode(input: &[u8]) -> Result<Value, DecodeError> {
    let mut reader = Reader::new(input);
    let value = reader.value(0)?;
    match reader.remaining() {
        0 => Ok(value),
        n => Err(DecodeError::TrailingBytes(n)),
    }
}

/// Decode one value from the front of `input`, returning it with the unread tail.
pub fn decode_prefix(input: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    let mut reader = Reader::new(input);
    let value = reader.value(0)?;
    Ok((value, reader.rest()))
}

/// Decode values back to back until the input is exhausted.
pub fn decode_args(input: &[u8]) -> Result<Vec<Value>, DecodeError> {
    let mut reader = Reader::new(input);
    let mut args = Vec::new();
    while reader.remaining() > 0 {
        args.push(reader.value(0)?);
    }
    Ok(args)
}

/// Bounds-checked cursor over the input.
struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn rest(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.input.get(self.pos).copied().ok_or(DecodeError::Truncated {
            needed: 1,
            remaining: 0,
        })
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = u32::from_le_bytes(self.fixed::<4>()?) as usize;
        self.take(len)
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut result: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.byte()?;
            let bits = u64::from(byte & 0x7f);
            if i == MAX_VARINT_LEN - 1 && bits > 1 {
                return Err(DecodeError::VarintOverflow);
            }
            result |= bits << (7 * i);
            if byte & 0x80 == 0 {
                if i > 0 && byte == 0 {
                    return Err(DecodeError::NonCanonicalVarint);
                }
                return Ok(result);
            }
        }
        Err(DecodeError::VarintOverflow)
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep);
        }
        let tag = self.byte()?;
        let value = match tag {
            TAG_NIL => Value::Nil,
            TAG_TRUE => Value::Bool(true),
            TAG_FALSE => Value::Bool(false),
            TAG_STRING => {
                let raw = self.blob()?;
                let s = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
                Value::String(s.to_owned())
            }
            TAG_BYTES => Value::Bytes(Bytes::copy_from_slice(self.blob()?)),
            TAG_DOUBLE => Value::Double(f64::from_bits(u64::from_le_bytes(self.fixed::<8>()?))),
            TAG_INT | TAG_UINT | TAG_I16 | TAG_U16 | TAG_I32 | TAG_U32 | TAG_I64 | TAG_U64 => {
                let raw = zigzag_decode(self.varint()?);
                make_integer(tag, raw)?
            }
            TAG_LIST_BEGIN => {
                let mut items = Vec::new();
                while self.peek()? != TAG_LIST_END {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Value::List(items)
            }
            TAG_MAP_BEGIN => {
                let mut map = BTreeMap::new();
                while self.peek()? != TAG_MAP_END {
                    let key = self.value(depth + 1)?;
                    let val = self.value(depth + 1)?;
                    map.insert(key, val);
                }
                self.pos += 1;
                Value::Map(map)
            }
            other => return Err(DecodeError::UnknownTag(other)),
        };
        Ok(value)
    }
}

fn make_integer(tag: u8, raw: i64) -> Result<Value, DecodeError> {
    let out_of_range = || DecodeError::IntegerOutOfRange {
        tag: tag as char,
        value: raw,
    };
    let value = match tag {
        TAG_INT => Value::Int(raw),
        TAG_UINT => Value::UInt(raw as u64),
        TAG_I16 => Value::I16(i16::try_from(raw).map_err(|_| out_of_range())?),
        TAG_U16 => Value::U16(u16::try_from(raw).map_err(|_| out_of_range())?),
        TAG_I32 => Value::I32(i32::try_from(raw).map_err(|_| out_of_range())?),
        TAG_U32 => Value::U32(u32::try_from(raw).map_err(|_| out_of_range())?),
        TAG_I64 => Value::I64(raw),
        TAG_U64 => Value::U64(raw as u64),
        other => return Err(DecodeError::UnknownTag(other)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_blob_length_field() {
        assert_eq!(blob_len(0), 0);
        assert_eq!(blob_len(u32::MAX as usize), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    #[should_panic(expected = "exceeds the u32 length field")]
    fn test_oversized_blob_is_fatal() {
        blob_len(u32::MAX as usize + 1);
    }

    #[test]
    fn test_scalar_layouts() {
        assert_eq!(encode(&Value::Nil), b"z");
        assert_eq!(encode(&Value::Bool(true)), b"t");
        assert_eq!(encode(&Value::from("hi")), b"s\x02\x00\x00\x00hi");
        assert_eq!(encode(&Value::from(vec![1u8, 2])), b"!\x02\x00\x00\x00\x01\x02");

        let mut expected = vec![b'd'];
        expected.extend_from_slice(&1.5f64.to_bits().to_le_bytes());
        assert_eq!(encode(&Value::Double(1.5)), expected);
    }

    #[test]
    fn test_integer_layouts() {
        assert_eq!(encode(&Value::I32(0)), b"q\x00");
        assert_eq!(encode(&Value::I32(-1)), b"q\x01");
        assert_eq!(encode(&Value::I32(1)), b"q\x02");
        assert_eq!(encode(&Value::I16(-64)), b"w\x7f");
        assert_eq!(encode(&Value::I16(64)), b"w\x80\x01");
        assert_eq!(encode(&Value::Int(300)), b"i\xd8\x04");
    }

    #[test]
    fn test_container_layouts() {
        let list = Value::List(args![true, Value::Nil]);
        assert_eq!(encode(&list), b"{tz}");

        let mut map = BTreeMap::new();
        map.insert(Value::from("k"), Value::Bool(false));
        assert_eq!(encode(&Value::Map(map)), b"[s\x01\x00\x00\x00kf]");
    }

    #[test]
    fn test_integer_boundaries_round_trip() {
        let values = vec![
            Value::I16(i16::MIN),
            Value::I16(i16::MAX),
            Value::U16(u16::MAX),
            Value::I32(i32::MIN),
            Value::I32(i32::MAX),
            Value::U32(u32::MAX),
            Value::I64(i64::MIN),
            Value::I64(i64::MAX),
            Value::U64(u64::MAX),
            Value::U64(0),
            Value::Int(i64::MIN),
            Value::Int(i64::MAX),
            Value::UInt(u64::MAX),
        ];
        for v in values {
            assert_eq!(decode(&encode(&v)).unwrap(), v);
        }
    }

    #[test]
    fn test_varint_is_minimal() {
        for (value, len) in [(0u64, 1), (127, 1), (128, 2), (16_383, 2), (16_384, 3), (u64::MAX, 10)] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf.len(), len, "value {value}");
            assert_eq!(buf.last().copied().unwrap_or(0) & 0x80, 0);
        }
    }

    #[test]
    fn test_nested_depth_three() {
        let mut inner = BTreeMap::new();
        inner.insert(Value::I64(7), Value::List(args!["deep", 2.5]));
        let value = Value::List(vec![
            Value::List(vec![Value::Map(inner)]),
            Value::from(vec![0u8, 255]),
        ]);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_truncated_string_does_not_overread() {
        let err = decode(b"s\x05\x00\x00\x00abc").unwrap_err();
        assert_eq!(err, DecodeError::Truncated { needed: 5, remaining: 3 });

        let err = decode(b"s\x05\x00").unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_unterminated_list_and_map() {
        assert!(matches!(decode(b"{tt").unwrap_err(), DecodeError::Truncated { .. }));
        assert!(matches!(decode(b"[zt").unwrap_err(), DecodeError::Truncated { .. }));
        // Key present, value missing
        assert!(matches!(decode(b"[z").unwrap_err(), DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_unknown_tag_and_trailing_bytes() {
        assert_eq!(decode(b"x").unwrap_err(), DecodeError::UnknownTag(b'x'));
        assert_eq!(decode(b"zz").unwrap_err(), DecodeError::TrailingBytes(1));
    }

    #[test]
    fn test_varint_overflow_and_non_canonical() {
        let mut overlong = vec![b'l'];
        overlong.extend_from_slice(&[0xff; 10]);
        overlong.push(0x01);
        assert_eq!(decode(&overlong).unwrap_err(), DecodeError::VarintOverflow);

        assert_eq!(decode(b"l\x80\x00").unwrap_err(), DecodeError::NonCanonicalVarint);
        assert!(matches!(decode(b"l\x80").unwrap_err(), DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_width_range_enforced() {
        // zigzag(70000) under the i16 tag
        let mut buf = vec![TAG_I16];
        write_varint(&mut buf, zigzag_encode(70_000));
        assert!(matches!(
            decode(&buf).unwrap_err(),
            DecodeError::IntegerOutOfRange { tag: 'w', value: 70_000 }
        ));
    }

    #[test]
    fn test_depth_limit() {
        let mut buf = vec![TAG_LIST_BEGIN; MAX_DEPTH + 2];
        buf.extend(vec![TAG_LIST_END; MAX_DEPTH + 2]);
        assert_eq!(decode(&buf).unwrap_err(), DecodeError::TooDeep);
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(decode(b"s\x01\x00\x00\x00\xff").unwrap_err(), DecodeError::InvalidUtf8);
    }

    #[test]
    fn test_args_sequence() {
        let args = args![1, "a", Value::Nil];
        let bytes = encode_args(&args);
        assert_eq!(decode_args(&bytes).unwrap(), args);
        assert!(decode_args(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_prefix_returns_tail() {
        let (value, rest) = decode_prefix(b"tzq\x02").unwrap();
        assert_eq!(value, Value::Bool(true));
        assert_eq!(rest, b"zq\x02");
    }
}
