//! AMF0 encoder and decoder
//!
//! Reference: AMF0 File Format Specification (amf0-file-format-specification.pdf)
//!
//! Type markers used by the publish command exchange:
//! ```text
//! 0x00 - Number (IEEE 754 double, big-endian)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x08 - ECMA Array (32-bit associative count, then key-value pairs)
//! 0x09 - Object End (0x000009 sequence)
//! ```
//!
//! Decoding is typed: callers state the kind they expect and get a
//! `KindMismatch` carrying the observed marker when the stream disagrees.
//! All functions operate on a `Bytes` cursor, so consumption falls out of the
//! cursor position.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::AmfValue;
use crate::error::AmfError;

pub const MARKER_NUMBER: u8 = 0x00;
pub const MARKER_BOOLEAN: u8 = 0x01;
pub const MARKER_STRING: u8 = 0x02;
pub const MARKER_OBJECT: u8 = 0x03;
pub const MARKER_NULL: u8 = 0x05;
pub const MARKER_ECMA_ARRAY: u8 = 0x08;
pub const MARKER_OBJECT_END: u8 = 0x09;

/// Decode a single value of any supported kind.
pub fn decode(buf: &mut Bytes) -> Result<AmfValue, AmfError> {
    if buf.is_empty() {
        return Err(AmfError::UnexpectedEof);
    }
    let marker = buf.get_u8();
    decode_value(marker, buf)
}

/// Decode a string, failing if the next value is any other kind.
pub fn read_string(buf: &mut Bytes) -> Result<String, AmfError> {
    expect_marker(buf, MARKER_STRING, "string")?;
    read_utf8(buf)
}

/// Decode a number, failing if the next value is any other kind.
pub fn read_number(buf: &mut Bytes) -> Result<f64, AmfError> {
    expect_marker(buf, MARKER_NUMBER, "number")?;
    if buf.remaining() < 8 {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(buf.get_f64())
}

/// Decode a boolean, failing if the next value is any other kind.
pub fn read_boolean(buf: &mut Bytes) -> Result<bool, AmfError> {
    expect_marker(buf, MARKER_BOOLEAN, "boolean")?;
    if buf.is_empty() {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(buf.get_u8() != 0)
}

/// Decode a null, failing if the next value is any other kind.
pub fn read_null(buf: &mut Bytes) -> Result<(), AmfError> {
    expect_marker(buf, MARKER_NULL, "null")?;
    Ok(())
}

/// Decode an object, failing if the next value is any other kind.
pub fn read_object(buf: &mut Bytes) -> Result<HashMap<String, AmfValue>, AmfError> {
    expect_marker(buf, MARKER_OBJECT, "object")?;
    read_pairs(buf)
}

/// Decode an ECMA array, failing if the next value is any other kind.
pub fn read_ecma_array(buf: &mut Bytes) -> Result<HashMap<String, AmfValue>, AmfError> {
    expect_marker(buf, MARKER_ECMA_ARRAY, "ecma array")?;
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEof);
    }
    // The associative count is a hint; the end-of-object sentinel terminates.
    let _count = buf.get_u32();
    read_pairs(buf)
}

/// Decode either an object or a null, by peeking the marker byte.
///
/// `createStream` results carry a command object that servers set to null
/// when there is nothing to say; this is the explicit branch for it.
pub fn read_object_or_null(
    buf: &mut Bytes,
) -> Result<Option<HashMap<String, AmfValue>>, AmfError> {
    match peek_marker(buf)? {
        MARKER_NULL => {
            buf.advance(1);
            Ok(None)
        }
        _ => read_object(buf).map(Some),
    }
}

/// Look at the next marker without consuming it.
pub fn peek_marker(buf: &Bytes) -> Result<u8, AmfError> {
    if buf.is_empty() {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(buf[0])
}

fn expect_marker(buf: &mut Bytes, want: u8, expected: &'static str) -> Result<(), AmfError> {
    if buf.is_empty() {
        return Err(AmfError::UnexpectedEof);
    }
    let found = buf.get_u8();
    if found != want {
        return Err(AmfError::KindMismatch { expected, found });
    }
    Ok(())
}

fn decode_value(marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
    match marker {
        MARKER_NUMBER => {
            if buf.remaining() < 8 {
                return Err(AmfError::UnexpectedEof);
            }
            Ok(AmfValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            if buf.is_empty() {
                return Err(AmfError::UnexpectedEof);
            }
            Ok(AmfValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
        MARKER_OBJECT => Ok(AmfValue::Object(read_pairs(buf)?)),
        MARKER_NULL => Ok(AmfValue::Null),
        MARKER_ECMA_ARRAY => {
            if buf.remaining() < 4 {
                return Err(AmfError::UnexpectedEof);
            }
            let _count = buf.get_u32();
            Ok(AmfValue::EcmaArray(read_pairs(buf)?))
        }
        _ => Err(AmfError::UnknownMarker(marker)),
    }
}

/// Read key-value pairs up to the end-of-object sentinel.
///
/// An over-long key length stops the loop and returns whatever accumulated so
/// far instead of failing; peers have been seen emitting such objects and the
/// fields read up to that point are still usable.
fn read_pairs(buf: &mut Bytes) -> Result<HashMap<String, AmfValue>, AmfError> {
    let mut values = HashMap::new();

    loop {
        if buf.remaining() < 2 {
            return Err(AmfError::UnexpectedEof);
        }
        let key_len = buf.get_u16() as usize;

        if key_len == 0 {
            // End sentinel: empty key followed by the object-end marker.
            if buf.is_empty() {
                return Err(AmfError::UnexpectedEof);
            }
            let found = buf.get_u8();
            if found == MARKER_OBJECT_END {
                break;
            }
            return Err(AmfError::KindMismatch {
                expected: "object end",
                found,
            });
        }

        if key_len > buf.remaining() {
            tracing::warn!(
                key_len = key_len,
                remaining = buf.remaining(),
                "object key length overruns buffer, returning partial object"
            );
            break;
        }

        let key_bytes = buf.copy_to_bytes(key_len);
        let key = String::from_utf8(key_bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)?;

        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        let marker = buf.get_u8();
        let value = decode_value(marker, buf)?;
        values.insert(key, value);
    }

    Ok(values)
}

/// Read a UTF-8 string with 16-bit big-endian length prefix (no marker).
fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder appending typed values to an internal buffer.
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, resetting the encoder.
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a single value.
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => {
                self.buf.put_u8(MARKER_NULL);
            }
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                self.buf.put_u8(MARKER_STRING);
                self.write_utf8(s);
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                for (key, val) in props {
                    self.write_utf8(key);
                    self.encode(val);
                }
                self.write_end_marker();
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                for (key, val) in props {
                    self.write_utf8(key);
                    self.encode(val);
                }
                self.write_end_marker();
            }
        }
    }

    /// Append multiple values.
    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    /// Write a UTF-8 string with 16-bit length prefix (no type marker).
    fn write_utf8(&mut self, s: &str) {
        let len = s.len().min(u16::MAX as usize);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }

    fn write_end_marker(&mut self) {
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &AmfValue) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: AmfValue) {
        let encoded = encode(&value);
        let mut buf = encoded.clone();
        let decoded = decode(&mut buf).unwrap();
        assert_eq!(decoded, value);
        // The decoder must consume exactly what the encoder produced.
        assert_eq!(buf.remaining(), 0, "left {} bytes", buf.remaining());
    }

    #[test]
    fn test_number_roundtrip() {
        roundtrip(AmfValue::Number(42.5));
        roundtrip(AmfValue::Number(0.0));
        roundtrip(AmfValue::Number(-1.0));
    }

    #[test]
    fn test_string_roundtrip() {
        roundtrip(AmfValue::String("hello world".into()));
        roundtrip(AmfValue::String(String::new()));
    }

    #[test]
    fn test_boolean_and_null_roundtrip() {
        roundtrip(AmfValue::Boolean(true));
        roundtrip(AmfValue::Boolean(false));
        roundtrip(AmfValue::Null);
    }

    #[test]
    fn test_object_roundtrip() {
        let mut props = HashMap::new();
        props.insert("app".to_string(), AmfValue::String("live".into()));
        props.insert("capabilities".to_string(), AmfValue::Number(15.0));
        props.insert("fpad".to_string(), AmfValue::Boolean(false));
        roundtrip(AmfValue::Object(props));
        roundtrip(AmfValue::Object(HashMap::new()));
    }

    #[test]
    fn test_ecma_array_roundtrip() {
        let mut props = HashMap::new();
        props.insert("width".to_string(), AmfValue::Number(1280.0));
        props.insert("text".to_string(), AmfValue::String("hi".into()));
        roundtrip(AmfValue::EcmaArray(props));
    }

    #[test]
    fn test_nested_object_roundtrip() {
        let mut inner = HashMap::new();
        inner.insert("code".to_string(), AmfValue::String("ok".into()));
        let mut outer = HashMap::new();
        outer.insert("info".to_string(), AmfValue::Object(inner));
        outer.insert("nothing".to_string(), AmfValue::Null);
        roundtrip(AmfValue::Object(outer));
    }

    #[test]
    fn test_typed_reads() {
        let mut buf = encode(&AmfValue::String("connect".into()));
        assert_eq!(read_string(&mut buf).unwrap(), "connect");

        let mut buf = encode(&AmfValue::Number(1.0));
        assert_eq!(read_number(&mut buf).unwrap(), 1.0);

        let mut buf = encode(&AmfValue::Boolean(true));
        assert!(read_boolean(&mut buf).unwrap());

        let mut buf = encode(&AmfValue::Null);
        read_null(&mut buf).unwrap();
    }

    #[test]
    fn test_kind_mismatch_reports_marker() {
        let mut buf = encode(&AmfValue::Null);
        match read_string(&mut buf) {
            Err(AmfError::KindMismatch { expected, found }) => {
                assert_eq!(expected, "string");
                assert_eq!(found, MARKER_NULL);
            }
            other => panic!("expected kind mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_object_or_null() {
        let mut buf = encode(&AmfValue::Null);
        assert!(read_object_or_null(&mut buf).unwrap().is_none());

        let mut props = HashMap::new();
        props.insert("a".to_string(), AmfValue::Number(1.0));
        let mut buf = encode(&AmfValue::Object(props));
        let obj = read_object_or_null(&mut buf).unwrap().unwrap();
        assert_eq!(obj.get("a"), Some(&AmfValue::Number(1.0)));
    }

    #[test]
    fn test_overlong_key_returns_partial_object() {
        // {"ok": 1.0} followed by a key whose claimed length exceeds the rest
        // of the buffer. The decoder keeps what it has.
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_OBJECT);
        raw.put_u16(2);
        raw.put_slice(b"ok");
        raw.put_u8(MARKER_NUMBER);
        raw.put_f64(1.0);
        raw.put_u16(500); // claims 500 bytes, only 2 follow
        raw.put_slice(b"xx");

        let mut buf = raw.freeze();
        let obj = read_object(&mut buf).unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj.get("ok"), Some(&AmfValue::Number(1.0)));
    }

    #[test]
    fn test_ecma_array_null_member_is_raw_null() {
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_ECMA_ARRAY);
        raw.put_u32(1);
        raw.put_u16(4);
        raw.put_slice(b"gone");
        raw.put_u8(MARKER_NULL);
        raw.put_u16(0);
        raw.put_u8(MARKER_OBJECT_END);

        let mut buf = raw.freeze();
        let map = read_ecma_array(&mut buf).unwrap();
        assert_eq!(map.get("gone"), Some(&AmfValue::Null));
    }

    #[test]
    fn test_truncated_values() {
        let mut buf = Bytes::from_static(&[MARKER_NUMBER, 0x00, 0x01]);
        assert!(matches!(read_number(&mut buf), Err(AmfError::UnexpectedEof)));

        let mut buf = Bytes::from_static(&[MARKER_STRING, 0x00, 0x05, b'a']);
        assert!(matches!(read_string(&mut buf), Err(AmfError::UnexpectedEof)));

        let mut buf = Bytes::new();
        assert!(matches!(decode(&mut buf), Err(AmfError::UnexpectedEof)));
    }
}
