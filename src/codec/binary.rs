//! Binary value encoding.
//!
//! Encodings per declared type (all integers Big Endian):
//!
//! ```text
//! Integer    i64, exactly 8 bytes
//! Bytes      raw bytes
//! Text       UTF-8 bytes
//! Boolean    one byte, 0 or 1
//! Float      IEEE-754 bits, exactly 8 bytes
//! Decimal    sign u8 (0|1) | exponent i32 | digits (one byte 0..=9 each, >= 1)
//! Timestamp  seconds since Unix epoch i64 | nanoseconds u32   (always UTC)
//! List       count u32 | { len u32 | element }*
//! Record     count u16 | { name len u16 | name | len u32 | value }*  (declared order)
//! ```
//!
//! Variable-length values always sit inside a length-prefixed slot, either
//! one of the slots above or the field slot of a message.

use bytes::{Buf, BufMut, Bytes};
use chrono::{DateTime, Utc};

use super::decimal::Decimal;
use super::value::{Fields, Value, ValueType};
use crate::error::{AmpError, Result};

/// Encode a value as its declared type.
///
/// Fails with `SchemaViolation` if the value does not conform to the type.
pub fn encode(value: &Value, ty: &ValueType) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(&mut out, value, ty)?;
    Ok(out)
}

/// Decode bytes as the declared type.
///
/// Fails with `MalformedValue` if the bytes are not a valid encoding, or with
/// `SchemaViolation` if a record's field set does not match its schema.
pub fn decode(bytes: &[u8], ty: &ValueType) -> Result<Value> {
    match ty {
        ValueType::Integer => Ok(Value::Integer(exact(bytes, 8, "integer")?.get_i64())),
        ValueType::Bytes => Ok(Value::Bytes(Bytes::copy_from_slice(bytes))),
        ValueType::Text => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_owned()))
            .map_err(|e| AmpError::MalformedValue(format!("invalid UTF-8 in text: {}", e))),
        ValueType::Boolean => match bytes {
            [0] => Ok(Value::Boolean(false)),
            [1] => Ok(Value::Boolean(true)),
            _ => Err(AmpError::MalformedValue(format!(
                "invalid boolean encoding {:?}",
                bytes
            ))),
        },
        ValueType::Float => Ok(Value::Float(exact(bytes, 8, "float")?.get_f64())),
        ValueType::Decimal => decode_decimal(bytes),
        ValueType::Timestamp => decode_timestamp(bytes),
        ValueType::List(element) => decode_list(bytes, element),
        ValueType::Record(schema) => decode_record(bytes, schema),
    }
}

fn encode_into(out: &mut Vec<u8>, value: &Value, ty: &ValueType) -> Result<()> {
    match (ty, value) {
        (ValueType::Integer, Value::Integer(v)) => out.put_i64(*v),
        (ValueType::Bytes, Value::Bytes(v)) => out.put_slice(v),
        (ValueType::Text, Value::Text(v)) => out.put_slice(v.as_bytes()),
        (ValueType::Boolean, Value::Boolean(v)) => out.put_u8(u8::from(*v)),
        (ValueType::Float, Value::Float(v)) => out.put_f64(*v),
        (ValueType::Decimal, Value::Decimal(d)) => {
            out.put_u8(u8::from(d.is_negative()));
            out.put_i32(d.exponent());
            out.put_slice(d.digits());
        }
        (ValueType::Timestamp, Value::Timestamp(t)) => {
            out.put_i64(t.timestamp());
            out.put_u32(t.timestamp_subsec_nanos());
        }
        (ValueType::List(element), Value::List(items)) => {
            out.put_u32(slot_len(items.len())?);
            for item in items {
                put_slot(out, |buf| encode_into(buf, item, element))?;
            }
        }
        (ValueType::Record(schema), Value::Record(fields)) => {
            let pairs = schema.match_fields(fields)?;
            let count = u16::try_from(pairs.len()).map_err(|_| {
                AmpError::SchemaViolation("record has too many fields".to_string())
            })?;
            out.put_u16(count);
            for (def, v) in pairs {
                put_name(out, &def.name)?;
                put_slot(out, |buf| encode_into(buf, v, &def.ty))?;
            }
        }
        (ty, value) => {
            return Err(AmpError::SchemaViolation(format!(
                "expected {}, got {}",
                ty.name(),
                value.kind()
            )))
        }
    }
    Ok(())
}

/// Write a u32 length placeholder, run `write`, then patch the length in.
fn put_slot(out: &mut Vec<u8>, write: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<()> {
    let at = out.len();
    out.put_u32(0);
    write(out)?;
    let len = slot_len(out.len() - at - 4)?;
    out[at..at + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Write a u16 length-prefixed UTF-8 name.
pub(crate) fn put_name(out: &mut impl BufMut, name: &str) -> Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| AmpError::SchemaViolation(format!("name too long: {} bytes", name.len())))?;
    out.put_u16(len);
    out.put_slice(name.as_bytes());
    Ok(())
}

fn slot_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| AmpError::SchemaViolation(format!("value too large: {} bytes", len)))
}

fn exact<'a>(bytes: &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if bytes.len() != len {
        return Err(AmpError::MalformedValue(format!(
            "{} must be {} bytes, got {}",
            what,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.len() < len {
        return Err(AmpError::MalformedValue(format!("truncated {}", what)));
    }
    Ok(())
}

fn read_slot<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    need(buf, 4, "slot length")?;
    let len = buf.get_u32() as usize;
    need(buf, len, "slot")?;
    let (slot, rest) = buf.split_at(len);
    *buf = rest;
    Ok(slot)
}

fn read_name(buf: &mut &[u8]) -> Result<String> {
    need(buf, 2, "name length")?;
    let len = buf.get_u16() as usize;
    need(buf, len, "name")?;
    let (name, rest) = buf.split_at(len);
    *buf = rest;
    String::from_utf8(name.to_vec())
        .map_err(|_| AmpError::MalformedValue("field name is not valid UTF-8".to_string()))
}

fn no_trailing(buf: &[u8], what: &str) -> Result<()> {
    if !buf.is_empty() {
        return Err(AmpError::MalformedValue(format!(
            "{} trailing bytes after {}",
            buf.len(),
            what
        )));
    }
    Ok(())
}

fn decode_decimal(bytes: &[u8]) -> Result<Value> {
    need(bytes, 6, "decimal")?;
    let mut buf = bytes;
    let negative = match buf.get_u8() {
        0 => false,
        1 => true,
        other => {
            return Err(AmpError::MalformedValue(format!(
                "invalid decimal sign byte {}",
                other
            )))
        }
    };
    let exponent = buf.get_i32();
    Ok(Value::Decimal(Decimal::new(negative, buf.to_vec(), exponent)?))
}

fn decode_timestamp(bytes: &[u8]) -> Result<Value> {
    let mut buf = exact(bytes, 12, "timestamp")?;
    let secs = buf.get_i64();
    let nanos = buf.get_u32();
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(Value::Timestamp)
        .ok_or_else(|| {
            AmpError::MalformedValue(format!(
                "timestamp {}s+{}ns is out of range",
                secs, nanos
            ))
        })
}

fn decode_list(bytes: &[u8], element: &ValueType) -> Result<Value> {
    let mut buf = bytes;
    need(buf, 4, "list count")?;
    let count = buf.get_u32() as usize;
    // Every element needs at least its 4-byte slot length.
    if count > buf.len() / 4 {
        return Err(AmpError::MalformedValue(format!(
            "list claims {} elements in {} bytes",
            count,
            buf.len()
        )));
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let slot = read_slot(&mut buf)?;
        items.push(decode(slot, element)?);
    }
    no_trailing(buf, "list")?;
    Ok(Value::List(items))
}

fn decode_record(bytes: &[u8], schema: &super::schema::Schema) -> Result<Value> {
    let mut buf = bytes;
    need(buf, 2, "record field count")?;
    let count = buf.get_u16() as usize;

    let mut entries: Vec<(String, &[u8])> = Vec::with_capacity(count.min(schema.len()));
    for _ in 0..count {
        let name = read_name(&mut buf)?;
        let slot = read_slot(&mut buf)?;
        entries.push((name, slot));
    }
    no_trailing(buf, "record")?;

    for (i, (name, _)) in entries.iter().enumerate() {
        if schema.get(name).is_none() {
            return Err(AmpError::SchemaViolation(format!(
                "unexpected record field {}",
                name
            )));
        }
        if entries[..i].iter().any(|(n, _)| n == name) {
            return Err(AmpError::SchemaViolation(format!(
                "record field {} appears twice",
                name
            )));
        }
    }

    let mut fields = Fields::new();
    for (i, def) in schema.fields().iter().enumerate() {
        match entries.get(i) {
            Some((name, slot)) if *name == def.name => {
                fields.push(&def.name, decode(slot, &def.ty)?);
            }
            _ if entries.iter().any(|(n, _)| *n == def.name) => {
                return Err(AmpError::SchemaViolation(format!(
                    "record field {} is out of declared order",
                    def.name
                )))
            }
            _ => {
                return Err(AmpError::SchemaViolation(format!(
                    "missing record field {}",
                    def.name
                )))
            }
        }
    }
    Ok(Value::Record(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Schema;

    fn roundtrip(value: Value, ty: ValueType) {
        let bytes = encode(&value, &ty).unwrap();
        assert_eq!(decode(&bytes, &ty).unwrap(), value);
    }

    fn item_type() -> ValueType {
        ValueType::Record(
            Schema::new()
                .field("a", ValueType::Integer)
                .field("b", ValueType::Text),
        )
    }

    #[test]
    fn test_scalar_edge_values_roundtrip() {
        roundtrip(Value::Integer(0), ValueType::Integer);
        roundtrip(Value::Integer(-42), ValueType::Integer);
        roundtrip(Value::Integer(i64::MIN), ValueType::Integer);
        roundtrip(Value::Text(String::new()), ValueType::Text);
        roundtrip(Value::Text("héllo ✓".into()), ValueType::Text);
        roundtrip(Value::Bytes(Bytes::from_static(b"\x00\xff2")), ValueType::Bytes);
        roundtrip(Value::Boolean(true), ValueType::Boolean);
        roundtrip(Value::Boolean(false), ValueType::Boolean);
    }

    #[test]
    fn test_float_special_values_bit_exact() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, 5.123] {
            let bytes = encode(&Value::Float(v), &ValueType::Float).unwrap();
            match decode(&bytes, &ValueType::Float).unwrap() {
                Value::Float(d) => assert_eq!(d.to_bits(), v.to_bits()),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_decimal_three_quarters_digit_exact() {
        let d = Decimal::exact_quotient(3, 4).unwrap();
        let bytes = encode(&Value::Decimal(d.clone()), &ValueType::Decimal).unwrap();
        assert_eq!(bytes, vec![0, 0xff, 0xff, 0xff, 0xfe, 7, 5]);
        assert_eq!(decode(&bytes, &ValueType::Decimal).unwrap(), Value::Decimal(d));
    }

    #[test]
    fn test_timestamp_epoch_and_far_future() {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        roundtrip(Value::Timestamp(epoch), ValueType::Timestamp);

        let future = DateTime::<Utc>::from_timestamp(253_402_300_799, 999_999_999).unwrap();
        roundtrip(Value::Timestamp(future), ValueType::Timestamp);
    }

    #[test]
    fn test_lists_roundtrip() {
        roundtrip(Value::List(vec![]), ValueType::list(ValueType::Integer));
        roundtrip(
            Value::List(vec![4.into(), 5.into(), 6.into()]),
            ValueType::list(ValueType::Integer),
        );
        roundtrip(
            Value::List(vec![
                Value::List(vec!["str01".into(), "str02".into()]),
                Value::List(vec![]),
            ]),
            ValueType::list(ValueType::list(ValueType::Text)),
        );
        roundtrip(
            Value::List(vec![
                Fields::new().with("a", 7).with("b", "hello").into(),
                Fields::new().with("a", 9).with("b", "goodbye").into(),
            ]),
            ValueType::list(item_type()),
        );
    }

    #[test]
    fn test_record_encoded_in_declared_order() {
        let out_of_order = Value::Record(Fields::new().with("b", "x").with("a", 1));
        let bytes = encode(&out_of_order, &item_type()).unwrap();
        assert_eq!(
            decode(&bytes, &item_type()).unwrap(),
            Value::Record(Fields::new().with("a", 1).with("b", "x"))
        );
        // count, then the first name is "a"
        assert_eq!(&bytes[..5], &[0, 2, 0, 1, b'a']);
    }

    #[test]
    fn test_encode_type_mismatch() {
        let err = encode(&Value::Text("1".into()), &ValueType::Integer).unwrap_err();
        assert!(matches!(err, AmpError::SchemaViolation(_)));

        let mixed = Value::List(vec![1.into(), "two".into()]);
        assert!(encode(&mixed, &ValueType::list(ValueType::Integer)).is_err());
    }

    #[test]
    fn test_integer_width_mismatch() {
        assert!(matches!(
            decode(&[0, 0, 0, 1], &ValueType::Integer),
            Err(AmpError::MalformedValue(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_text() {
        assert!(matches!(
            decode(&[0xc3, 0x28], &ValueType::Text),
            Err(AmpError::MalformedValue(_))
        ));
    }

    #[test]
    fn test_invalid_boolean() {
        assert!(matches!(
            decode(&[2], &ValueType::Boolean),
            Err(AmpError::MalformedValue(_))
        ));
        assert!(decode(&[], &ValueType::Boolean).is_err());
    }

    #[test]
    fn test_timestamp_out_of_range() {
        let mut bytes = Vec::new();
        bytes.put_i64(i64::MAX);
        bytes.put_u32(0);
        assert!(matches!(
            decode(&bytes, &ValueType::Timestamp),
            Err(AmpError::MalformedValue(_))
        ));
    }

    #[test]
    fn test_decimal_bad_digit() {
        assert!(matches!(
            decode(&[0, 0, 0, 0, 0, 12], &ValueType::Decimal),
            Err(AmpError::MalformedValue(_))
        ));
        assert!(decode(&[2, 0, 0, 0, 0, 1], &ValueType::Decimal).is_err());
    }

    #[test]
    fn test_list_count_larger_than_payload() {
        let mut bytes = Vec::new();
        bytes.put_u32(1_000_000);
        assert!(matches!(
            decode(&bytes, &ValueType::list(ValueType::Integer)),
            Err(AmpError::MalformedValue(_))
        ));
    }

    #[test]
    fn test_record_missing_and_extra_fields() {
        let only_a = Schema::new().field("a", ValueType::Integer);
        let bytes = encode(
            &Value::Record(Fields::new().with("a", 1)),
            &ValueType::Record(only_a.clone()),
        )
        .unwrap();
        let err = decode(&bytes, &item_type()).unwrap_err();
        assert!(matches!(err, AmpError::SchemaViolation(ref m) if m.contains("missing record field b")));

        let full = encode(&Value::Record(Fields::new().with("a", 1).with("b", "x")), &item_type()).unwrap();
        let err = decode(&full, &ValueType::Record(only_a)).unwrap_err();
        assert!(matches!(err, AmpError::SchemaViolation(ref m) if m.contains("unexpected record field b")));
    }

    #[test]
    fn test_record_out_of_order_on_wire() {
        // Hand-built record with b before a.
        let mut bytes = Vec::new();
        bytes.put_u16(2);
        put_name(&mut bytes, "b").unwrap();
        bytes.put_u32(1);
        bytes.put_u8(b'x');
        put_name(&mut bytes, "a").unwrap();
        bytes.put_u32(8);
        bytes.put_i64(1);

        let err = decode(&bytes, &item_type()).unwrap_err();
        assert!(matches!(err, AmpError::SchemaViolation(ref m) if m.contains("out of declared order")));
    }
}
