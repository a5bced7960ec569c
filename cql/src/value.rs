//! Typed column values (§4.D): the `ColumnType` descriptor tree and the `Value`
//! enum it decodes into, plus the `[option]` primitive (§4.B) that carries a
//! `ColumnType` on the wire ahead of every column spec.

use std::net::IpAddr;

use bigdecimal::BigDecimal;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigInt;
use uuid::Uuid;

use crate::error::{CqlError, Result};
use crate::primitive::{CqlBufExt, CqlBufMutExt};

/// A column's declared type, as carried by the `[option]` primitive. The three
/// collection variants nest arbitrarily, matching what the protocol permits.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
  Custom(String),
  Ascii,
  BigInt,
  Blob,
  Boolean,
  Counter,
  Decimal,
  Double,
  Float,
  Int,
  /// v1 only; aliased to `VarChar` on the v2 wire.
  Text,
  Timestamp,
  Uuid,
  VarChar,
  VarInt,
  TimeUuid,
  Inet,
  List(Box<ColumnType>),
  Map(Box<ColumnType>, Box<ColumnType>),
  Set(Box<ColumnType>),
}

impl ColumnType {
  pub fn get(buf: &mut impl Buf) -> Result<ColumnType> {
    let id = buf.cql_get_short()?;
    Ok(match id {
      0x0000 => ColumnType::Custom(buf.cql_get_string()?),
      0x0001 => ColumnType::Ascii,
      0x0002 => ColumnType::BigInt,
      0x0003 => ColumnType::Blob,
      0x0004 => ColumnType::Boolean,
      0x0005 => ColumnType::Counter,
      0x0006 => ColumnType::Decimal,
      0x0007 => ColumnType::Double,
      0x0008 => ColumnType::Float,
      0x0009 => ColumnType::Int,
      0x000A => ColumnType::Text,
      0x000B => ColumnType::Timestamp,
      0x000C => ColumnType::Uuid,
      0x000D => ColumnType::VarChar,
      0x000E => ColumnType::VarInt,
      0x000F => ColumnType::TimeUuid,
      0x0010 => ColumnType::Inet,
      0x0020 => ColumnType::List(Box::new(ColumnType::get(buf)?)),
      0x0021 => {
        let key = ColumnType::get(buf)?;
        let value = ColumnType::get(buf)?;
        ColumnType::Map(Box::new(key), Box::new(value))
      }
      0x0022 => ColumnType::Set(Box::new(ColumnType::get(buf)?)),
      other => return Err(CqlError::wire(format!("unknown column type id 0x{other:04x}"))),
    })
  }

  pub fn put(&self, buf: &mut impl BufMut) {
    match self {
      ColumnType::Custom(name) => {
        buf.cql_put_short(0x0000);
        buf.cql_put_string(name);
      }
      ColumnType::Ascii => buf.cql_put_short(0x0001),
      ColumnType::BigInt => buf.cql_put_short(0x0002),
      ColumnType::Blob => buf.cql_put_short(0x0003),
      ColumnType::Boolean => buf.cql_put_short(0x0004),
      ColumnType::Counter => buf.cql_put_short(0x0005),
      ColumnType::Decimal => buf.cql_put_short(0x0006),
      ColumnType::Double => buf.cql_put_short(0x0007),
      ColumnType::Float => buf.cql_put_short(0x0008),
      ColumnType::Int => buf.cql_put_short(0x0009),
      ColumnType::Text => buf.cql_put_short(0x000A),
      ColumnType::Timestamp => buf.cql_put_short(0x000B),
      ColumnType::Uuid => buf.cql_put_short(0x000C),
      ColumnType::VarChar => buf.cql_put_short(0x000D),
      ColumnType::VarInt => buf.cql_put_short(0x000E),
      ColumnType::TimeUuid => buf.cql_put_short(0x000F),
      ColumnType::Inet => buf.cql_put_short(0x0010),
      ColumnType::List(elem) => {
        buf.cql_put_short(0x0020);
        elem.put(buf);
      }
      ColumnType::Map(key, value) => {
        buf.cql_put_short(0x0021);
        key.put(buf);
        value.put(buf);
      }
      ColumnType::Set(elem) => {
        buf.cql_put_short(0x0022);
        elem.put(buf);
      }
    }
  }
}

/// A decoded (or about-to-be-encoded) column value. `Null` is distinguished
/// from every other variant so callers can tell null apart from a present,
/// possibly zero-length value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Ascii(String),
  BigInt(i64),
  Blob(Bytes),
  Boolean(bool),
  Counter(i64),
  Decimal(BigDecimal),
  Double(f64),
  Float(f32),
  Int(i32),
  Timestamp(DateTime<Utc>),
  Uuid(Uuid),
  VarChar(String),
  VarInt(BigInt),
  TimeUuid(Uuid),
  Inet(IpAddr),
  List(Vec<Value>),
  Map(Vec<(Value, Value)>),
  Set(Vec<Value>),
  Custom(Bytes),
}

/// Decodes a column's `[bytes]` payload (already split out by the frame/result
/// reader) against its declared type. `None` denotes the protocol's null.
pub fn decode_value(payload: Option<Bytes>, ty: &ColumnType) -> Result<Value> {
  let mut bytes = match payload {
    None => return Ok(Value::Null),
    Some(b) => b,
  };

  Ok(match ty {
    ColumnType::Ascii => Value::Ascii(utf8(bytes)?),
    ColumnType::Text | ColumnType::VarChar => Value::VarChar(utf8(bytes)?),
    ColumnType::Blob => Value::Blob(bytes),
    ColumnType::Custom(_) => Value::Custom(bytes),
    ColumnType::Boolean => {
      if bytes.is_empty() {
        return Err(CqlError::wire("empty boolean payload"));
      }
      Value::Boolean(*bytes.last().unwrap() != 0)
    }
    ColumnType::Int => Value::Int(bytes.cql_get_int()?),
    ColumnType::BigInt => Value::BigInt(bytes.cql_get_long()?),
    ColumnType::Counter => Value::Counter(bytes.cql_get_long()?),
    ColumnType::Timestamp => {
      let millis = bytes.cql_get_long()?;
      Value::Timestamp(
        Utc
          .timestamp_millis_opt(millis)
          .single()
          .ok_or_else(|| CqlError::wire(format!("out-of-range timestamp {millis}")))?,
      )
    }
    ColumnType::Float => {
      if bytes.remaining() != 4 {
        return Err(CqlError::wire("float payload must be 4 bytes"));
      }
      Value::Float(bytes.get_f32())
    }
    ColumnType::Double => {
      if bytes.remaining() != 8 {
        return Err(CqlError::wire("double payload must be 8 bytes"));
      }
      Value::Double(bytes.get_f64())
    }
    ColumnType::Uuid => Value::Uuid(uuid_from(&bytes)?),
    ColumnType::TimeUuid => Value::TimeUuid(uuid_from(&bytes)?),
    ColumnType::VarInt => Value::VarInt(BigInt::from_signed_bytes_be(&bytes)),
    ColumnType::Decimal => {
      let scale = bytes.cql_get_int()?;
      let mantissa = BigInt::from_signed_bytes_be(&bytes);
      Value::Decimal(BigDecimal::new(mantissa, scale as i64))
    }
    ColumnType::Inet => match bytes.len() {
      4 => {
        let octets: [u8; 4] = bytes.as_ref().try_into().unwrap();
        Value::Inet(IpAddr::from(octets))
      }
      16 => {
        let octets: [u8; 16] = bytes.as_ref().try_into().unwrap();
        Value::Inet(IpAddr::from(octets))
      }
      other => return Err(CqlError::wire(format!("inet payload must be 4 or 16 bytes, got {other}"))),
    },
    ColumnType::List(elem) => Value::List(decode_elements(&mut bytes, elem)?),
    ColumnType::Set(elem) => Value::Set(decode_elements(&mut bytes, elem)?),
    ColumnType::Map(key, value) => {
      let n = bytes.cql_get_short()?;
      let mut pairs = Vec::with_capacity(n as usize);
      for _ in 0..n {
        let k = bytes.cql_get_short_bytes()?;
        let v = bytes.cql_get_short_bytes()?;
        pairs.push((decode_value(Some(k), key)?, decode_value(Some(v), value)?));
      }
      Value::Map(pairs)
    }
  })
}

fn decode_elements(buf: &mut Bytes, elem: &ColumnType) -> Result<Vec<Value>> {
  let n = buf.cql_get_short()?;
  let mut out = Vec::with_capacity(n as usize);
  for _ in 0..n {
    let raw = buf.cql_get_short_bytes()?;
    out.push(decode_value(Some(raw), elem)?);
  }
  Ok(out)
}

fn utf8(bytes: Bytes) -> Result<String> {
  String::from_utf8(bytes.to_vec()).map_err(|e| CqlError::wire(format!("invalid utf-8: {e}")))
}

fn uuid_from(bytes: &[u8]) -> Result<Uuid> {
  let arr: [u8; 16] = bytes
    .try_into()
    .map_err(|_| CqlError::wire(format!("uuid payload must be 16 bytes, got {}", bytes.len())))?;
  Ok(Uuid::from_bytes(arr))
}

/// Encodes a value back into its inner `[bytes]` payload, for `EXECUTE` argument
/// binding. `None` denotes null and is written by the caller as a `[bytes]`
/// length of -1.
pub fn encode_value(value: &Value) -> Option<Bytes> {
  let mut buf = BytesMut::new();
  match value {
    Value::Null => return None,
    Value::Ascii(s) | Value::VarChar(s) => buf.put_slice(s.as_bytes()),
    Value::Blob(b) | Value::Custom(b) => buf.put_slice(b),
    Value::Boolean(v) => buf.put_u8(if *v { 1 } else { 0 }),
    Value::Int(v) => buf.cql_put_int(*v),
    Value::BigInt(v) | Value::Counter(v) => buf.cql_put_long(*v),
    Value::Timestamp(v) => buf.cql_put_long(v.timestamp_millis()),
    Value::Float(v) => buf.put_f32(*v),
    Value::Double(v) => buf.put_f64(*v),
    Value::Uuid(v) | Value::TimeUuid(v) => buf.put_slice(v.as_bytes()),
    Value::VarInt(v) => buf.put_slice(&v.to_signed_bytes_be()),
    Value::Decimal(v) => {
      let (mantissa, exponent) = v.as_bigint_and_exponent();
      buf.cql_put_int(exponent as i32);
      buf.put_slice(&mantissa.to_signed_bytes_be());
    }
    Value::Inet(addr) => match addr {
      IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
      IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
    },
    Value::List(items) | Value::Set(items) => {
      buf.cql_put_short(items.len() as u16);
      for item in items {
        put_element(&mut buf, item);
      }
    }
    Value::Map(pairs) => {
      buf.cql_put_short(pairs.len() as u16);
      for (k, v) in pairs {
        put_element(&mut buf, k);
        put_element(&mut buf, v);
      }
    }
  }
  Some(buf.freeze())
}

fn put_element(buf: &mut BytesMut, value: &Value) {
  let encoded = encode_value(value).unwrap_or_default();
  buf.cql_put_short_bytes(&encoded);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn column_type_round_trips_through_option_id() {
    let ty = ColumnType::Map(Box::new(ColumnType::VarChar), Box::new(ColumnType::List(Box::new(ColumnType::Int))));
    let mut buf = BytesMut::new();
    ty.put(&mut buf);
    let mut r = buf.freeze();
    assert_eq!(ColumnType::get(&mut r).unwrap(), ty);
  }

  #[test]
  fn null_decodes_regardless_of_type() {
    assert_eq!(decode_value(None, &ColumnType::Int).unwrap(), Value::Null);
  }

  #[test]
  fn int_round_trips() {
    let v = Value::Int(42);
    let encoded = encode_value(&v).unwrap();
    assert_eq!(decode_value(Some(encoded), &ColumnType::Int).unwrap(), v);
  }

  #[test]
  fn boolean_accepts_four_byte_legacy_payload() {
    let payload = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01]);
    assert_eq!(decode_value(Some(payload), &ColumnType::Boolean).unwrap(), Value::Boolean(true));
  }

  #[test]
  fn varint_decodes_long_max_value() {
    let payload = Bytes::from_static(&[0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    match decode_value(Some(payload), &ColumnType::VarInt).unwrap() {
      Value::VarInt(v) => assert_eq!(v, BigInt::from(i64::MAX)),
      other => panic!("expected VarInt, got {other:?}"),
    }
  }

  #[test]
  fn varint_encodes_long_max_value() {
    let encoded = encode_value(&Value::VarInt(BigInt::from(i64::MAX))).unwrap();
    assert_eq!(encoded.as_ref(), &[0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
  }

  #[test]
  fn decimal_decodes_documented_framing() {
    let payload = Bytes::from_static(&[0x00, 0x00, 0x00, 0x02, 0xFF, 0xFF, 0xCF, 0xC7]);
    match decode_value(Some(payload), &ColumnType::Decimal).unwrap() {
      Value::Decimal(d) => assert_eq!(d, BigDecimal::new(BigInt::from(-12345), 2)),
      other => panic!("expected Decimal, got {other:?}"),
    }
  }

  #[test]
  fn decimal_round_trips() {
    let v = Value::Decimal(BigDecimal::new(BigInt::from(-12345), 2));
    let encoded = encode_value(&v).unwrap();
    assert_eq!(decode_value(Some(encoded), &ColumnType::Decimal).unwrap(), v);
  }

  #[test]
  fn list_of_int_round_trips() {
    let v = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let encoded = encode_value(&v).unwrap();
    let ty = ColumnType::List(Box::new(ColumnType::Int));
    assert_eq!(decode_value(Some(encoded), &ty).unwrap(), v);
  }

  #[test]
  fn map_of_varchar_to_int_round_trips() {
    let v = Value::Map(vec![(Value::VarChar("a".into()), Value::Int(1))]);
    let encoded = encode_value(&v).unwrap();
    let ty = ColumnType::Map(Box::new(ColumnType::VarChar), Box::new(ColumnType::Int));
    assert_eq!(decode_value(Some(encoded), &ty).unwrap(), v);
  }

  #[test]
  fn inet_v4_round_trips() {
    let v = Value::Inet("127.0.0.1".parse().unwrap());
    let encoded = encode_value(&v).unwrap();
    assert_eq!(decode_value(Some(encoded), &ColumnType::Inet).unwrap(), v);
  }
}
