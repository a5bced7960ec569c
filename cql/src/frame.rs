//! The 8-byte frame header (§3, §4.C) and the read/write primitives built on
//! top of the byte stream. Every frame crossing the wire is traced the way the
//! teacher traces its packets, just through `log::trace!` instead of `eprintln!`.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::debug::DebugBytesRef;
use crate::error::{CqlError, Result};
use crate::stream::ByteStream;

pub const PROTOCOL_V1: u8 = 0x01;
pub const PROTOCOL_V2: u8 = 0x02;

const DIRECTION_RESPONSE: u8 = 0x80;
const VERSION_MASK: u8 = 0x7f;

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Flags: u8 {
    const COMPRESSED = 0x01;
    const TRACING = 0x02;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  Error,
  Startup,
  Ready,
  Authenticate,
  Credentials,
  Options,
  Supported,
  Query,
  Result,
  Prepare,
  Execute,
  Register,
  Event,
  Batch,
  AuthChallenge,
  AuthResponse,
  AuthSuccess,
}

impl Opcode {
  fn from_byte(b: u8) -> Result<Opcode> {
    Ok(match b {
      0x00 => Opcode::Error,
      0x01 => Opcode::Startup,
      0x02 => Opcode::Ready,
      0x03 => Opcode::Authenticate,
      0x04 => Opcode::Credentials,
      0x05 => Opcode::Options,
      0x06 => Opcode::Supported,
      0x07 => Opcode::Query,
      0x08 => Opcode::Result,
      0x09 => Opcode::Prepare,
      0x0A => Opcode::Execute,
      0x0B => Opcode::Register,
      0x0C => Opcode::Event,
      0x0D => Opcode::Batch,
      0x0E => Opcode::AuthChallenge,
      0x0F => Opcode::AuthResponse,
      0x10 => Opcode::AuthSuccess,
      other => return Err(CqlError::wire(format!("unknown opcode 0x{other:02x}"))),
    })
  }

  fn to_byte(self) -> u8 {
    match self {
      Opcode::Error => 0x00,
      Opcode::Startup => 0x01,
      Opcode::Ready => 0x02,
      Opcode::Authenticate => 0x03,
      Opcode::Credentials => 0x04,
      Opcode::Options => 0x05,
      Opcode::Supported => 0x06,
      Opcode::Query => 0x07,
      Opcode::Result => 0x08,
      Opcode::Prepare => 0x09,
      Opcode::Execute => 0x0A,
      Opcode::Register => 0x0B,
      Opcode::Event => 0x0C,
      Opcode::Batch => 0x0D,
      Opcode::AuthChallenge => 0x0E,
      Opcode::AuthResponse => 0x0F,
      Opcode::AuthSuccess => 0x10,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
  pub protocol: u8,
  pub flags: Flags,
  pub stream_id: i8,
  pub opcode: Opcode,
  pub length: u32,
}

const HEADER_LEN: usize = 8;
const MAX_BODY_LEN: u32 = 256 * 1024 * 1024;

/// Writes a request frame: header (direction bit unset) then body, in one
/// write so the peer sees a single TCP segment where possible.
pub async fn write_frame(
  stream: &mut ByteStream,
  protocol: u8,
  flags: Flags,
  stream_id: i8,
  opcode: Opcode,
  body: &[u8],
) -> Result<()> {
  if body.len() as u64 > MAX_BODY_LEN as u64 {
    return Err(CqlError::wire(format!("frame body too large: {} bytes", body.len())));
  }

  let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
  buf.put_u8(protocol & VERSION_MASK);
  buf.put_u8(flags.bits());
  buf.put_i8(stream_id);
  buf.put_u8(opcode.to_byte());
  buf.put_u32(body.len() as u32);
  buf.put_slice(body);

  log::trace!(">> {:?}", DebugBytesRef(&buf));
  stream.write_all(&buf).await
}

/// Reads one response frame: the 8-byte header, then exactly `length` more
/// bytes as the body. Rejects headers whose direction bit isn't the response
/// bit, and frames whose protocol version byte doesn't match `expected_protocol`.
pub async fn read_frame(stream: &mut ByteStream, expected_protocol: u8) -> Result<(FrameHeader, Bytes)> {
  let header_bytes = stream.read_exact(HEADER_LEN).await?;
  let mut header_buf = header_bytes.clone();

  let version_byte = header_buf.get_u8();
  if version_byte & DIRECTION_RESPONSE == 0 {
    return Err(CqlError::wire(format!("expected response direction bit, got version byte 0x{version_byte:02x}")));
  }
  let protocol = version_byte & VERSION_MASK;
  if protocol != expected_protocol {
    return Err(CqlError::wire(format!(
      "frame protocol version {protocol} does not match negotiated version {expected_protocol}"
    )));
  }

  let flags = Flags::from_bits_truncate(header_buf.get_u8());
  let stream_id = header_buf.get_i8();
  let opcode = Opcode::from_byte(header_buf.get_u8())?;
  let length = header_buf.get_u32();

  if length > MAX_BODY_LEN {
    return Err(CqlError::wire(format!("frame body too large: {length} bytes")));
  }

  let body = stream.read_exact(length as usize).await?;

  log::trace!("<< {:?}{:?}", DebugBytesRef(&header_bytes), DebugBytesRef(&body));

  Ok((FrameHeader { protocol, flags, stream_id, opcode, length }, body))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opcode_byte_round_trips() {
    for b in 0x00..=0x10u8 {
      let op = Opcode::from_byte(b).unwrap();
      assert_eq!(op.to_byte(), b);
    }
  }

  #[test]
  fn unknown_opcode_is_wire_format_error() {
    match Opcode::from_byte(0xFF) {
      Err(CqlError::WireFormat(_)) => {}
      other => panic!("expected WireFormat error, got {other:?}"),
    }
  }

  #[test]
  fn startup_header_matches_documented_bytes() {
    // header for S1: version 0x01, flags 0x00, stream 0, opcode STARTUP, length 0x16.
    let mut buf = BytesMut::new();
    buf.put_u8(PROTOCOL_V1);
    buf.put_u8(Flags::empty().bits());
    buf.put_i8(0);
    buf.put_u8(Opcode::Startup.to_byte());
    buf.put_u32(0x16);
    assert_eq!(buf.as_ref(), &[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x16]);
  }
}
