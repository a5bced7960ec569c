//! Codec for the protocol's primitive types (§4.B): `[short]`, `[int]`, `[string]`,
//! `[long string]`, `[bytes]`, `[short bytes]`, `[string list]`, `[string map]`,
//! `[string multimap]`. Mirrors the teacher's `BufExt`/`BufMutExt` extension-trait
//! pattern over `bytes::Buf`/`BufMut`, but every read returns a `Result` instead of
//! panicking: a short read here is a recoverable `WireFormat` error, not a bug.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{CqlError, Result};

fn require(remaining: usize, needed: usize) -> Result<()> {
  if remaining < needed {
    Err(CqlError::wire(format!(
      "short read: needed {needed} bytes, {remaining} remaining"
    )))
  } else {
    Ok(())
  }
}

pub trait CqlBufExt: Buf {
  fn cql_get_short(&mut self) -> Result<u16> {
    require(self.remaining(), 2)?;
    Ok(self.get_u16())
  }

  fn cql_get_int(&mut self) -> Result<i32> {
    require(self.remaining(), 4)?;
    Ok(self.get_i32())
  }

  fn cql_get_long(&mut self) -> Result<i64> {
    require(self.remaining(), 8)?;
    Ok(self.get_i64())
  }

  fn cql_get_byte(&mut self) -> Result<u8> {
    require(self.remaining(), 1)?;
    Ok(self.get_u8())
  }

  /// `[string]`: `[short]` length n, then n UTF-8 bytes.
  fn cql_get_string(&mut self) -> Result<String> {
    let len = self.cql_get_short()? as usize;
    self.cql_get_fixed_string(len)
  }

  /// `[long string]`: `[int]` length n (non-negative), then n UTF-8 bytes.
  fn cql_get_long_string(&mut self) -> Result<String> {
    let len = self.cql_get_int()?;
    if len < 0 {
      return Err(CqlError::wire(format!("negative [long string] length {len}")));
    }
    self.cql_get_fixed_string(len as usize)
  }

  fn cql_get_fixed_string(&mut self, len: usize) -> Result<String> {
    require(self.remaining(), len)?;
    let mut buf = vec![0u8; len];
    self.copy_to_slice(&mut buf);
    String::from_utf8(buf).map_err(|e| CqlError::wire(format!("invalid utf-8: {e}")))
  }

  /// `[bytes]`: `[int]` length n; n < 0 denotes null, otherwise n raw bytes follow.
  fn cql_get_bytes(&mut self) -> Result<Option<Bytes>> {
    let len = self.cql_get_int()?;
    if len < 0 {
      return Ok(None);
    }
    let len = len as usize;
    require(self.remaining(), len)?;
    Ok(Some(self.copy_to_bytes(len)))
  }

  /// `[short bytes]`: `[short]` length n, then n raw bytes. No null form.
  fn cql_get_short_bytes(&mut self) -> Result<Bytes> {
    let len = self.cql_get_short()? as usize;
    require(self.remaining(), len)?;
    Ok(self.copy_to_bytes(len))
  }

  /// `[string list]`: `[short]` n, then n `[string]`.
  fn cql_get_string_list(&mut self) -> Result<Vec<String>> {
    let n = self.cql_get_short()?;
    (0..n).map(|_| self.cql_get_string()).collect()
  }

  /// `[string map]`: `[short]` n, then n pairs of `[string]`.
  fn cql_get_string_map(&mut self) -> Result<Vec<(String, String)>> {
    let n = self.cql_get_short()?;
    (0..n)
      .map(|_| {
        let key = self.cql_get_string()?;
        let value = self.cql_get_string()?;
        Ok((key, value))
      })
      .collect()
  }

  /// `[string multimap]`: `[short]` n, then n pairs of `[string]` and `[string list]`.
  fn cql_get_string_multimap(&mut self) -> Result<Vec<(String, Vec<String>)>> {
    let n = self.cql_get_short()?;
    (0..n)
      .map(|_| {
        let key = self.cql_get_string()?;
        let values = self.cql_get_string_list()?;
        Ok((key, values))
      })
      .collect()
  }
}

pub trait CqlBufMutExt: BufMut {
  fn cql_put_short(&mut self, v: u16) {
    self.put_u16(v);
  }

  fn cql_put_int(&mut self, v: i32) {
    self.put_i32(v);
  }

  fn cql_put_long(&mut self, v: i64) {
    self.put_i64(v);
  }

  /// `[string]`: `[short]` length, then UTF-8 bytes.
  fn cql_put_string(&mut self, v: &str) {
    self.cql_put_short(v.len() as u16);
    self.put_slice(v.as_bytes());
  }

  /// `[long string]`: `[int]` length, then UTF-8 bytes.
  fn cql_put_long_string(&mut self, v: &str) {
    self.cql_put_int(v.len() as i32);
    self.put_slice(v.as_bytes());
  }

  /// `[bytes]`: `[int]` length n; `None` is encoded as length -1.
  fn cql_put_bytes(&mut self, v: Option<&[u8]>) {
    match v {
      None => self.cql_put_int(-1),
      Some(bytes) => {
        self.cql_put_int(bytes.len() as i32);
        self.put_slice(bytes);
      }
    }
  }

  /// `[short bytes]`: `[short]` length, then raw bytes.
  fn cql_put_short_bytes(&mut self, v: &[u8]) {
    self.cql_put_short(v.len() as u16);
    self.put_slice(v);
  }

  /// `[string list]`: `[short]` n, then n `[string]`.
  fn cql_put_string_list<S: AsRef<str>>(&mut self, values: &[S]) {
    self.cql_put_short(values.len() as u16);
    for v in values {
      self.cql_put_string(v.as_ref());
    }
  }

  /// `[string map]`: `[short]` n, then n pairs of `[string]`.
  fn cql_put_string_map<K: AsRef<str>, V: AsRef<str>>(&mut self, pairs: &[(K, V)]) {
    self.cql_put_short(pairs.len() as u16);
    for (k, v) in pairs {
      self.cql_put_string(k.as_ref());
      self.cql_put_string(v.as_ref());
    }
  }
}

impl<T> CqlBufExt for T where T: Buf {}
impl<T> CqlBufMutExt for T where T: BufMut {}
