//! Interprets the five `RESULT` kinds (§4.G) and exposes the streaming row
//! reader. The whole frame body is already in memory by the time a `RowSet`
//! exists — "streaming" here means decoding rows from that buffer lazily and
//! holding the session reserved until the last one is consumed or dropped.

use std::cell::Cell;
use std::rc::Rc;

use bytes::{Buf, Bytes};

use crate::error::{CqlError, Result};
use crate::frame::PROTOCOL_V2;
use crate::primitive::CqlBufExt;
use crate::value::{decode_value, ColumnType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
  pub keyspace: Option<String>,
  pub table: Option<String>,
  pub name: String,
  pub ty: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetaData {
  pub column_count: i32,
  pub paging_state: Option<Bytes>,
  pub global_table_spec: Option<(String, String)>,
  pub columns: Vec<ColumnSpec>,
}

impl MetaData {
  pub fn get(buf: &mut Bytes, protocol: u8) -> Result<MetaData> {
    let flags = buf.cql_get_int()?;
    let column_count = buf.cql_get_int()?;

    let global_tables_spec = flags & 0x0001 != 0;
    let has_more_pages = flags & 0x0002 != 0;
    let no_metadata = protocol >= PROTOCOL_V2 && flags & 0x0004 != 0;

    let paging_state = if protocol >= PROTOCOL_V2 && has_more_pages { buf.cql_get_bytes()? } else { None };

    let mut global_table_spec = None;
    let mut columns = Vec::new();

    if !no_metadata {
      if global_tables_spec {
        let keyspace = buf.cql_get_string()?;
        let table = buf.cql_get_string()?;
        global_table_spec = Some((keyspace, table));
      }

      if column_count < 0 {
        return Err(CqlError::wire(format!("negative column count {column_count}")));
      }

      for _ in 0..column_count {
        let (keyspace, table) = match &global_table_spec {
          Some(_) => (None, None),
          None => (Some(buf.cql_get_string()?), Some(buf.cql_get_string()?)),
        };
        let name = buf.cql_get_string()?;
        let ty = ColumnType::get(buf)?;
        columns.push(ColumnSpec { keyspace, table, name, ty });
      }
    }

    Ok(MetaData { column_count, paging_state, global_table_spec, columns })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<Value>);

impl Row {
  pub fn get(&self, index: usize) -> Option<&Value> {
    self.0.get(index)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Holds the session reserved (via the shared `reserved` flag) for as long as
/// undrained rows remain; releases it on drop.
#[derive(Debug)]
pub struct RowSet {
  metadata: MetaData,
  body: Bytes,
  remaining: u32,
  reserved: Rc<Cell<bool>>,
}

impl RowSet {
  pub(crate) fn new(metadata: MetaData, body: Bytes, row_count: u32, reserved: Rc<Cell<bool>>) -> Self {
    reserved.set(true);
    Self { metadata, body, remaining: row_count, reserved }
  }

  pub fn metadata(&self) -> &MetaData {
    &self.metadata
  }

  pub fn remaining(&self) -> u32 {
    self.remaining
  }

  pub fn is_exhausted(&self) -> bool {
    self.remaining == 0
  }

  /// Decodes the next row. Raises `Exhausted` on the (n+1)-th call once the
  /// declared row count has already been consumed.
  pub fn next_row(&mut self) -> Result<Row> {
    if self.remaining == 0 {
      return Err(CqlError::Exhausted);
    }
    let mut values = Vec::with_capacity(self.metadata.columns.len());
    for column in &self.metadata.columns {
      let payload = self.body.cql_get_bytes()?;
      values.push(decode_value(payload, &column.ty)?);
    }
    self.remaining -= 1;
    Ok(Row(values))
  }
}

impl Iterator for RowSet {
  type Item = Result<Row>;

  fn next(&mut self) -> Option<Result<Row>> {
    if self.remaining == 0 {
      None
    } else {
      Some(self.next_row())
    }
  }
}

impl Drop for RowSet {
  fn drop(&mut self) {
    self.reserved.set(false);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
  Created,
  Updated,
  Dropped,
}

impl Change {
  pub(crate) fn parse(s: &str) -> Result<Change> {
    match s {
      "CREATED" => Ok(Change::Created),
      "UPDATED" => Ok(Change::Updated),
      "DROPPED" => Ok(Change::Dropped),
      other => Err(CqlError::wire(format!("unknown schema change kind {other:?}"))),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChange {
  pub change: Change,
  pub keyspace: String,
  pub table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
  pub id: Bytes,
  pub bind_metadata: MetaData,
  pub result_metadata: Option<MetaData>,
}

/// The decoded body of a `RESULT` frame (§4.G).
#[derive(Debug)]
pub enum QueryResult {
  Void,
  Rows(RowSet),
  SetKeyspace(String),
  Prepared(PreparedStatement),
  SchemaChange(SchemaChange),
}

pub(crate) fn parse_result(mut body: Bytes, protocol: u8, reserved: Rc<Cell<bool>>) -> Result<QueryResult> {
  let kind = body.cql_get_int()?;
  Ok(match kind {
    0x01 => QueryResult::Void,
    0x02 => {
      let metadata = MetaData::get(&mut body, protocol)?;
      let row_count = body.cql_get_int()?;
      if row_count < 0 {
        return Err(CqlError::wire(format!("negative row count {row_count}")));
      }
      QueryResult::Rows(RowSet::new(metadata, body, row_count as u32, reserved))
    }
    0x03 => QueryResult::SetKeyspace(body.cql_get_string()?),
    0x04 => {
      let id = body.cql_get_short_bytes()?;
      let bind_metadata = MetaData::get(&mut body, protocol)?;
      let result_metadata = if protocol >= PROTOCOL_V2 && body.has_remaining() {
        Some(MetaData::get(&mut body, protocol)?)
      } else {
        None
      };
      QueryResult::Prepared(PreparedStatement { id, bind_metadata, result_metadata })
    }
    0x05 => {
      let change = Change::parse(&body.cql_get_string()?)?;
      let keyspace = body.cql_get_string()?;
      let table = body.cql_get_string()?;
      QueryResult::SchemaChange(SchemaChange { change, keyspace, table })
    }
    other => return Err(CqlError::wire(format!("unknown RESULT kind 0x{other:02x}"))),
  })
}
