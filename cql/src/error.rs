use bytes::Bytes;
use thiserror::Error;

use crate::primitive::CqlBufExt;
use crate::session::Consistency;

pub type Result<T> = std::result::Result<T, CqlError>;

/// Errors produced by the driver: transport failures, wire-format violations and
/// decoded `ERROR` frames from the server.
#[derive(Error, Debug)]
pub enum CqlError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("wire format violation: {0}")]
  WireFormat(String),

  #[error("server error {kind:?}: {message}")]
  Server { kind: ServerErrorKind, message: String },

  #[error("unprepared statement {unknown_id:?}")]
  Unprepared { unknown_id: Bytes },

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("row set exhausted")]
  Exhausted,

  #[error("session is reserved by a live row set")]
  SessionReserved,

  #[error("session is closed")]
  SessionClosed,
}

impl CqlError {
  pub(crate) fn wire(msg: impl Into<String>) -> Self {
    CqlError::WireFormat(msg.into())
  }
}

/// The fourteen server-side error kinds defined by the protocol, each carrying
/// its own structured tail. See the protocol's ERROR frame layout.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerErrorKind {
  ServerError,
  ProtocolError,
  BadCredentials,
  Unavailable {
    consistency: Consistency,
    required: i32,
    alive: i32,
  },
  Overloaded,
  IsBootstrapping,
  TruncateError,
  WriteTimeout {
    consistency: Consistency,
    received: i32,
    blockfor: i32,
    write_type: String,
  },
  ReadTimeout {
    consistency: Consistency,
    received: i32,
    blockfor: i32,
    data_present: bool,
  },
  SyntaxError,
  Unauthorized,
  Invalid,
  ConfigError,
  AlreadyExists {
    keyspace: String,
    table: String,
  },
}

impl ServerErrorKind {
  pub fn code(&self) -> i32 {
    match self {
      ServerErrorKind::ServerError => 0x0000,
      ServerErrorKind::ProtocolError => 0x000A,
      ServerErrorKind::BadCredentials => 0x0100,
      ServerErrorKind::Unavailable { .. } => 0x1000,
      ServerErrorKind::Overloaded => 0x1001,
      ServerErrorKind::IsBootstrapping => 0x1002,
      ServerErrorKind::TruncateError => 0x1003,
      ServerErrorKind::WriteTimeout { .. } => 0x1100,
      ServerErrorKind::ReadTimeout { .. } => 0x1200,
      ServerErrorKind::SyntaxError => 0x2000,
      ServerErrorKind::Unauthorized => 0x2100,
      ServerErrorKind::Invalid => 0x2200,
      ServerErrorKind::ConfigError => 0x2300,
      ServerErrorKind::AlreadyExists { .. } => 0x2400,
    }
  }
}

/// Parses the body of an `ERROR` frame (§7): `[int]` code, `[string]` message,
/// then a code-specific tail. Code `0x2500` (Unprepared) bypasses `ServerErrorKind`
/// entirely since the caller needs the unknown id as a distinguished hint to
/// re-run `PREPARE`, not just another server error to display.
pub(crate) fn parse_error_body(mut body: Bytes) -> Result<CqlError> {
  let code = body.cql_get_int()?;
  let message = body.cql_get_string()?;

  if code == 0x2500 {
    let unknown_id = body.cql_get_short_bytes()?;
    return Ok(CqlError::Unprepared { unknown_id });
  }

  let kind = match code {
    0x0000 => ServerErrorKind::ServerError,
    0x000A => ServerErrorKind::ProtocolError,
    0x0100 => ServerErrorKind::BadCredentials,
    0x1000 => ServerErrorKind::Unavailable {
      consistency: Consistency::get(&mut body)?,
      required: body.cql_get_int()?,
      alive: body.cql_get_int()?,
    },
    0x1001 => ServerErrorKind::Overloaded,
    0x1002 => ServerErrorKind::IsBootstrapping,
    0x1003 => ServerErrorKind::TruncateError,
    0x1100 => ServerErrorKind::WriteTimeout {
      consistency: Consistency::get(&mut body)?,
      received: body.cql_get_int()?,
      blockfor: body.cql_get_int()?,
      write_type: body.cql_get_string()?,
    },
    0x1200 => ServerErrorKind::ReadTimeout {
      consistency: Consistency::get(&mut body)?,
      received: body.cql_get_int()?,
      blockfor: body.cql_get_int()?,
      data_present: body.cql_get_byte()? != 0,
    },
    0x2000 => ServerErrorKind::SyntaxError,
    0x2100 => ServerErrorKind::Unauthorized,
    0x2200 => ServerErrorKind::Invalid,
    0x2300 => ServerErrorKind::ConfigError,
    0x2400 => ServerErrorKind::AlreadyExists { keyspace: body.cql_get_string()?, table: body.cql_get_string()? },
    other => return Err(CqlError::wire(format!("unknown error code 0x{other:04x}"))),
  };

  Ok(CqlError::Server { kind, message })
}
