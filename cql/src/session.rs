//! The connection state machine (§4.E) and request dispatch (§4.F): startup
//! handshake, optional authentication, and the `query`/`prepare`/`execute`/
//! `use_keyspace`/`options`/`register`/`next_event`/`close` surface.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use url::Url;

use crate::error::{parse_error_body, CqlError, Result};
use crate::frame::{self, FrameHeader, Opcode, PROTOCOL_V1, PROTOCOL_V2};
use crate::options::{validate_identifier, ConnectionOptions, ProtocolVersion, DEFAULT_PORT};
use crate::primitive::{CqlBufExt, CqlBufMutExt};
use crate::result::{parse_result, Change, PreparedStatement, QueryResult, SchemaChange};
use crate::stream::ByteStream;
use crate::value::{encode_value, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
  Any,
  One,
  Two,
  Three,
  Quorum,
  All,
  LocalQuorum,
  EachQuorum,
  Serial,
  LocalSerial,
}

impl Consistency {
  fn code(self) -> u16 {
    match self {
      Consistency::Any => 0x0000,
      Consistency::One => 0x0001,
      Consistency::Two => 0x0002,
      Consistency::Three => 0x0003,
      Consistency::Quorum => 0x0004,
      Consistency::All => 0x0005,
      Consistency::LocalQuorum => 0x0006,
      Consistency::EachQuorum => 0x0007,
      Consistency::Serial => 0x0008,
      Consistency::LocalSerial => 0x0009,
    }
  }

  fn from_code(code: u16) -> Result<Consistency> {
    Ok(match code {
      0x0000 => Consistency::Any,
      0x0001 => Consistency::One,
      0x0002 => Consistency::Two,
      0x0003 => Consistency::Three,
      0x0004 => Consistency::Quorum,
      0x0005 => Consistency::All,
      0x0006 => Consistency::LocalQuorum,
      0x0007 => Consistency::EachQuorum,
      0x0008 => Consistency::Serial,
      0x0009 => Consistency::LocalSerial,
      other => return Err(CqlError::wire(format!("unknown consistency level 0x{other:04x}"))),
    })
  }

  pub(crate) fn get(buf: &mut impl Buf) -> Result<Consistency> {
    Consistency::from_code(buf.cql_get_short()?)
  }

  pub(crate) fn put(&self, buf: &mut impl BufMut) {
    buf.cql_put_short(self.code());
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
  Fresh,
  Ready,
  Closed,
}

const VALID_EVENTS: [&str; 3] = ["TOPOLOGY_CHANGE", "STATUS_CHANGE", "SCHEMA_CHANGE"];

/// A server-pushed notification delivered to a registered session. Only
/// `SCHEMA_CHANGE` is decoded structurally; `STATUS_CHANGE`/`TOPOLOGY_CHANGE`
/// carry an `[inet]`-plus-port tail whose exact framing isn't pinned down by
/// the protocol surface this crate targets, so it's exposed as a raw tail.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  SchemaChange(SchemaChange),
  Other { event_type: String, tail: Bytes },
}

impl Event {
  fn parse(mut body: Bytes) -> Result<Event> {
    let event_type = body.cql_get_string()?;
    match event_type.as_str() {
      "SCHEMA_CHANGE" => {
        let change = Change::parse(&body.cql_get_string()?)?;
        let keyspace = body.cql_get_string()?;
        let table = body.cql_get_string()?;
        Ok(Event::SchemaChange(SchemaChange { change, keyspace, table }))
      }
      _ => Ok(Event::Other { event_type, tail: body }),
    }
  }
}

/// Owns the single duplex byte stream and the negotiated protocol state.
/// Single-threaded cooperative: only one request may be in flight, and a live
/// `RowSet` reserves the session until it's drained or dropped (§5).
#[derive(Debug)]
pub struct Session {
  stream: ByteStream,
  protocol: u8,
  options: ConnectionOptions,
  state: SessionState,
  used_keyspace: Option<String>,
  reserved: Rc<Cell<bool>>,
}

impl Session {
  /// Opens the TCP connection and returns immediately in the `Fresh` state —
  /// `STARTUP` is not sent yet, so `options()` can still be used to discover
  /// what the node supports before the handshake commits to a protocol
  /// version or compression algorithm. Any other request method triggers the
  /// handshake lazily on first use.
  pub async fn connect(addrs: impl Into<Vec<SocketAddr>>, options: ConnectionOptions) -> Result<Session> {
    let protocol = match options.protocol {
      ProtocolVersion::V1 => PROTOCOL_V1,
      ProtocolVersion::V2 => PROTOCOL_V2,
    };
    let stream = ByteStream::connect(addrs).await?;
    log::debug!("connected to {}, protocol={}", stream.peer_addr(), protocol);
    let session =
      Session { stream, protocol, options, state: SessionState::Fresh, used_keyspace: None, reserved: Rc::new(Cell::new(false)) };
    Ok(session)
  }

  /// Resolves `url.host()`/`url.port()` (default §6 port 9042) and connects,
  /// mirroring the teacher's `Connection::connect_from_url`.
  pub async fn connect_url(url: &Url) -> Result<Session> {
    if url.scheme() != "cql" {
      return Err(CqlError::InvalidArgument(format!("unsupported URL scheme {:?}, expected \"cql\"", url.scheme())));
    }
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let addrs: Vec<SocketAddr> = match url.host() {
      Some(url::Host::Domain(domain)) => tokio::net::lookup_host((domain, port)).await?.collect(),
      Some(url::Host::Ipv4(ip)) => vec![(std::net::IpAddr::V4(ip), port).into()],
      Some(url::Host::Ipv6(ip)) => vec![(std::net::IpAddr::V6(ip), port).into()],
      None => return Err(CqlError::InvalidArgument("url has no host".to_string())),
    };
    let options = ConnectionOptions::try_from(url)?;
    Session::connect(addrs, options).await
  }

  async fn send(&mut self, opcode: Opcode, body: Bytes) -> Result<()> {
    frame::write_frame(&mut self.stream, self.protocol, frame::Flags::empty(), 0, opcode, &body).await
  }

  async fn recv(&mut self) -> Result<(FrameHeader, Bytes)> {
    frame::read_frame(&mut self.stream, self.protocol).await
  }

  async fn roundtrip(&mut self, opcode: Opcode, body: Bytes) -> Result<(FrameHeader, Bytes)> {
    if let Err(e) = self.send(opcode, body).await {
      log::warn!("failed to send {opcode:?}: {e}");
      self.state = SessionState::Closed;
      return Err(e);
    }
    match self.recv().await {
      Ok(ok) => Ok(ok),
      Err(e) => {
        log::warn!("failed to read response to {opcode:?}: {e}");
        self.state = SessionState::Closed;
        Err(e)
      }
    }
  }

  fn check_not_reserved(&self) -> Result<()> {
    if self.reserved.get() {
      Err(CqlError::SessionReserved)
    } else {
      Ok(())
    }
  }

  async fn ensure_ready(&mut self) -> Result<()> {
    match self.state {
      SessionState::Closed => return Err(CqlError::SessionClosed),
      SessionState::Fresh => Box::pin(self.startup()).await?,
      SessionState::Ready => {}
    }
    self.check_not_reserved()
  }

  async fn startup(&mut self) -> Result<()> {
    let compression_name = self.options.compression.map(|c| c.name());
    let mut pairs: Vec<(&str, &str)> = vec![("CQL_VERSION", "3.0.0")];
    if let Some(name) = compression_name {
      pairs.push(("COMPRESSION", name));
    }
    log::debug!("sending STARTUP {:?}", pairs);
    let mut body = BytesMut::new();
    body.cql_put_string_map(&pairs);

    let (header, resp_body) = self.roundtrip(Opcode::Startup, body.freeze()).await?;
    match header.opcode {
      Opcode::Ready => {
        log::debug!("session ready");
        self.state = SessionState::Ready;
        self.apply_configured_keyspace().await
      }
      Opcode::Authenticate => self.authenticate().await,
      Opcode::Error => {
        self.state = SessionState::Closed;
        let err = parse_error_body(resp_body)?;
        log::warn!("STARTUP rejected: {err}");
        Err(err)
      }
      other => {
        self.state = SessionState::Closed;
        log::warn!("unexpected opcode {other:?} in response to STARTUP");
        Err(CqlError::wire(format!("unexpected opcode {other:?} in response to STARTUP")))
      }
    }
  }

  /// Applies the keyspace named in `ConnectionOptions`, if any, the first
  /// time the session reaches `Ready` — the way the teacher's MySQL client
  /// folds its `database` option straight into the handshake, except this
  /// protocol has no such handshake field, so it's a follow-up `USE` instead.
  async fn apply_configured_keyspace(&mut self) -> Result<()> {
    if let Some(keyspace) = self.options.keyspace.clone() {
      self.use_keyspace(&keyspace).await?;
    }
    Ok(())
  }

  /// Credential sourcing is an external collaborator (§4.E): this just plays
  /// the two dialects' wire exchange using whatever `ConnectionOptions` carries.
  async fn authenticate(&mut self) -> Result<()> {
    let user = self.options.user.clone().unwrap_or_default();
    let password = self.options.password.clone().unwrap_or_default();

    let body = if self.protocol == PROTOCOL_V1 {
      let mut b = BytesMut::new();
      b.cql_put_string_list(&[user.as_str(), password.as_str()]);
      b.freeze()
    } else {
      let mut token = Vec::with_capacity(user.len() + password.len() + 2);
      token.push(0u8);
      token.extend_from_slice(user.as_bytes());
      token.push(0u8);
      token.extend_from_slice(password.as_bytes());
      let mut b = BytesMut::new();
      b.cql_put_bytes(Some(&token));
      b.freeze()
    };

    let opcode = if self.protocol == PROTOCOL_V1 { Opcode::Credentials } else { Opcode::AuthResponse };
    log::debug!("sending {opcode:?} for user {user:?}");
    let (header, resp_body) = self.roundtrip(opcode, body).await?;

    match header.opcode {
      Opcode::Ready | Opcode::AuthSuccess => {
        log::debug!("session ready (authenticated)");
        self.state = SessionState::Ready;
        self.apply_configured_keyspace().await
      }
      Opcode::AuthChallenge => {
        self.state = SessionState::Closed;
        log::warn!("server requested an AUTH_CHALLENGE continuation, which is unsupported");
        Err(CqlError::wire("server requested an AUTH_CHALLENGE continuation, which this driver's SASL PLAIN exchange does not support"))
      }
      Opcode::Error => {
        self.state = SessionState::Closed;
        let err = parse_error_body(resp_body)?;
        log::warn!("authentication rejected: {err}");
        Err(err)
      }
      other => {
        self.state = SessionState::Closed;
        log::warn!("unexpected opcode {other:?} during authentication");
        Err(CqlError::wire(format!("unexpected opcode {other:?} during authentication")))
      }
    }
  }

  fn handle_result_response(&mut self, header: FrameHeader, body: Bytes) -> Result<QueryResult> {
    match header.opcode {
      Opcode::Result => parse_result(body, self.protocol, self.reserved.clone()),
      Opcode::Error => Err(parse_error_body(body)?),
      other => Err(CqlError::wire(format!("unexpected opcode {other:?} in response to a request expecting RESULT"))),
    }
  }

  pub async fn query(&mut self, text: &str, consistency: Consistency) -> Result<QueryResult> {
    self.ensure_ready().await?;
    let mut body = BytesMut::new();
    body.cql_put_long_string(text);
    consistency.put(&mut body);
    if self.protocol == PROTOCOL_V2 {
      body.put_u8(0x00); // no bind values, no paging, no serial consistency
    }
    let (header, resp_body) = self.roundtrip(Opcode::Query, body.freeze()).await?;
    self.handle_result_response(header, resp_body)
  }

  pub async fn prepare(&mut self, text: &str) -> Result<PreparedStatement> {
    self.ensure_ready().await?;
    let mut body = BytesMut::new();
    body.cql_put_long_string(text);
    let (header, resp_body) = self.roundtrip(Opcode::Prepare, body.freeze()).await?;
    match self.handle_result_response(header, resp_body)? {
      QueryResult::Prepared(stmt) => Ok(stmt),
      other => Err(CqlError::wire(format!("expected a Prepared result, got {other:?}"))),
    }
  }

  pub async fn execute(&mut self, stmt: &PreparedStatement, args: &[Value], consistency: Consistency) -> Result<QueryResult> {
    self.ensure_ready().await?;
    let mut body = BytesMut::new();
    body.cql_put_short_bytes(&stmt.id);

    if self.protocol == PROTOCOL_V1 {
      body.cql_put_short(args.len() as u16);
      for arg in args {
        body.cql_put_bytes(encode_value(arg).as_deref());
      }
      consistency.put(&mut body);
    } else {
      consistency.put(&mut body);
      let flags: u8 = if args.is_empty() { 0x00 } else { 0x01 };
      body.put_u8(flags);
      if !args.is_empty() {
        body.cql_put_short(args.len() as u16);
        for arg in args {
          body.cql_put_bytes(encode_value(arg).as_deref());
        }
      }
    }

    let (header, resp_body) = self.roundtrip(Opcode::Execute, body.freeze()).await?;
    self.handle_result_response(header, resp_body)
  }

  pub async fn use_keyspace(&mut self, name: &str) -> Result<()> {
    validate_identifier(name)?;
    if self.used_keyspace.as_deref() == Some(name) {
      return Ok(());
    }
    match self.query(&format!("USE {name}"), Consistency::Any).await? {
      QueryResult::SetKeyspace(ks) => {
        self.used_keyspace = Some(ks);
        Ok(())
      }
      other => Err(CqlError::wire(format!("expected a SetKeyspace result, got {other:?}"))),
    }
  }

  /// Sends `OPTIONS` and returns the `SUPPORTED` body, e.g. to discover which
  /// `COMPRESSION` algorithms a node accepts before `STARTUP`. Unlike the
  /// other request methods this does not trigger the handshake: `OPTIONS` is
  /// legal in `Fresh` as well as `Ready`, since a caller is meant to be able
  /// to probe a node's capabilities before committing to a protocol version.
  pub async fn options(&mut self) -> Result<Vec<(String, Vec<String>)>> {
    if self.state == SessionState::Closed {
      return Err(CqlError::SessionClosed);
    }
    self.check_not_reserved()?;
    let (header, mut resp_body) = self.roundtrip(Opcode::Options, Bytes::new()).await?;
    match header.opcode {
      Opcode::Supported => resp_body.cql_get_string_multimap(),
      Opcode::Error => Err(parse_error_body(resp_body)?),
      other => Err(CqlError::wire(format!("unexpected opcode {other:?} in response to OPTIONS"))),
    }
  }

  pub async fn register(&mut self, events: &[&str]) -> Result<()> {
    for event in events {
      if !VALID_EVENTS.contains(event) {
        return Err(CqlError::InvalidArgument(format!("unknown event type {event:?}")));
      }
    }
    self.ensure_ready().await?;
    let mut body = BytesMut::new();
    body.cql_put_string_list(events);
    let (header, resp_body) = self.roundtrip(Opcode::Register, body.freeze()).await?;
    match header.opcode {
      Opcode::Ready => Ok(()),
      Opcode::Error => Err(parse_error_body(resp_body)?),
      other => Err(CqlError::wire(format!("unexpected opcode {other:?} in response to REGISTER"))),
    }
  }

  /// The only legal read after `register()`: a server-pushed `EVENT` frame
  /// (stream id -1). Kept as its own method rather than folded into the
  /// generic response path so a mis-timed call is an explicit API choice.
  pub async fn next_event(&mut self) -> Result<Event> {
    if self.state == SessionState::Closed {
      return Err(CqlError::SessionClosed);
    }
    let (header, body) = self.recv().await?;
    if header.stream_id != -1 {
      self.state = SessionState::Closed;
      return Err(CqlError::wire("expected a server-pushed frame with stream id -1"));
    }
    match header.opcode {
      Opcode::Event => Event::parse(body),
      Opcode::Error => Err(parse_error_body(body)?),
      other => Err(CqlError::wire(format!("unexpected opcode {other:?} while waiting for an EVENT"))),
    }
  }

  pub fn is_ready(&self) -> bool {
    self.state == SessionState::Ready
  }

  pub fn is_closed(&self) -> bool {
    self.state == SessionState::Closed
  }

  pub async fn close(&mut self) -> Result<()> {
    if self.state == SessionState::Closed {
      return Ok(());
    }
    log::debug!("closing session");
    self.state = SessionState::Closed;
    self.stream.close().await
  }
}
