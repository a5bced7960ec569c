//! End-to-end tests driving `Session` against a local mock listener that
//! scripts literal frame byte sequences, in the style of
//! `mysql/tests/mysql_integration_test.rs` (`#[tokio::test]` against a real
//! server) — except here the "server" is an in-process task, since no live
//! cluster is available in this environment.

use std::net::SocketAddr;

use bigdecimal::BigDecimal;
use bytes::{Buf, BufMut, BytesMut};
use cql::{ColumnType, CompressionAlgorithm, ConnectionOptions, ProtocolVersion, Session, Value};
use num_bigint::BigInt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn init_logging() {
  let _ = env_logger::try_init();
}

async fn mock_listener() -> (TcpListener, SocketAddr) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  (listener, addr)
}

async fn read_frame(conn: &mut TcpStream) -> (Vec<u8>, Vec<u8>) {
  let mut header = vec![0u8; 8];
  conn.read_exact(&mut header).await.unwrap();
  let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
  let mut body = vec![0u8; length];
  conn.read_exact(&mut body).await.unwrap();
  (header, body)
}

fn response_frame(opcode: u8, protocol: u8, body: &[u8]) -> Vec<u8> {
  let mut out = BytesMut::new();
  out.put_u8(0x80 | protocol);
  out.put_u8(0x00);
  out.put_i8(0);
  out.put_u8(opcode);
  out.put_u32(body.len() as u32);
  out.put_slice(body);
  out.to_vec()
}

#[tokio::test]
async fn s1_startup_ready_matches_documented_bytes() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (header, body) = read_frame(&mut conn).await;
    assert_eq!(header, vec![0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x16]);
    assert_eq!(body, b"\x00\x01\x00\x0BCQL_VERSION\x00\x053.0.0".to_vec());
    conn.write_all(&response_frame(0x02, 0x01, &[])).await.unwrap();

    let (_header, _body) = read_frame(&mut conn).await; // QUERY, triggered lazily
    let mut void_body = BytesMut::new();
    void_body.put_i32(0x01);
    conn.write_all(&response_frame(0x08, 0x01, &void_body)).await.unwrap();
  });

  let options = ConnectionOptions { protocol: ProtocolVersion::V1, ..Default::default() };
  let mut session = Session::connect(vec![addr], options).await.unwrap();
  assert!(!session.is_ready(), "connect() must not run the handshake eagerly");

  session.query("SELECT 1", cql::Consistency::One).await.unwrap();
  assert!(session.is_ready());

  server.await.unwrap();
}

#[tokio::test]
async fn options_can_be_queried_before_startup() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (header, body) = read_frame(&mut conn).await;
    assert_eq!(header[3], 0x05, "expected OPTIONS as the first frame, not STARTUP");
    assert!(body.is_empty());

    let mut supported_body = BytesMut::new();
    supported_body.put_u16(1);
    supported_body.put_u16(b"COMPRESSION".len() as u16);
    supported_body.put_slice(b"COMPRESSION");
    supported_body.put_u16(2);
    supported_body.put_u16(b"lz4".len() as u16);
    supported_body.put_slice(b"lz4");
    supported_body.put_u16(b"snappy".len() as u16);
    supported_body.put_slice(b"snappy");
    conn.write_all(&response_frame(0x06, 0x02, &supported_body)).await.unwrap();
  });

  let mut session = Session::connect(vec![addr], ConnectionOptions::default()).await.unwrap();
  assert!(!session.is_ready());
  let supported = session.options().await.unwrap();
  assert!(!session.is_ready(), "OPTIONS must not trigger STARTUP");
  assert_eq!(supported, vec![("COMPRESSION".to_string(), vec!["lz4".to_string(), "snappy".to_string()])]);

  server.await.unwrap();
}

#[tokio::test]
async fn keyspace_from_connection_options_is_applied_once_ready() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (_h, _b) = read_frame(&mut conn).await; // STARTUP
    conn.write_all(&response_frame(0x02, 0x02, &[])).await.unwrap(); // READY

    let (_h, body) = read_frame(&mut conn).await; // QUERY "USE ks", issued internally
    let mut cursor = body.as_slice();
    let len = cursor.get_u32() as usize;
    let text = std::str::from_utf8(&cursor[..len]).unwrap();
    assert_eq!(text, "USE ks");
    let mut set_keyspace_body = BytesMut::new();
    set_keyspace_body.put_i32(0x03);
    set_keyspace_body.put_u16(b"ks".len() as u16);
    set_keyspace_body.put_slice(b"ks");
    conn.write_all(&response_frame(0x08, 0x02, &set_keyspace_body)).await.unwrap();

    let (_h, _b) = read_frame(&mut conn).await; // the caller's own QUERY
    let mut void_body = BytesMut::new();
    void_body.put_i32(0x01);
    conn.write_all(&response_frame(0x08, 0x02, &void_body)).await.unwrap();
  });

  let options = ConnectionOptions { keyspace: Some("ks".to_string()), ..Default::default() };
  let mut session = Session::connect(vec![addr], options).await.unwrap();
  assert!(!session.is_ready());
  // The first real request drives STARTUP, which in turn applies the
  // configured keyspace via an internal USE, before the caller's own query runs.
  session.query("SELECT 1", cql::Consistency::One).await.unwrap();
  assert!(session.is_ready());

  server.await.unwrap();
}

#[tokio::test]
async fn s2_query_returning_rows_yields_one_row_then_exhausted() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (_header, _body) = read_frame(&mut conn).await; // STARTUP
    conn.write_all(&response_frame(0x02, 0x02, &[])).await.unwrap(); // READY

    let (_header, _body) = read_frame(&mut conn).await; // QUERY

    let mut rows_body = BytesMut::new();
    rows_body.put_i32(0x02); // RESULT kind: Rows
    rows_body.put_i32(0x0001); // metadata flags: global_tables_spec
    rows_body.put_i32(2); // column count
    rows_body.put_u16(b"ks".len() as u16);
    rows_body.put_slice(b"ks");
    rows_body.put_u16(b"t".len() as u16);
    rows_body.put_slice(b"t");
    rows_body.put_u16(b"k".len() as u16);
    rows_body.put_slice(b"k");
    ColumnType::VarChar.put(&mut rows_body);
    rows_body.put_u16(b"v".len() as u16);
    rows_body.put_slice(b"v");
    ColumnType::Int.put(&mut rows_body);
    rows_body.put_i32(1); // row count
    rows_body.put_i32(1); // [bytes] length of "x"
    rows_body.put_slice(b"x");
    rows_body.put_i32(4); // [bytes] length of the int
    rows_body.put_i32(42);

    conn.write_all(&response_frame(0x08, 0x02, &rows_body)).await.unwrap();
  });

  let mut session = Session::connect(vec![addr], ConnectionOptions::default()).await.unwrap();
  let result = session.query("SELECT k,v FROM t", cql::Consistency::One).await.unwrap();
  match result {
    cql::QueryResult::Rows(mut rows) => {
      let row = rows.next_row().unwrap();
      assert_eq!(row.get(0), Some(&Value::VarChar("x".to_string())));
      assert_eq!(row.get(1), Some(&Value::Int(42)));
      assert!(matches!(rows.next_row(), Err(cql::CqlError::Exhausted)));
    }
    other => panic!("expected Rows, got {other:?}"),
  }

  server.await.unwrap();
}

#[tokio::test]
async fn s3_unprepared_reprepare_hint() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (_h, _b) = read_frame(&mut conn).await; // STARTUP
    conn.write_all(&response_frame(0x02, 0x02, &[])).await.unwrap(); // READY

    let (_h, _b) = read_frame(&mut conn).await; // PREPARE
    let mut prepared_body = BytesMut::new();
    prepared_body.put_i32(0x04); // RESULT kind: Prepared
    prepared_body.put_u16(1); // id length
    prepared_body.put_slice(&[0xb1]);
    prepared_body.put_i32(0x0000); // bind metadata flags
    prepared_body.put_i32(0); // bind metadata column count
    conn.write_all(&response_frame(0x08, 0x02, &prepared_body)).await.unwrap();

    let (_h, _b) = read_frame(&mut conn).await; // EXECUTE
    let mut error_body = BytesMut::new();
    error_body.put_i32(0x2500);
    error_body.put_u16(b"Unprepared statement".len() as u16);
    error_body.put_slice(b"Unprepared statement");
    error_body.put_u16(1);
    error_body.put_slice(&[0xb1]);
    conn.write_all(&response_frame(0x00, 0x02, &error_body)).await.unwrap();
  });

  let mut session = Session::connect(vec![addr], ConnectionOptions::default()).await.unwrap();
  let stmt = session.prepare("INSERT INTO t(k,v) VALUES(?,?)").await.unwrap();
  assert_eq!(stmt.id.as_ref(), &[0xb1]);

  let err = session
    .execute(&stmt, &[Value::VarChar("y".to_string()), Value::Int(7)], cql::Consistency::Any)
    .await
    .unwrap_err();
  match err {
    cql::CqlError::Unprepared { unknown_id } => assert_eq!(unknown_id.as_ref(), &[0xb1]),
    other => panic!("expected Unprepared, got {other:?}"),
  }

  server.await.unwrap();
}

#[tokio::test]
async fn s4_unavailable_error_end_to_end() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (_h, _b) = read_frame(&mut conn).await; // STARTUP
    conn.write_all(&response_frame(0x02, 0x02, &[])).await.unwrap(); // READY

    let (_h, _b) = read_frame(&mut conn).await; // QUERY
    let mut error_body = BytesMut::new();
    error_body.put_i32(0x1000);
    error_body.put_u16(b"Cannot achieve consistency".len() as u16);
    error_body.put_slice(b"Cannot achieve consistency");
    error_body.put_u16(0x0004); // QUORUM
    error_body.put_i32(3);
    error_body.put_i32(1);
    conn.write_all(&response_frame(0x00, 0x02, &error_body)).await.unwrap();
  });

  let mut session = Session::connect(vec![addr], ConnectionOptions::default()).await.unwrap();
  let err = session.query("SELECT k FROM t", cql::Consistency::Quorum).await.unwrap_err();
  match err {
    cql::CqlError::Server { kind: cql::ServerErrorKind::Unavailable { consistency, required, alive }, message } => {
      assert_eq!(consistency, cql::Consistency::Quorum);
      assert_eq!(required, 3);
      assert_eq!(alive, 1);
      assert_eq!(message, "Cannot achieve consistency");
    }
    other => panic!("expected Unavailable, got {other:?}"),
  }

  server.await.unwrap();
}

#[tokio::test]
async fn s5_schema_change_end_to_end() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (_h, _b) = read_frame(&mut conn).await; // STARTUP
    conn.write_all(&response_frame(0x02, 0x02, &[])).await.unwrap(); // READY

    let (_h, _b) = read_frame(&mut conn).await; // QUERY "CREATE KEYSPACE ks"
    let mut schema_change_body = BytesMut::new();
    schema_change_body.put_i32(0x05);
    schema_change_body.put_u16(b"CREATED".len() as u16);
    schema_change_body.put_slice(b"CREATED");
    schema_change_body.put_u16(b"ks".len() as u16);
    schema_change_body.put_slice(b"ks");
    schema_change_body.put_u16(0);
    conn.write_all(&response_frame(0x08, 0x02, &schema_change_body)).await.unwrap();
  });

  let mut session = Session::connect(vec![addr], ConnectionOptions::default()).await.unwrap();
  let result = session.query("CREATE KEYSPACE ks", cql::Consistency::One).await.unwrap();
  match result {
    cql::QueryResult::SchemaChange(change) => {
      assert_eq!(change.change, cql::Change::Created);
      assert_eq!(change.keyspace, "ks");
      assert_eq!(change.table, "");
    }
    other => panic!("expected SchemaChange, got {other:?}"),
  }

  server.await.unwrap();
}

#[tokio::test]
async fn s6_decimal_and_varint_round_trip_end_to_end() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (_h, _b) = read_frame(&mut conn).await; // STARTUP
    conn.write_all(&response_frame(0x02, 0x02, &[])).await.unwrap(); // READY

    let (_h, _b) = read_frame(&mut conn).await; // QUERY

    let mut rows_body = BytesMut::new();
    rows_body.put_i32(0x02);
    rows_body.put_i32(0x0001); // global_tables_spec
    rows_body.put_i32(2);
    rows_body.put_u16(b"ks".len() as u16);
    rows_body.put_slice(b"ks");
    rows_body.put_u16(b"t".len() as u16);
    rows_body.put_slice(b"t");
    rows_body.put_u16(b"balance".len() as u16);
    rows_body.put_slice(b"balance");
    ColumnType::Decimal.put(&mut rows_body);
    rows_body.put_u16(b"version".len() as u16);
    rows_body.put_slice(b"version");
    ColumnType::VarInt.put(&mut rows_body);
    rows_body.put_i32(1); // row count

    // Decimal{scale:2, mantissa:-12345}: `[int scale][varint mantissa]`,
    // mantissa sign-extended to `FF FF CF C7`.
    let decimal_bytes: &[u8] = &[0x00, 0x00, 0x00, 0x02, 0xFF, 0xFF, 0xCF, 0xC7];
    rows_body.put_i32(decimal_bytes.len() as i32);
    rows_body.put_slice(decimal_bytes);

    // VarInt for i64::MAX.
    let varint_bytes: &[u8] = &[0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
    rows_body.put_i32(varint_bytes.len() as i32);
    rows_body.put_slice(varint_bytes);

    conn.write_all(&response_frame(0x08, 0x02, &rows_body)).await.unwrap();
  });

  let mut session = Session::connect(vec![addr], ConnectionOptions::default()).await.unwrap();
  let result = session.query("SELECT balance, version FROM accounts", cql::Consistency::One).await.unwrap();
  match result {
    cql::QueryResult::Rows(mut rows) => {
      let row = rows.next_row().unwrap();
      assert_eq!(row.get(0), Some(&Value::Decimal(BigDecimal::new(BigInt::from(-12345), 2))));
      assert_eq!(row.get(1), Some(&Value::VarInt(BigInt::from(i64::MAX))));
    }
    other => panic!("expected Rows, got {other:?}"),
  }

  server.await.unwrap();
}

#[tokio::test]
async fn connection_options_plumb_compression_into_startup() {
  init_logging();
  let (listener, addr) = mock_listener().await;

  let server = tokio::spawn(async move {
    let (mut conn, _) = listener.accept().await.unwrap();
    let (_header, body) = read_frame(&mut conn).await;
    let mut cursor = body.as_slice();
    let count = cursor.get_u16();
    assert_eq!(count, 2);
    conn.write_all(&response_frame(0x02, 0x02, &[])).await.unwrap();

    let (_header, _body) = read_frame(&mut conn).await; // QUERY, triggered lazily
    let mut void_body = BytesMut::new();
    void_body.put_i32(0x01);
    conn.write_all(&response_frame(0x08, 0x02, &void_body)).await.unwrap();
  });

  let options = ConnectionOptions { compression: Some(CompressionAlgorithm::Lz4), ..Default::default() };
  let mut session = Session::connect(vec![addr], options).await.unwrap();
  assert!(!session.is_ready());
  session.query("SELECT 1", cql::Consistency::One).await.unwrap();

  server.await.unwrap();
}
