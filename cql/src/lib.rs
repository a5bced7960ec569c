#![allow(dead_code)]

mod debug;
mod error;
mod frame;
mod options;
mod primitive;
mod result;
mod session;
mod stream;
mod value;

pub use error::{CqlError, Result, ServerErrorKind};
pub use options::{CompressionAlgorithm, ConnectionOptions, ProtocolVersion};
pub use result::{Change, ColumnSpec, MetaData, PreparedStatement, QueryResult, Row, RowSet, SchemaChange};
pub use session::{Consistency, Event, Session};
pub use value::{ColumnType, Value};
