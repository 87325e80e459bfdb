//! # postv2
//!
//! Query execution engine for the legacy V2 postgres wire protocol.
//!
//! The engine drives one request/response cycle at a time over a
//! [`V2Transport`]: buffer an outbound message, flush it as one unit, then
//! drain backend messages to a [`ResultSink`] until the ready-for-query
//! marker. Backend errors never abort the drain; they accumulate and
//! surface as a chain at completion.
//!
//! ```no_run
//! # async fn demo() -> postv2::Result<()> {
//! use postv2::{BufStream, Connection, Query, QueryResults};
//!
//! let socket = tokio::net::TcpStream::connect("localhost:5432").await?;
//! let mut conn = Connection::new(BufStream::new(socket));
//!
//! let query = Query::parse("select name from users where id = ?");
//! let mut params = query.parameters();
//! params.bind_int(1, 7)?;
//!
//! let mut results = QueryResults::default();
//! conn.execute(&query, Some(&params), &mut results, 0, false).await?;
//! # Ok(())
//! # }
//! ```

mod common;

pub mod ext;
pub mod transport;
pub mod postgres;

#[cfg(feature = "tokio")]
mod stream;

pub mod column;
pub mod query;
pub mod row;
pub mod sink;
pub mod transaction;

mod protocol;
pub mod connection;

mod error;

pub use column::{FieldDescription, Format};
pub use connection::{Connection, Unsupported};
pub use error::{Error, ErrorChain, ErrorKind, Result};
pub use postgres::Notification;
pub use query::{BindError, FastpathParam, FastpathParams, ParameterList, Query};
pub use row::Row;
pub use sink::{CommandTag, QueryResults, ResultSink, RowBatch};
pub use transaction::TransactionStatus;
pub use transport::V2Transport;

#[cfg(feature = "tokio")]
pub use stream::BufStream;
