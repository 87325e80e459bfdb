//! V2 wire protocol messages.
//!
//! The legacy (pre-extended-query) grammar: outbound messages are a tag
//! byte followed by a tag-specific payload, inbound messages likewise but
//! with no length prefix.
pub mod backend;
pub mod frontend;

mod error;

pub use backend::{BackendError, Notice, Notification, RowDescription};
pub use error::ProtocolError;

/// Postgres object id.
pub type Oid = u32;
