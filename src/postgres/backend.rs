//! V2 backend messages.
//!
//! Each message is a single tag byte followed by a payload whose layout is
//! implied by the tag, so messages are read incrementally off the
//! transport instead of being framed up front.
use std::fmt;

use crate::{
    Result,
    column::{FieldDescription, Format},
    transport::V2Transport,
};

/// Binary data row.
pub const BINARY_ROW: u8 = b'B';
/// Command completion status string.
pub const COMMAND_STATUS: u8 = b'C';
/// Text data row.
pub const TEXT_ROW: u8 = b'D';
/// Acknowledgment of an empty query string.
pub const EMPTY_QUERY: u8 = b'I';
/// Portal name echo, informational only.
pub const PORTAL_NAME: u8 = b'P';
/// Fastpath call result.
pub const FASTPATH_RESULT: u8 = b'V';
/// Ready for the next unit of work.
pub const READY_FOR_QUERY: u8 = b'Z';

/// Message name for a tag byte, for diagnostics. `"Unknown"` for an
/// unknown tag.
pub fn message_name(tag: u8) -> &'static str {
    match tag {
        Notification::MSGTYPE => "AsyncNotify",
        BINARY_ROW => "BinaryRow",
        COMMAND_STATUS => "CommandStatus",
        TEXT_ROW => "DataRow",
        BackendError::MSGTYPE => "ErrorResponse",
        EMPTY_QUERY => "EmptyQuery",
        Notice::MSGTYPE => "NoticeResponse",
        PORTAL_NAME => "PortalName",
        RowDescription::MSGTYPE => "RowDescription",
        FASTPATH_RESULT => "FastpathResult",
        READY_FOR_QUERY => "ReadyForQuery",
        _ => "Unknown",
    }
}

/// Identifies the message as a row description: the column layout of the
/// rows that follow, and the start of a fresh result batch.
#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';

    pub(crate) async fn read<T: V2Transport>(io: &mut T) -> Result<Self> {
        let count = io.recv_i16().await? as u16 as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(FieldDescription {
                name: io.recv_string().await?,
                type_oid: io.recv_i32().await? as u32,
                type_len: io.recv_i16().await?,
                type_modifier: io.recv_i32().await?,
                // discovered from the first binary row batch, if any
                format: Format::Text,
            });
        }
        Ok(Self { fields })
    }
}

/// Identifies the message as an asynchronous notification from another
/// session, delivered to the connection's notification queue rather than
/// to a result sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process id of the notifying backend.
    pub process_id: i32,
    /// The notification payload.
    pub payload: String,
}

impl Notification {
    pub const MSGTYPE: u8 = b'A';

    pub(crate) async fn read<T: V2Transport>(io: &mut T) -> Result<Self> {
        Ok(Self {
            process_id: io.recv_i32().await?,
            payload: io.recv_string().await?,
        })
    }
}

/// Identifies the message as a business-logic error reported by the
/// backend.
///
/// Recoverable at the connection level: the dispatch loop keeps draining
/// after one of these, and several may arrive in one unit of work.
#[derive(Debug)]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub const MSGTYPE: u8 = b'E';

    pub(crate) async fn read<T: V2Transport>(io: &mut T) -> Result<Self> {
        let message = io.recv_string().await?;
        Ok(Self { message: message.trim().to_owned() })
    }
}

impl std::error::Error for BackendError { }

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Identifies the message as a notice. Delivered as a warning, not an
/// error.
#[derive(Debug)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    pub const MSGTYPE: u8 = b'N';

    pub(crate) async fn read<T: V2Transport>(io: &mut T) -> Result<Self> {
        let message = io.recv_string().await?;
        Ok(Self { message: message.trim().to_owned() })
    }
}
