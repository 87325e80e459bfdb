//! Dispatch loops for the V2 request/response cycle.
use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    Result,
    column::{FieldDescription, Format},
    common::{debug, trace},
    error::ErrorChain,
    postgres::{BackendError, Notice, Notification, ProtocolError, RowDescription, backend},
    query::Query,
    row::Row,
    sink::ResultSink,
    transaction::TransactionStatus,
    transport::V2Transport,
};

/// Drain one unit of work: feed decoded backend messages to `sink` until
/// the ready-for-query marker.
///
/// Backend errors are delivered and draining continues; resynchronizing on
/// the ready marker is the only way to keep the connection usable for the
/// next unit of work. A returned error is fatal to the connection.
pub(crate) async fn process_results<T, H>(
    io: &mut T,
    transaction: &mut TransactionStatus,
    notifications: &mut VecDeque<Notification>,
    query: &Query,
    sink: &mut H,
    max_rows: usize,
) -> Result<()>
where
    T: V2Transport,
    H: ResultSink,
{
    let mut fields: Option<Vec<FieldDescription>> = None;
    let mut rows = Vec::new();

    loop {
        match io.recv_u8().await? {
            Notification::MSGTYPE => {
                let notification = Notification::read(io).await?;
                debug!(
                    "<=BE AsyncNotify(pid={},msg={})",
                    notification.process_id, notification.payload,
                );
                notifications.push_back(notification);
            }
            backend::BINARY_ROW => {
                let Some(fields) = fields.as_mut() else {
                    return Err(ProtocolError::malformed("data row before row description").into());
                };
                trace!("<=BE BinaryRow");
                let row = Row::read(io, fields.len(), true).await?;
                for field in fields.iter_mut() {
                    field.format = Format::Binary;
                }
                if max_rows == 0 || rows.len() < max_rows {
                    rows.push(row);
                }
            }
            backend::COMMAND_STATUS => {
                let status = io.recv_string().await?;
                debug!("<=BE CommandStatus({status})");
                match fields.take() {
                    Some(fields) => sink.handle_rows(query, fields, std::mem::take(&mut rows)),
                    None => interpret_command_status(&status, transaction, sink),
                }
            }
            backend::TEXT_ROW => {
                let Some(fields) = fields.as_ref() else {
                    return Err(ProtocolError::malformed("data row before row description").into());
                };
                trace!("<=BE DataRow");
                let row = Row::read(io, fields.len(), false).await?;
                if max_rows == 0 || rows.len() < max_rows {
                    rows.push(row);
                }
            }
            BackendError::MSGTYPE => {
                let error = BackendError::read(io).await?;
                debug!("<=BE ErrorResponse({error})");
                sink.handle_error(error.into());
                // keep draining
            }
            backend::EMPTY_QUERY => {
                debug!("<=BE EmptyQuery");
                io.recv_i32().await?;
            }
            Notice::MSGTYPE => {
                let notice = Notice::read(io).await?;
                debug!("<=BE NoticeResponse({})", notice.message);
                sink.handle_warning(notice.message);
            }
            backend::PORTAL_NAME => {
                let _portal = io.recv_string().await?;
                debug!("<=BE PortalName({_portal})");
            }
            RowDescription::MSGTYPE => {
                let description = RowDescription::read(io).await?;
                debug!("<=BE RowDescription({})", description.fields.len());
                fields = Some(description.fields);
                rows = Vec::new();
            }
            backend::READY_FOR_QUERY => {
                debug!("<=BE ReadyForQuery");
                return Ok(());
            }
            tag => return Err(ProtocolError::unexpected_phase(tag, "query response").into()),
        }
    }
}

/// Interpret a command-status tag.
///
/// Transaction transitions are checked first; the affected-row count and
/// generated id are only parsed for the data-modifying tags, which never
/// overlap with the transaction ones. A malformed count is reported as a
/// delivered error and the status is dropped, not delivered.
fn interpret_command_status<H: ResultSink>(
    status: &str,
    transaction: &mut TransactionStatus,
    sink: &mut H,
) {
    let mut rows = 0;
    let mut oid = 0;

    if status == "BEGIN" {
        *transaction = TransactionStatus::Open;
    } else if status == "COMMIT" || status == "ROLLBACK" {
        *transaction = TransactionStatus::Idle;
    } else if status.starts_with("INSERT")
        || status.starts_with("UPDATE")
        || status.starts_with("DELETE")
        || status.starts_with("MOVE")
    {
        match parse_tag_counts(status) {
            Some((parsed_rows, parsed_oid)) => {
                rows = parsed_rows;
                oid = parsed_oid;
            }
            None => {
                sink.handle_error(
                    ProtocolError::malformed(format!(
                        "unable to interpret the update count in command completion tag: {status}",
                    ))
                    .into(),
                );
                return;
            }
        }
    }

    sink.handle_command_status(status, rows, oid);
}

/// Parse `"INSERT 4521 3"` as `(3, 4521)`, `"UPDATE 7"` as `(7, 0)`.
///
/// The affected-row count is the token after the last space; for `INSERT`
/// the generated id is the middle token.
fn parse_tag_counts(status: &str) -> Option<(u64, u64)> {
    let last_space = status.rfind(' ')?;
    let rows = status[last_space + 1..].parse().ok()?;

    let mut oid = 0;
    if status.starts_with("INSERT") {
        let first_space = status.find(' ')?;
        if first_space == last_space {
            return None;
        }
        oid = status[first_space + 1..last_space].parse().ok()?;
    }

    Some((rows, oid))
}

/// Drain a fastpath-call response: a restricted grammar ending on the
/// ready marker.
///
/// Backend errors are chained and surfaced only after the marker; notices
/// land in the connection-level warning list since there is no sink here.
pub(crate) async fn receive_fastpath_result<T: V2Transport>(
    io: &mut T,
    notifications: &mut VecDeque<Notification>,
    warnings: &mut Vec<String>,
) -> Result<Option<Bytes>> {
    let mut errors = ErrorChain::default();
    let mut result = None;

    loop {
        match io.recv_u8().await? {
            Notification::MSGTYPE => {
                let notification = Notification::read(io).await?;
                debug!(
                    "<=BE AsyncNotify(pid={},msg={})",
                    notification.process_id, notification.payload,
                );
                notifications.push_back(notification);
            }
            BackendError::MSGTYPE => {
                let error = BackendError::read(io).await?;
                debug!("<=BE ErrorResponse({error})");
                errors.push(error.into());
            }
            Notice::MSGTYPE => {
                let notice = Notice::read(io).await?;
                debug!("<=BE NoticeResponse({})", notice.message);
                warnings.push(notice.message);
            }
            backend::FASTPATH_RESULT => {
                let mut confirm = io.recv_u8().await?;
                if confirm == b'G' {
                    debug!("<=BE FastpathResult");
                    let len = io.recv_i32().await?;
                    let len = usize::try_from(len)
                        .map_err(|_| ProtocolError::malformed("negative fastpath result length"))?;
                    result = Some(io.recv_bytes(len).await?);
                    confirm = io.recv_u8().await?;
                } else {
                    debug!("<=BE FastpathVoidResult");
                }
                if confirm != b'0' {
                    return Err(
                        ProtocolError::unexpected_phase(confirm, "fastpath response").into()
                    );
                }
            }
            backend::READY_FOR_QUERY => {
                debug!("<=BE ReadyForQuery");
                break;
            }
            tag => return Err(ProtocolError::unexpected_phase(tag, "fastpath response").into()),
        }
    }

    errors.finish()?;
    Ok(result)
}
