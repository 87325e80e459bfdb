//! The [`Connection`] query-execution engine.
use std::{collections::VecDeque, fmt, io};

use bytes::Bytes;

use crate::{
    Error, ErrorKind, Result,
    column::FieldDescription,
    common::debug,
    postgres::{
        BackendError, Notification,
        frontend::{FastpathCall, QueryMessage},
    },
    protocol::{process_results, receive_fastpath_result},
    query::{BindError, FastpathParams, ParameterList, Query},
    row::Row,
    sink::ResultSink,
    transaction::TransactionStatus,
    transport::V2Transport,
};

/// Query execution engine over a V2 transport.
///
/// All operations take `&mut self`: one request/response cycle owns the
/// wire from flush to ready marker, so overlapping units of work cannot
/// exist.
///
/// An I/O or protocol failure mid-cycle leaves the stream at an unknown
/// position, so the engine closes itself and every later operation reports
/// the connection as closed without touching the transport.
pub struct Connection<T> {
    io: T,
    transaction: TransactionStatus,
    notifications: VecDeque<Notification>,
    warnings: Vec<String>,
    closed: bool,
}

impl<T: V2Transport> Connection<T> {
    pub fn new(io: T) -> Self {
        Self {
            io,
            transaction: TransactionStatus::default(),
            notifications: VecDeque::new(),
            warnings: Vec::new(),
            closed: false,
        }
    }

    /// Current transaction status as tracked from command completions.
    pub fn transaction(&self) -> TransactionStatus {
        self.transaction
    }

    /// Pop the oldest asynchronous notification, if any.
    pub fn pop_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    /// Drain connection-level warnings accumulated outside a sink.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the engine unusable without touching the transport.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    /// Execute one query as a unit of work, delivering results to `sink`.
    ///
    /// When the transaction is idle and `suppress_begin` is false, the
    /// query is sent with a literal `BEGIN;` prefix and the synthetic
    /// status it produces is hidden from `sink`.
    ///
    /// `max_rows` of zero means unlimited; otherwise overflow rows are
    /// consumed off the wire but not retained.
    ///
    /// Backend errors do not fail the call here. They are delivered
    /// through the sink and surfaced by
    /// [`handle_completion`][ResultSink::handle_completion], which is
    /// called exactly once, last, even when sending fails. An `Err` from
    /// this method itself means the sink contract could not be honored at
    /// all, before any I/O.
    pub async fn execute<H: ResultSink>(
        &mut self,
        query: &Query,
        params: Option<&ParameterList>,
        sink: &mut H,
        max_rows: usize,
        suppress_begin: bool,
    ) -> Result<()> {
        let default_params;
        let params = match params {
            Some(params) => params,
            None => {
                default_params = query.parameters();
                &default_params
            }
        };
        if params.len() != query.parameter_count() {
            return Err(BindError::CountMismatch {
                expected: query.parameter_count(),
                actual: params.len(),
            }
            .into());
        }
        params.check_all_set()?;

        if self.closed {
            sink.handle_error(closed_error());
            return sink.handle_completion();
        }

        let wrap = self.transaction.is_idle() && !suppress_begin;
        let prefix = wrap.then_some("BEGIN;");
        QueryMessage { prefix, query, params }.write(&mut self.io);

        if let Err(err) = self.io.flush().await {
            debug!("send failed, closing connection");
            self.close();
            sink.handle_error(err.into());
            return sink.handle_completion();
        }

        let received = if wrap {
            let mut interceptor = BeginInterceptor::new(sink);
            process_results(
                &mut self.io,
                &mut self.transaction,
                &mut self.notifications,
                query,
                &mut interceptor,
                max_rows,
            )
            .await
        } else {
            process_results(
                &mut self.io,
                &mut self.transaction,
                &mut self.notifications,
                query,
                sink,
                max_rows,
            )
            .await
        };

        if let Err(err) = received {
            debug!("receive failed, closing connection");
            self.close();
            sink.handle_error(err);
        }

        sink.handle_completion()
    }

    /// Execute several queries back-to-back, strictly in sequence.
    ///
    /// Each pair runs as its own unit of work through [`execute`], so the
    /// implicit begin applies to the first query only and a later query
    /// on a broken connection still delivers its failure. `sink` sees the
    /// deliveries of every query in order and a single completion at the
    /// very end.
    ///
    /// [`execute`]: Connection::execute
    pub async fn execute_batch<H: ResultSink>(
        &mut self,
        batch: &[(Query, ParameterList)],
        sink: &mut H,
        max_rows: usize,
        suppress_begin: bool,
    ) -> Result<()> {
        let mut inner = BatchSink { inner: &mut *sink };
        for (query, params) in batch {
            self.execute(query, Some(params), &mut inner, max_rows, suppress_begin)
                .await?;
        }
        sink.handle_completion()
    }

    /// Invoke a backend function directly by its numeric id.
    ///
    /// `Ok(None)` means the function returned void. Backend errors
    /// surface as `Err` after the whole response is drained, leaving the
    /// connection usable; I/O and protocol errors close it.
    pub async fn fastpath(
        &mut self,
        fnid: i32,
        params: &FastpathParams,
        suppress_begin: bool,
    ) -> Result<Option<Bytes>> {
        params.check_all_set()?;

        if self.closed {
            return Err(closed_error());
        }

        if self.transaction.is_idle() && !suppress_begin {
            self.begin_for_fastpath().await?;
        }

        FastpathCall { fnid, params }.write(&mut self.io);
        if let Err(err) = self.io.flush().await {
            debug!("send failed, closing connection");
            self.close();
            return Err(err.into());
        }

        let received =
            receive_fastpath_result(&mut self.io, &mut self.notifications, &mut self.warnings)
                .await;

        if let Err(err) = &received {
            if !matches!(err.kind(), ErrorKind::Database(_)) {
                debug!("receive failed, closing connection");
                self.close();
            }
        }
        received
    }

    /// Open a transaction before a fastpath call.
    ///
    /// Sent as a bare `BEGIN` unit of work whose synthetic status is
    /// verified rather than delivered anywhere.
    async fn begin_for_fastpath(&mut self) -> Result<()> {
        let begin = Query::simple("");
        let params = begin.parameters();
        QueryMessage { prefix: Some("BEGIN"), query: &begin, params: &params }
            .write(&mut self.io);

        if let Err(err) = self.io.flush().await {
            debug!("send failed, closing connection");
            self.close();
            return Err(err.into());
        }

        let mut verifier = BeginVerifier::default();
        let received = process_results(
            &mut self.io,
            &mut self.transaction,
            &mut self.notifications,
            &begin,
            &mut verifier,
            0,
        )
        .await;

        if let Err(err) = received {
            debug!("receive failed, closing connection");
            self.close();
            return Err(err);
        }

        verifier.handle_completion()
    }

    /// Incremental cursor fetch. The V2 protocol has no portal suspension,
    /// so this always fails.
    pub fn fetch<H: ResultSink>(&mut self, _sink: &mut H, _rows: u32) -> Result<()> {
        Err(Unsupported { operation: "cursor fetch" }.into())
    }
}

/// Operation that this protocol version cannot perform.
pub struct Unsupported {
    pub operation: &'static str,
}

impl std::error::Error for Unsupported { }

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not implemented in this protocol version", self.operation)
    }
}

impl fmt::Debug for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn closed_error() -> Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection has been closed").into()
}

/// Hides the synthetic status of an implicit `BEGIN;` prefix from the
/// caller's sink.
///
/// The first command status of the unit of work must be the `BEGIN`
/// confirmation. Anything else arriving first means the prefix was not
/// honored and is escalated as a delivered error.
struct BeginInterceptor<'a, H> {
    inner: &'a mut H,
    saw_begin: bool,
}

impl<'a, H> BeginInterceptor<'a, H> {
    fn new(inner: &'a mut H) -> Self {
        Self { inner, saw_begin: false }
    }

    fn escalate(&mut self, what: &str)
    where
        H: ResultSink,
    {
        self.inner.handle_error(
            BackendError {
                message: format!("expected command status BEGIN, got {what}"),
            }
            .into(),
        );
    }
}

impl<H: ResultSink> ResultSink for BeginInterceptor<'_, H> {
    fn handle_rows(&mut self, query: &Query, fields: Vec<FieldDescription>, rows: Vec<Row>) {
        if !self.saw_begin {
            // the swallow slot stays armed for the status still to come
            self.escalate("a result batch");
            return;
        }
        self.inner.handle_rows(query, fields, rows);
    }

    fn handle_command_status(&mut self, tag: &str, rows: u64, oid: u64) {
        if !self.saw_begin {
            self.saw_begin = true;
            if tag != "BEGIN" {
                self.escalate(tag);
            }
            return;
        }
        self.inner.handle_command_status(tag, rows, oid);
    }

    fn handle_warning(&mut self, message: String) {
        self.inner.handle_warning(message);
    }

    fn handle_error(&mut self, error: Error) {
        self.inner.handle_error(error);
    }

    fn handle_completion(&mut self) -> Result<()> {
        self.inner.handle_completion()
    }
}

/// Forwards everything except completion, which the batch driver calls
/// once at the very end.
struct BatchSink<'a, H> {
    inner: &'a mut H,
}

impl<H: ResultSink> ResultSink for BatchSink<'_, H> {
    fn handle_rows(&mut self, query: &Query, fields: Vec<FieldDescription>, rows: Vec<Row>) {
        self.inner.handle_rows(query, fields, rows);
    }

    fn handle_command_status(&mut self, tag: &str, rows: u64, oid: u64) {
        self.inner.handle_command_status(tag, rows, oid);
    }

    fn handle_warning(&mut self, message: String) {
        self.inner.handle_warning(message);
    }

    fn handle_error(&mut self, error: Error) {
        self.inner.handle_error(error);
    }

    fn handle_completion(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink for the bare `BEGIN` preceding a fastpath call.
///
/// There is nowhere to deliver results to, so anything other than the
/// `BEGIN` confirmation fails the call.
#[derive(Default)]
struct BeginVerifier {
    saw_begin: bool,
    errors: crate::error::ErrorChain,
}

impl ResultSink for BeginVerifier {
    fn handle_rows(&mut self, _: &Query, _: Vec<FieldDescription>, _: Vec<Row>) {
        self.errors.push(
            BackendError {
                message: "expected command status BEGIN, got a result batch".to_owned(),
            }
            .into(),
        );
    }

    fn handle_command_status(&mut self, tag: &str, _: u64, _: u64) {
        if !self.saw_begin && tag == "BEGIN" {
            self.saw_begin = true;
            return;
        }
        self.errors.push(
            BackendError {
                message: format!("expected command status BEGIN, got {tag}"),
            }
            .into(),
        );
    }

    fn handle_warning(&mut self, message: String) {
        self.errors.push(BackendError { message }.into());
    }

    fn handle_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    fn handle_completion(&mut self) -> Result<()> {
        match self.errors.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        protocol::testing::Script,
        sink::QueryResults,
        transport::testing::{MemTransport, block_on},
    };

    fn select_one() -> (Query, ParameterList) {
        let query = Query::simple("select 1");
        let params = query.parameters();
        (query, params)
    }

    #[test]
    fn implicit_begin_is_sent_once() {
        let io = Script::new()
            .command_status("BEGIN")
            .row_description(&["n"])
            .text_row(&[Some("1")])
            .command_status("SELECT")
            .ready()
            .row_description(&["n"])
            .text_row(&[Some("2")])
            .command_status("SELECT")
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        block_on(conn.execute(&query, Some(&params), &mut results, 0, false)).unwrap();
        assert_eq!(conn.transaction(), TransactionStatus::Open);
        assert_eq!(results.batches.len(), 1);
        // the synthetic BEGIN status never reached the sink
        assert!(results.tags.is_empty());

        let mut results = QueryResults::default();
        block_on(conn.execute(&query, Some(&params), &mut results, 0, false)).unwrap();
        assert_eq!(results.batches.len(), 1);

        let io = conn.into_inner();
        assert!(io.flushed[0].starts_with(b"QBEGIN;select 1\0"));
        assert!(io.flushed[1].starts_with(b"Qselect 1\0"));
    }

    #[test]
    fn suppressed_begin_sends_bare_query() {
        let io = Script::new().command_status("SELECT").ready().finish();
        let mut conn = Connection::new(io);
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        block_on(conn.execute(&query, Some(&params), &mut results, 0, true)).unwrap();
        assert_eq!(conn.transaction(), TransactionStatus::Idle);

        let io = conn.into_inner();
        assert_eq!(&io.flushed[0][..], b"Qselect 1\0");
    }

    #[test]
    fn wrong_first_status_is_escalated() {
        let io = Script::new()
            .command_status("SELECT")
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert!(err.to_string().contains("expected command status BEGIN, got SELECT"));
        // escalation is a delivered error, not a connection failure
        assert!(!conn.is_closed());
    }

    #[test]
    fn rows_before_begin_do_not_disarm_the_interceptor() {
        let io = Script::new()
            .row_description(&["n"])
            .text_row(&[Some("1")])
            .command_status("SELECT")
            .command_status("BEGIN")
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(err.to_string().contains("got a result batch"));
        // the late synthetic BEGIN status is still swallowed
        assert!(results.tags.is_empty());
        assert!(results.batches.is_empty());
        assert_eq!(conn.transaction(), TransactionStatus::Open);
    }

    #[test]
    fn mismatched_parameter_list_fails_before_any_io() {
        let mut conn = Connection::new(MemTransport::new(b""));
        let query = Query::parse("select ?");
        let params = ParameterList::new(0);

        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Bind(BindError::CountMismatch { expected: 1, actual: 0 }),
        ));
        assert!(!conn.is_closed());
        assert!(conn.into_inner().flushed.is_empty());
    }

    #[test]
    fn rows_before_begin_are_escalated() {
        let io = Script::new()
            .row_description(&["n"])
            .text_row(&[Some("1")])
            .command_status("SELECT")
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(err.to_string().contains("got a result batch"));
        assert!(results.batches.is_empty());
    }

    #[test]
    fn send_failure_closes_and_reports_one_error() {
        let mut conn = Connection::new(MemTransport::broken());
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert!(err.chained().is_empty());
        assert!(conn.is_closed());

        // later operations fail without touching the transport
        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
    }

    #[test]
    fn unset_parameter_fails_before_any_io() {
        let io = MemTransport::new(b"");
        let mut conn = Connection::new(io);
        let query = Query::parse("select ?");
        let params = query.parameters();

        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Bind(_)));
        assert!(!conn.is_closed());
        assert!(conn.into_inner().flushed.is_empty());
    }

    #[test]
    fn receive_failure_closes_the_connection() {
        // response ends before the ready marker
        let io = Script::new().command_status("BEGIN").finish();
        let mut conn = Connection::new(io);
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        let err = block_on(conn.execute(&query, Some(&params), &mut results, 0, false))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert!(conn.is_closed());
    }

    #[test]
    fn batch_runs_sequentially_and_completes_once() {
        let io = Script::new()
            .command_status("BEGIN")
            .command_status("UPDATE 1")
            .ready()
            .command_status("UPDATE 2")
            .ready()
            .finish();
        let mut conn = Connection::new(io);

        let first = Query::simple("update t set a = 1");
        let second = Query::simple("update t set a = 2");
        let batch = vec![
            (first.clone(), first.parameters()),
            (second.clone(), second.parameters()),
        ];

        let mut results = QueryResults::default();
        block_on(conn.execute_batch(&batch, &mut results, 0, false)).unwrap();

        assert_eq!(results.tags.len(), 2);
        assert_eq!(results.tags[0].rows, 1);
        assert_eq!(results.tags[1].rows, 2);
        assert_eq!(conn.transaction(), TransactionStatus::Open);

        let io = conn.into_inner();
        // only the first query carries the implicit BEGIN;
        assert_eq!(io.flushed.len(), 2);
        assert_eq!(&io.flushed[0][..], b"QBEGIN;update t set a = 1\0");
        assert_eq!(&io.flushed[1][..], b"Qupdate t set a = 2\0");
    }

    #[test]
    fn batch_with_suppressed_begin() {
        let io = Script::new()
            .command_status("UPDATE 1")
            .ready()
            .command_status("UPDATE 2")
            .ready()
            .finish();
        let mut conn = Connection::new(io);

        let first = Query::simple("update t set a = 1");
        let second = Query::simple("update t set a = 2");
        let batch = vec![
            (first.clone(), first.parameters()),
            (second.clone(), second.parameters()),
        ];

        let mut results = QueryResults::default();
        block_on(conn.execute_batch(&batch, &mut results, 0, true)).unwrap();
        assert_eq!(results.tags.len(), 2);
        assert_eq!(conn.transaction(), TransactionStatus::Idle);
    }

    #[test]
    fn fastpath_void() {
        let io = Script::new().fastpath_void().ready().finish();
        let mut conn = Connection::new(io);
        let params = FastpathParams::new(0);

        let out = block_on(conn.fastpath(42, &params, true)).unwrap();
        assert_eq!(out, None);
        assert!(!conn.is_closed());

        let io = conn.into_inner();
        let mut expect = Vec::new();
        expect.extend_from_slice(b"F\0");
        expect.extend_from_slice(&42i32.to_be_bytes());
        expect.extend_from_slice(&0i32.to_be_bytes());
        assert_eq!(&io.flushed[0][..], &expect[..]);
    }

    #[test]
    fn fastpath_opens_transaction_first() {
        let io = Script::new()
            .command_status("BEGIN")
            .ready()
            .fastpath_result(b"\x00\x00\x00\x05")
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let mut params = FastpathParams::new(1);
        params.bind_int(1, 99).unwrap();

        let out = block_on(conn.fastpath(42, &params, false)).unwrap();
        assert_eq!(out.unwrap(), &b"\x00\x00\x00\x05"[..]);
        assert_eq!(conn.transaction(), TransactionStatus::Open);

        let io = conn.into_inner();
        assert_eq!(&io.flushed[0][..], b"QBEGIN\0");
        assert_eq!(io.flushed[1][0], b'F');
    }

    #[test]
    fn fastpath_begin_verification_failure() {
        let io = Script::new()
            .command_status("SELECT")
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let params = FastpathParams::new(0);

        let err = block_on(conn.fastpath(42, &params, false)).unwrap_err();
        assert!(err.to_string().contains("expected command status BEGIN"));

        // the function call itself was never sent
        let io = conn.into_inner();
        assert_eq!(io.flushed.len(), 1);
        assert_eq!(io.flushed[0][0], b'Q');
    }

    #[test]
    fn fastpath_backend_error_leaves_connection_open() {
        let io = Script::new()
            .error("no such function")
            .fastpath_void()
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let params = FastpathParams::new(0);

        let err = block_on(conn.fastpath(42, &params, true)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert!(!conn.is_closed());
    }

    #[test]
    fn fastpath_protocol_error_closes_connection() {
        let io = Script::new().raw(b"X").finish();
        let mut conn = Connection::new(io);
        let params = FastpathParams::new(0);

        let err = block_on(conn.fastpath(42, &params, true)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        assert!(conn.is_closed());
    }

    #[test]
    fn fastpath_unset_parameter_fails_before_any_io() {
        let mut conn = Connection::new(MemTransport::new(b""));
        let params = FastpathParams::new(1);

        let err = block_on(conn.fastpath(42, &params, true)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Bind(_)));
        assert!(conn.into_inner().flushed.is_empty());
    }

    #[test]
    fn fetch_is_unsupported() {
        let mut conn = Connection::new(MemTransport::new(b""));
        let mut results = QueryResults::default();
        let err = conn.fetch(&mut results, 10).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Unsupported(_)));
        assert!(err.to_string().contains("cursor fetch"));
    }

    #[test]
    fn notifications_are_queued_across_calls() {
        let io = Script::new()
            .notify(7, "ping")
            .command_status("SELECT")
            .ready()
            .finish();
        let mut conn = Connection::new(io);
        let (query, params) = select_one();

        let mut results = QueryResults::default();
        block_on(conn.execute(&query, Some(&params), &mut results, 0, true)).unwrap();

        let notification = conn.pop_notification().unwrap();
        assert_eq!(notification.process_id, 7);
        assert_eq!(notification.payload, "ping");
        assert_eq!(conn.pop_notification(), None);
    }
}
