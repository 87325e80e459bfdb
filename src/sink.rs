//! The [`ResultSink`] trait: where the engine reports results.
use crate::{
    Error, Result,
    column::FieldDescription,
    error::ErrorChain,
    query::Query,
    row::Row,
};

/// Capability set the dispatch loop delivers results to, in message
/// arrival order.
///
/// [`handle_error`][ResultSink::handle_error] may be called several times
/// in one unit of work and does not imply termination; implementations
/// accumulate errors and surface the chain from
/// [`handle_completion`][ResultSink::handle_completion], which runs
/// exactly once, after the terminal ready marker and after every other
/// delivery.
pub trait ResultSink {
    /// One completed row batch. Zero or more per unit of work.
    fn handle_rows(&mut self, query: &Query, fields: Vec<FieldDescription>, rows: Vec<Row>);

    /// One command's completion: status tag, affected-row count and
    /// generated id.
    fn handle_command_status(&mut self, tag: &str, rows: u64, oid: u64);

    /// A backend notice.
    fn handle_warning(&mut self, message: String);

    /// A non-fatal error; the stream keeps draining after this.
    fn handle_error(&mut self, error: Error);

    /// End of the unit of work.
    fn handle_completion(&mut self) -> Result<()>;
}

/// A completed row batch as collected by [`QueryResults`].
#[derive(Debug)]
pub struct RowBatch {
    pub fields: Vec<FieldDescription>,
    pub rows: Vec<Row>,
}

/// A command completion as collected by [`QueryResults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    pub tag: String,
    pub rows: u64,
    pub oid: u64,
}

/// Collecting sink for callers that want everything at the end.
#[derive(Default)]
pub struct QueryResults {
    pub batches: Vec<RowBatch>,
    pub tags: Vec<CommandTag>,
    pub warnings: Vec<String>,
    errors: ErrorChain,
}

impl ResultSink for QueryResults {
    fn handle_rows(&mut self, _: &Query, fields: Vec<FieldDescription>, rows: Vec<Row>) {
        self.batches.push(RowBatch { fields, rows });
    }

    fn handle_command_status(&mut self, tag: &str, rows: u64, oid: u64) {
        self.tags.push(CommandTag { tag: tag.to_owned(), rows, oid });
    }

    fn handle_warning(&mut self, message: String) {
        self.warnings.push(message);
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
