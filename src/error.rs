//! `postv2` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    connection::Unsupported,
    postgres::{BackendError, ProtocolError},
    query::BindError,
};

/// A specialized [`Result`] type for `postv2` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postv2` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
    chained: Vec<Error>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Append a later error to this one, preserving arrival order.
    pub fn chain(&mut self, next: Error) {
        self.chained.push(next);
    }

    /// Errors chained after this one, in arrival order.
    pub fn chained(&self) -> &[Error] {
        &self.chained
    }
}

/// All possible error kind from `postv2` library.
pub enum ErrorKind {
    /// Unset or out-of-range parameter slot, caught before any I/O.
    Bind(BindError),
    /// Unrecognized or malformed backend message; fatal to the connection.
    Protocol(ProtocolError),
    /// Transport failure; the connection is closed immediately.
    Io(io::Error),
    /// Business-logic error reported by the backend.
    Database(BackendError),
    /// Operation not available in this protocol version.
    Unsupported(Unsupported),
    Utf8(Utf8Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body, chained: Vec::new() }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<BindError>e => ErrorKind::Bind(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<BackendError>e => ErrorKind::Database(e));
from!(<Unsupported>e => ErrorKind::Unsupported(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        for cause in &self.chained {
            write!(f, "\ncaused by: {}", cause.kind)?;
        }

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Unsupported(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Ordered accumulator for errors encountered while draining a response
/// stream.
///
/// The first error is retained as the head, later ones are chained onto it
/// in arrival order. Nothing is surfaced until the stream reaches its ready
/// marker, so a late error never aborts mid-stream consumption.
#[derive(Default)]
pub struct ErrorChain {
    head: Option<Error>,
}

impl ErrorChain {
    pub fn push(&mut self, error: Error) {
        match &mut self.head {
            Some(head) => head.chain(error),
            None => self.head = Some(error),
        }
    }

    pub fn take(&mut self) -> Option<Error> {
        self.head.take()
    }

    /// Materialize into a single composite result.
    pub fn finish(mut self) -> Result<()> {
        match self.head.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
