//! Protocol error
use std::fmt;

use super::backend;

/// A fatal protocol grammar violation.
///
/// Once raised, the stream can no longer be trusted and the connection
/// must be closed.
pub enum ProtocolError {
    Unexpected {
        found: u8,
        phase: &'static str,
    },
    Malformed {
        what: String,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Unexpected { found, phase } => {
                write!(
                    f,
                    "Unexpected message `{}` (0x{found:02x}) in `{phase}`",
                    backend::message_name(*found),
                )
            }
            ProtocolError::Malformed { what } => write!(f, "Malformed message: {what}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected { found, phase }
    }

    pub(crate) fn malformed(what: impl Into<String>) -> ProtocolError {
        Self::Malformed { what: what.into() }
    }
}
