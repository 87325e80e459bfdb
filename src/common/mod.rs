//! Supporting utilities.

/// Log when the `log` feature is enabled.
macro_rules! debug {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")] log::debug!($($tt)*)
    };
}

/// Trace when the `log-verbose` feature is enabled.
macro_rules! trace {
    ($($tt:tt)*) => {
        #[cfg(feature = "log-verbose")] log::trace!($($tt)*)
    };
}

pub(crate) use debug;
pub(crate) use trace;
