//! Connection transaction status.

/// Backend transaction status, inferred from command-status tags.
///
/// Moves Idle to Open only on a `BEGIN` command status (synthetic or
/// user-issued), Open to Idle only on `COMMIT` or `ROLLBACK`. The engine
/// consults it at the start of each unit of work to decide whether to
/// inject an implicit begin; user SQL is never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// No transaction block is in progress.
    #[default]
    Idle,
    /// A transaction block is open.
    Open,
}

impl TransactionStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}
