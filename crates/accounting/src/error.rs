//! Structured error kinds returned by every ledger operation.

use rust_decimal::Decimal;
use thiserror::Error;

use cashbook_core::{CashSessionId, DomainError, JournalEntryId, MoneyLocationId};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger error.
///
/// Validation kinds are raised before the first write of an operation.
/// `Persistence` and `Timeout` come from the storage boundary; any partial
/// state of the failed call has already been rolled back when they surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("journal entry is not balanced (lines sum to {sum})")]
    ImbalancedEntry { sum: Decimal },

    #[error("journal entry needs at least 2 lines, got {found}")]
    InsufficientLines { found: usize },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("account {0} is a group account and cannot take transactions")]
    GroupAccount(String),

    #[error("money location not found: {0}")]
    MoneyLocationNotFound(String),

    #[error("journal entry not found: {0}")]
    EntryNotFound(JournalEntryId),

    #[error("cash session not found: {0}")]
    SessionNotFound(CashSessionId),

    #[error("a cash session is already open for location {0}")]
    SessionAlreadyOpen(MoneyLocationId),

    #[error("cash session {0} is not open")]
    SessionNotOpen(CashSessionId),

    #[error("location {0} still has an open cash session")]
    SessionStillOpen(MoneyLocationId),

    #[error("session has pending activity: {}", .0.join(", "))]
    PendingActivity(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Every number of the scope has been handed out.
    #[error("entry numbers exhausted for {prefix}-{year}")]
    SequenceExhausted { prefix: String, year: i32 },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("storage call timed out: {0}")]
    Timeout(&'static str),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Raised before any write; never retried automatically.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::ImbalancedEntry { .. }
                | LedgerError::InsufficientLines { .. }
                | LedgerError::AccountNotFound(_)
                | LedgerError::GroupAccount(_)
                | LedgerError::MoneyLocationNotFound(_)
                | LedgerError::SessionAlreadyOpen(_)
                | LedgerError::SessionNotOpen(_)
                | LedgerError::SessionStillOpen(_)
                | LedgerError::PendingActivity(_)
                | LedgerError::Validation(_)
        )
    }

    /// Transient failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Persistence(_) | LedgerError::Timeout(_))
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
        }
    }
}
