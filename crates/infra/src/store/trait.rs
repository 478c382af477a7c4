use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use cashbook_accounting::{
    Account, CashSession, EntryFilter, JournalEntry, JournalEntryDraft, JournalEntryWithLines,
    LedgerError, LocationFilter, MoneyLocation, MoneyMovement, NumberScope, SessionClosing,
    SessionCounter,
};
use cashbook_core::{AccountId, CashSessionId, JournalEntryId, MoneyLocationId};

/// Storage operation error.
///
/// These are **infrastructure errors**. Domain refusals detected inside an
/// atomic storage call (the session is not open, the location still has an
/// open session, ...) travel as `Rejected` and surface unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (duplicate code, entry number,
    /// second open session for a location).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    /// A storage-side integrity check refused the write.
    #[error("integrity check failed: {0}")]
    Invariant(String),

    #[error(transparent)]
    Rejected(LedgerError),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UniqueViolation(msg) | StoreError::Conflict(msg) => LedgerError::Conflict(msg),
            StoreError::Invariant(msg) => LedgerError::Validation(msg),
            StoreError::Rejected(err) => err,
            StoreError::Backend(msg) => LedgerError::Persistence(msg),
        }
    }
}

/// Relational ledger store.
///
/// ## Atomicity
///
/// Every method is a single all-or-nothing unit. In particular
/// `insert_entry` allocates the entry number, writes header and lines and
/// flips `is_posted` in one transaction; there is never an orphaned header to
/// clean up.
///
/// ## Exclusivity
///
/// `insert_session` relies on a storage-level uniqueness rule (one `OPEN`
/// session per location) and reports a second open as `UniqueViolation`.
///
/// ## Balances
///
/// Balances sum **posted** lines only, with exact decimal arithmetic.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// `UniqueViolation` if the code is taken.
    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    async fn update_account(&self, account: &Account) -> StoreResult<()>;

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn get_account_by_code(&self, code: &str) -> StoreResult<Option<Account>>;

    /// All accounts, ordered by code.
    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;

    async fn account_has_postings(&self, id: AccountId) -> StoreResult<bool>;

    /// Whether any account, active or not, names `id` as its parent.
    async fn account_has_children(&self, id: AccountId) -> StoreResult<bool>;

    /// Signed sum of posted line amounts; `as_of` bounds `transaction_date`
    /// (inclusive). Zero when the account has no posted activity.
    async fn account_balance(&self, id: AccountId, as_of: Option<DateTime<Utc>>) -> StoreResult<Decimal>;

    async fn insert_location(&self, location: &MoneyLocation) -> StoreResult<()>;

    async fn update_location(&self, location: &MoneyLocation) -> StoreResult<()>;

    async fn get_location(&self, id: MoneyLocationId) -> StoreResult<Option<MoneyLocation>>;

    async fn get_location_by_code(&self, code: &str) -> StoreResult<Option<MoneyLocation>>;

    /// Ordered by code.
    async fn list_locations(&self, filter: LocationFilter) -> StoreResult<Vec<MoneyLocation>>;

    /// Soft delete. Refused with `SessionStillOpen` while a session is open;
    /// the check and the update are one unit.
    async fn deactivate_location(&self, id: MoneyLocationId, now: DateTime<Utc>) -> StoreResult<MoneyLocation>;

    /// Overwrite the cached `current_balance`.
    ///
    /// This is a cache refresh, not a ledger mutation: it bypasses the journal
    /// and is not coordinated with concurrent postings. A posting that lands
    /// between computing `balance` and writing it is lost from the cache until
    /// the next refresh.
    async fn set_location_balance(
        &self,
        id: MoneyLocationId,
        balance: Decimal,
        now: DateTime<Utc>,
    ) -> StoreResult<MoneyLocation>;

    /// `-Σ amount` over posted lines carrying this location (cash in is positive).
    async fn location_ledger_balance(&self, id: MoneyLocationId) -> StoreResult<Decimal>;

    /// Allocate the next number in `scope`, persist header and lines, and mark
    /// the entry posted after re-verifying the zero-sum rule.
    async fn insert_entry(
        &self,
        draft: JournalEntryDraft,
        scope: &NumberScope,
    ) -> StoreResult<JournalEntryWithLines>;

    /// Idempotent. Re-verifies the zero-sum rule before flipping the flag.
    async fn post_entry(&self, id: JournalEntryId, now: DateTime<Utc>) -> StoreResult<JournalEntry>;

    async fn get_entry(&self, id: JournalEntryId) -> StoreResult<Option<JournalEntryWithLines>>;

    /// Newest first, capped at `filter.effective_limit()`.
    async fn list_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<JournalEntry>>;

    async fn insert_movements(&self, movements: &[MoneyMovement]) -> StoreResult<()>;

    /// Newest first.
    async fn list_movements(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<MoneyMovement>>;

    /// `UniqueViolation` when the location already has an open session;
    /// `Rejected(MoneyLocationNotFound)` when it is missing or inactive.
    async fn insert_session(&self, session: &CashSession) -> StoreResult<()>;

    async fn get_session(&self, id: CashSessionId) -> StoreResult<Option<CashSession>>;

    async fn active_session(&self, location: MoneyLocationId) -> StoreResult<Option<CashSession>>;

    /// Newest first.
    async fn list_sessions(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<CashSession>>;

    /// Add `amount` to a running total of the location's open session.
    /// `None` when no session is open.
    async fn increment_session_counter(
        &self,
        location: MoneyLocationId,
        counter: SessionCounter,
        amount: Decimal,
    ) -> StoreResult<Option<CashSession>>;

    /// Close under a row lock: load, apply `CashSession::close`, persist.
    async fn close_session(&self, id: CashSessionId, closing: SessionClosing) -> StoreResult<CashSession>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        (**self).insert_account(account).await
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        (**self).update_account(account).await
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        (**self).get_account(id).await
    }

    async fn get_account_by_code(&self, code: &str) -> StoreResult<Option<Account>> {
        (**self).get_account_by_code(code).await
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        (**self).list_accounts().await
    }

    async fn account_has_postings(&self, id: AccountId) -> StoreResult<bool> {
        (**self).account_has_postings(id).await
    }

    async fn account_has_children(&self, id: AccountId) -> StoreResult<bool> {
        (**self).account_has_children(id).await
    }

    async fn account_balance(&self, id: AccountId, as_of: Option<DateTime<Utc>>) -> StoreResult<Decimal> {
        (**self).account_balance(id, as_of).await
    }

    async fn insert_location(&self, location: &MoneyLocation) -> StoreResult<()> {
        (**self).insert_location(location).await
    }

    async fn update_location(&self, location: &MoneyLocation) -> StoreResult<()> {
        (**self).update_location(location).await
    }

    async fn get_location(&self, id: MoneyLocationId) -> StoreResult<Option<MoneyLocation>> {
        (**self).get_location(id).await
    }

    async fn get_location_by_code(&self, code: &str) -> StoreResult<Option<MoneyLocation>> {
        (**self).get_location_by_code(code).await
    }

    async fn list_locations(&self, filter: LocationFilter) -> StoreResult<Vec<MoneyLocation>> {
        (**self).list_locations(filter).await
    }

    async fn deactivate_location(&self, id: MoneyLocationId, now: DateTime<Utc>) -> StoreResult<MoneyLocation> {
        (**self).deactivate_location(id, now).await
    }

    async fn set_location_balance(
        &self,
        id: MoneyLocationId,
        balance: Decimal,
        now: DateTime<Utc>,
    ) -> StoreResult<MoneyLocation> {
        (**self).set_location_balance(id, balance, now).await
    }

    async fn location_ledger_balance(&self, id: MoneyLocationId) -> StoreResult<Decimal> {
        (**self).location_ledger_balance(id).await
    }

    async fn insert_entry(
        &self,
        draft: JournalEntryDraft,
        scope: &NumberScope,
    ) -> StoreResult<JournalEntryWithLines> {
        (**self).insert_entry(draft, scope).await
    }

    async fn post_entry(&self, id: JournalEntryId, now: DateTime<Utc>) -> StoreResult<JournalEntry> {
        (**self).post_entry(id, now).await
    }

    async fn get_entry(&self, id: JournalEntryId) -> StoreResult<Option<JournalEntryWithLines>> {
        (**self).get_entry(id).await
    }

    async fn list_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<JournalEntry>> {
        (**self).list_entries(filter).await
    }

    async fn insert_movements(&self, movements: &[MoneyMovement]) -> StoreResult<()> {
        (**self).insert_movements(movements).await
    }

    async fn list_movements(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<MoneyMovement>> {
        (**self).list_movements(location, limit).await
    }

    async fn insert_session(&self, session: &CashSession) -> StoreResult<()> {
        (**self).insert_session(session).await
    }

    async fn get_session(&self, id: CashSessionId) -> StoreResult<Option<CashSession>> {
        (**self).get_session(id).await
    }

    async fn active_session(&self, location: MoneyLocationId) -> StoreResult<Option<CashSession>> {
        (**self).active_session(location).await
    }

    async fn list_sessions(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<CashSession>> {
        (**self).list_sessions(location, limit).await
    }

    async fn increment_session_counter(
        &self,
        location: MoneyLocationId,
        counter: SessionCounter,
        amount: Decimal,
    ) -> StoreResult<Option<CashSession>> {
        (**self).increment_session_counter(location, counter, amount).await
    }

    async fn close_session(&self, id: CashSessionId, closing: SessionClosing) -> StoreResult<CashSession> {
        (**self).close_session(id, closing).await
    }
}
