//! Accounting module: chart of accounts, money locations, double-entry journal
//! and cash-drawer sessions.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. Storage and
//! orchestration live in `cashbook-infra`.

pub mod account;
pub mod cash_session;
pub mod error;
pub mod events;
pub mod journal;
pub mod money_location;

pub use account::{
    Account, AccountCode, AccountPatch, AccountTreeNode, AccountUsage, AccountType, BalanceSide, NewAccount,
    build_tree,
};
pub use cash_session::{CashSession, SessionClosing, SessionCounter, SessionStatus};
pub use error::{LedgerError, LedgerResult};
pub use events::{CashSessionClosed, CashSessionOpened, JournalEntryCreated, LedgerEvent};
pub use journal::{
    EntryFilter, EntryNumber, EntryType, JournalEntry, JournalEntryDraft, JournalEntryWithLines,
    JournalLine, MAX_ENTRY_SEQUENCE, MoneyMovement, MovementType, NewJournalEntry, NewJournalLine,
    NumberScope, newest_first, sum_amounts, validate_lines,
};
pub use money_location::{
    LocationFilter, LocationType, MoneyLocation, MoneyLocationPatch, NewMoneyLocation,
};
