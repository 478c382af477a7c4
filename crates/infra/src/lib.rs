//! Infrastructure layer: ledger storage, services, config and the
//! business-event handlers that post into the journal.

pub mod accounts;
pub mod cash_sessions;
pub mod config;
pub mod handlers;
pub mod journal_engine;
pub mod money_locations;
pub mod notify;
pub mod services;
pub mod store;

#[cfg(test)]
mod testing;

mod integration_tests;

pub use accounts::AccountRegistry;
pub use cash_sessions::{CashSessionManager, PendingActivityCheck};
pub use config::{AccountMapping, ConfigError, LedgerConfig};
pub use journal_engine::JournalEngine;
pub use money_locations::{BalanceReconciliation, MoneyLocationRegistry};
pub use notify::LedgerEnvelope;
pub use services::LedgerServices;
pub use store::{FailPoint, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError, StoreResult, bounded};
