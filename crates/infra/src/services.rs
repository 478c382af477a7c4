//! Service wiring.
//!
//! The four ledger services are plain structs built once at process start
//! from one store, one notification bus and one `LedgerConfig`, then passed by
//! reference to handlers and HTTP routes.

use cashbook_events::EventBus;

use crate::accounts::AccountRegistry;
use crate::cash_sessions::CashSessionManager;
use crate::config::{AccountMapping, LedgerConfig};
use crate::journal_engine::JournalEngine;
use crate::money_locations::MoneyLocationRegistry;
use crate::notify::LedgerEnvelope;
use crate::store::LedgerStore;

#[derive(Debug, Clone)]
pub struct LedgerServices<S, B> {
    pub accounts: AccountRegistry<S>,
    pub locations: MoneyLocationRegistry<S>,
    pub journal: JournalEngine<S, B>,
    pub sessions: CashSessionManager<S, B>,
    /// Well-known account codes for the domain event handlers.
    pub mapping: AccountMapping,
}

impl<S, B> LedgerServices<S, B>
where
    S: LedgerStore + Clone,
    B: EventBus<LedgerEnvelope> + Clone,
{
    pub fn new(store: S, bus: B, config: &LedgerConfig) -> Self {
        Self {
            accounts: AccountRegistry::new(store.clone(), config.storage_timeout),
            locations: MoneyLocationRegistry::new(store.clone(), config.storage_timeout),
            journal: JournalEngine::new(store.clone(), bus.clone(), config),
            sessions: CashSessionManager::new(store, bus, config),
            mapping: config.accounts.clone(),
        }
    }
}
