//! Shared fixture for service and handler tests: a small restaurant chart of
//! accounts, one cash drawer and one safe, on the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use cashbook_accounting::{AccountType, LocationType, MoneyLocation, NewAccount, NewMoneyLocation};
use cashbook_events::InMemoryEventBus;

use crate::config::LedgerConfig;
use crate::notify::LedgerEnvelope;
use crate::services::LedgerServices;
use crate::store::InMemoryLedgerStore;

pub(crate) type TestLedger = LedgerServices<Arc<InMemoryLedgerStore>, Arc<InMemoryEventBus<LedgerEnvelope>>>;

pub(crate) struct Fixture {
    pub store: Arc<InMemoryLedgerStore>,
    pub bus: Arc<InMemoryEventBus<LedgerEnvelope>>,
    pub ledger: Arc<TestLedger>,
    pub drawer: MoneyLocation,
    pub safe: MoneyLocation,
}

impl Fixture {
    /// Signed balance of the account with `code`.
    pub async fn balance(&self, code: &str) -> Decimal {
        let account = self.ledger.accounts.get_account(code).await.unwrap();
        self.ledger.journal.get_account_balance(account.id, None).await.unwrap()
    }
}

pub(crate) const CHART: &[(&str, &str, AccountType, bool, Option<&str>)] = &[
    ("1", "Assets", AccountType::Asset, true, None),
    ("1.1", "Current assets", AccountType::Asset, true, Some("1")),
    ("1.1.01", "Drawer cash", AccountType::Asset, false, Some("1.1")),
    ("1.1.02", "Safe", AccountType::Asset, false, Some("1.1")),
    ("1.1.04", "Card clearing", AccountType::Asset, false, Some("1.1")),
    ("1.1.05", "Receivables", AccountType::Asset, false, Some("1.1")),
    ("1.1.06", "Inventory", AccountType::Asset, false, Some("1.1")),
    ("2", "Liabilities", AccountType::Liability, true, None),
    ("2.1", "Current liabilities", AccountType::Liability, true, Some("2")),
    ("2.1.01", "Payables", AccountType::Liability, false, Some("2.1")),
    ("2.1.02", "Sales tax", AccountType::Liability, false, Some("2.1")),
    ("4", "Income", AccountType::Income, true, None),
    ("4.1", "Sales", AccountType::Income, true, Some("4")),
    ("4.1.01", "Revenue", AccountType::Income, false, Some("4.1")),
    ("4.1.02", "Refunds", AccountType::Income, false, Some("4.1")),
];

pub(crate) async fn fixture_with(store: Arc<InMemoryLedgerStore>, config: LedgerConfig) -> Fixture {
    let bus = Arc::new(InMemoryEventBus::new());
    let ledger = Arc::new(LedgerServices::new(store.clone(), bus.clone(), &config));

    for (code, name, kind, group, parent) in CHART {
        let input = if *group {
            NewAccount::group(*code, *name, *kind)
        } else {
            NewAccount::leaf(*code, *name, *kind)
        };
        let input = match parent {
            Some(parent) => input.under(*parent),
            None => input,
        };
        ledger.accounts.create_account(input).await.unwrap();
    }

    let drawer = ledger
        .locations
        .create(NewMoneyLocation::new("DRW-01", "Front drawer", LocationType::CashDrawer, "1.1.01"))
        .await
        .unwrap();
    let safe = ledger
        .locations
        .create(NewMoneyLocation::new("SAFE-01", "Back office safe", LocationType::Safe, "1.1.02"))
        .await
        .unwrap();

    Fixture {
        store,
        bus,
        ledger,
        drawer,
        safe,
    }
}

pub(crate) async fn fixture() -> Fixture {
    let config = LedgerConfig {
        storage_timeout: Duration::from_secs(1),
        ..LedgerConfig::default()
    };
    fixture_with(Arc::new(InMemoryLedgerStore::new()), config).await
}
