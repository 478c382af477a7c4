//! Money Location Registry.

use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use cashbook_accounting::{
    Account, LedgerError, LedgerResult, LocationFilter, LocationType, MoneyLocation,
    MoneyLocationPatch, NewMoneyLocation,
};
use cashbook_core::MoneyLocationId;

use crate::store::{LedgerStore, bounded};

/// Result of a cache refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReconciliation {
    pub location: MoneyLocation,
    pub previous_balance: Decimal,
    pub ledger_balance: Decimal,
}

impl BalanceReconciliation {
    pub fn drift(&self) -> Decimal {
        self.ledger_balance - self.previous_balance
    }
}

#[derive(Debug, Clone)]
pub struct MoneyLocationRegistry<S> {
    store: S,
    timeout: Duration,
}

impl<S: LedgerStore> MoneyLocationRegistry<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Bind a new location to an active leaf account.
    #[instrument(skip(self, input), fields(code = %input.code), err)]
    pub async fn create(&self, input: NewMoneyLocation) -> LedgerResult<MoneyLocation> {
        let account = bounded(
            self.timeout,
            "get_account_by_code",
            self.store.get_account_by_code(&input.account_code),
        )
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(input.account_code.clone()))?;

        let location = MoneyLocation::create(MoneyLocationId::new(), input, &account, Utc::now())?;
        bounded(self.timeout, "insert_location", self.store.insert_location(&location)).await?;
        info!(location_id = %location.id, code = %location.code, "money location created");
        Ok(location)
    }

    pub async fn update(&self, id: MoneyLocationId, patch: MoneyLocationPatch) -> LedgerResult<MoneyLocation> {
        let mut location = self.get(id).await?;
        location.apply_patch(patch, Utc::now())?;
        bounded(self.timeout, "update_location", self.store.update_location(&location)).await?;
        Ok(location)
    }

    /// Soft delete. Refused with `SessionStillOpen` while a session is open.
    #[instrument(skip(self), fields(location_id = %id), err)]
    pub async fn deactivate(&self, id: MoneyLocationId) -> LedgerResult<MoneyLocation> {
        let location = bounded(
            self.timeout,
            "deactivate_location",
            self.store.deactivate_location(id, Utc::now()),
        )
        .await?;
        info!(code = %location.code, "money location deactivated");
        Ok(location)
    }

    pub async fn get(&self, id: MoneyLocationId) -> LedgerResult<MoneyLocation> {
        bounded(self.timeout, "get_location", self.store.get_location(id))
            .await?
            .ok_or_else(|| LedgerError::MoneyLocationNotFound(id.to_string()))
    }

    pub async fn get_by_code(&self, code: &str) -> LedgerResult<MoneyLocation> {
        bounded(self.timeout, "get_location_by_code", self.store.get_location_by_code(code))
            .await?
            .ok_or_else(|| LedgerError::MoneyLocationNotFound(code.to_string()))
    }

    pub async fn list(&self, filter: LocationFilter) -> LedgerResult<Vec<MoneyLocation>> {
        bounded(self.timeout, "list_locations", self.store.list_locations(filter)).await
    }

    pub async fn list_active(&self) -> LedgerResult<Vec<MoneyLocation>> {
        self.list(LocationFilter::Active).await
    }

    pub async fn list_by_type(&self, location_type: LocationType) -> LedgerResult<Vec<MoneyLocation>> {
        self.list(LocationFilter::ByType(location_type)).await
    }

    pub async fn list_requiring_session(&self) -> LedgerResult<Vec<MoneyLocation>> {
        self.list(LocationFilter::RequiringSession).await
    }

    /// The ledger account the location posts to.
    pub async fn bound_account(&self, id: MoneyLocationId) -> LedgerResult<Account> {
        let location = self.get(id).await?;
        bounded(self.timeout, "get_account", self.store.get_account(location.account_id))
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(location.account_id.to_string()))
    }

    /// Overwrite the cached `current_balance`.
    ///
    /// Cache refresh only: the journal is not touched and concurrent postings
    /// are not coordinated with. Prefer [`Self::reconcile_balance`].
    #[instrument(skip(self), fields(location_id = %id, balance = %balance), err)]
    pub async fn update_balance(&self, id: MoneyLocationId, balance: Decimal) -> LedgerResult<MoneyLocation> {
        bounded(
            self.timeout,
            "set_location_balance",
            self.store.set_location_balance(id, balance, Utc::now()),
        )
        .await
    }

    /// Recompute the balance from posted lines and refresh the cache with it.
    #[instrument(skip(self), fields(location_id = %id), err)]
    pub async fn reconcile_balance(&self, id: MoneyLocationId) -> LedgerResult<BalanceReconciliation> {
        let before = self.get(id).await?;
        let ledger_balance = bounded(
            self.timeout,
            "location_ledger_balance",
            self.store.location_ledger_balance(id),
        )
        .await?;

        let location = self.update_balance(id, ledger_balance).await?;
        let reconciliation = BalanceReconciliation {
            location,
            previous_balance: before.current_balance,
            ledger_balance,
        };
        if !reconciliation.drift().is_zero() {
            warn!(
                code = %reconciliation.location.code,
                previous = %reconciliation.previous_balance,
                ledger = %ledger_balance,
                "cached location balance drifted from the ledger"
            );
        }
        if reconciliation.location.is_over_cash_limit() {
            warn!(code = %reconciliation.location.code, "location holds more than its cash limit");
        }
        Ok(reconciliation)
    }
}
