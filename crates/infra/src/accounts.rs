//! Account Registry: chart-of-accounts reads and administrative edits.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use cashbook_accounting::{
    Account, AccountPatch, AccountTreeNode, AccountUsage, LedgerError, LedgerResult, NewAccount, build_tree,
};
use cashbook_core::AccountId;

use crate::store::{LedgerStore, bounded};

#[derive(Debug, Clone)]
pub struct AccountRegistry<S> {
    store: S,
    timeout: Duration,
}

impl<S: LedgerStore> AccountRegistry<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Look up by code. Inactive accounts are returned too; posting against
    /// them is refused by the journal engine.
    pub async fn get_account(&self, code: &str) -> LedgerResult<Account> {
        bounded(self.timeout, "get_account_by_code", self.store.get_account_by_code(code))
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    pub async fn get_account_by_id(&self, id: AccountId) -> LedgerResult<Account> {
        bounded(self.timeout, "get_account", self.store.get_account(id))
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    /// Flat list ordered by code.
    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        bounded(self.timeout, "list_accounts", self.store.list_accounts()).await
    }

    pub async fn account_tree(&self) -> LedgerResult<Vec<AccountTreeNode>> {
        let accounts = self.list_accounts().await?;
        Ok(build_tree(&accounts))
    }

    #[instrument(skip(self, input), fields(code = %input.code), err)]
    pub async fn create_account(&self, input: NewAccount) -> LedgerResult<Account> {
        let parent = match input.parent_code.as_deref() {
            Some(code) => Some(self.get_account(code).await?),
            None => None,
        };
        let account = Account::create(AccountId::new(), input, parent.as_ref(), Utc::now())?;

        bounded(self.timeout, "insert_account", self.store.insert_account(&account)).await?;
        info!(account_id = %account.id, code = %account.code, "account created");
        Ok(account)
    }

    #[instrument(skip(self, patch), fields(account_id = %id), err)]
    pub async fn update_account(&self, id: AccountId, patch: AccountPatch) -> LedgerResult<Account> {
        let mut account = self.get_account_by_id(id).await?;
        let mut usage = AccountUsage::default();
        match patch.is_group {
            Some(true) if !account.is_group => {
                usage.has_postings =
                    bounded(self.timeout, "account_has_postings", self.store.account_has_postings(id)).await?;
            }
            Some(false) if account.is_group => {
                usage.has_children =
                    bounded(self.timeout, "account_has_children", self.store.account_has_children(id)).await?;
            }
            _ => {}
        }
        account.apply_patch(patch, usage, Utc::now())?;

        bounded(self.timeout, "update_account", self.store.update_account(&account)).await?;
        Ok(account)
    }

    /// Soft delete. Posted history keeps referencing the account.
    #[instrument(skip(self), fields(account_id = %id), err)]
    pub async fn deactivate_account(&self, id: AccountId) -> LedgerResult<Account> {
        let mut account = self.get_account_by_id(id).await?;
        if !account.is_active {
            return Ok(account);
        }
        account.is_active = false;
        account.updated_at = Utc::now();

        bounded(self.timeout, "update_account", self.store.update_account(&account)).await?;
        info!(code = %account.code, "account deactivated");
        Ok(account)
    }
}
