//! Configuration loading and representation.
//!
//! Built once at process start and handed to the services by value. Nothing
//! here is global.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{Datelike, Utc};
use thiserror::Error;

use cashbook_accounting::{LedgerResult, NumberScope};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Well-known account codes used by the domain event handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMapping {
    pub cash: String,
    pub card_clearing: String,
    pub receivables: String,
    pub revenue: String,
    pub tax: String,
    pub inventory: String,
    pub payables: String,
    pub refunds: String,
}

impl Default for AccountMapping {
    fn default() -> Self {
        Self {
            cash: "1.1.01".to_string(),
            card_clearing: "1.1.04".to_string(),
            receivables: "1.1.05".to_string(),
            revenue: "4.1.01".to_string(),
            tax: "2.1.02".to_string(),
            inventory: "1.1.06".to_string(),
            payables: "2.1.01".to_string(),
            refunds: "4.1.02".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Journal number prefix (`JE` in `JE-2024-000001`).
    pub entry_prefix: String,
    /// Bound applied to every storage call.
    pub storage_timeout: Duration,
    /// How many times `create_entry` retries after an entry-number conflict.
    pub entry_number_retries: u32,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub accounts: AccountMapping,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            entry_prefix: "JE".to_string(),
            storage_timeout: Duration::from_millis(5_000),
            entry_number_retries: 3,
            database_url: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            accounts: AccountMapping::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(prefix) = get("CASHBOOK_ENTRY_PREFIX") {
            NumberScope::new(prefix.clone(), 0)
                .map_err(|e| ConfigError::invalid("CASHBOOK_ENTRY_PREFIX", &prefix, e))?;
            config.entry_prefix = prefix;
        }
        if let Some(raw) = get("CASHBOOK_STORAGE_TIMEOUT_MS") {
            let millis: u64 = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("CASHBOOK_STORAGE_TIMEOUT_MS", &raw, e))?;
            if millis == 0 {
                return Err(ConfigError::invalid(
                    "CASHBOOK_STORAGE_TIMEOUT_MS",
                    &raw,
                    "must be greater than zero",
                ));
            }
            config.storage_timeout = Duration::from_millis(millis);
        }
        if let Some(raw) = get("CASHBOOK_ENTRY_NUMBER_RETRIES") {
            config.entry_number_retries = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("CASHBOOK_ENTRY_NUMBER_RETRIES", &raw, e))?;
        }
        config.database_url = get("DATABASE_URL");
        if let Some(raw) = get("CASHBOOK_BIND_ADDR") {
            config.bind_addr = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("CASHBOOK_BIND_ADDR", &raw, e))?;
        }

        let accounts = &mut config.accounts;
        for (key, slot) in [
            ("CASHBOOK_ACCOUNT_CASH", &mut accounts.cash),
            ("CASHBOOK_ACCOUNT_CARD_CLEARING", &mut accounts.card_clearing),
            ("CASHBOOK_ACCOUNT_RECEIVABLES", &mut accounts.receivables),
            ("CASHBOOK_ACCOUNT_REVENUE", &mut accounts.revenue),
            ("CASHBOOK_ACCOUNT_TAX", &mut accounts.tax),
            ("CASHBOOK_ACCOUNT_INVENTORY", &mut accounts.inventory),
            ("CASHBOOK_ACCOUNT_PAYABLES", &mut accounts.payables),
            ("CASHBOOK_ACCOUNT_REFUNDS", &mut accounts.refunds),
        ] {
            if let Some(code) = get(key) {
                *slot = code.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Numbering scope for entries created in the current calendar year.
    pub fn current_scope(&self) -> LedgerResult<NumberScope> {
        NumberScope::new(self.entry_prefix.clone(), Utc::now().year())
    }
}
