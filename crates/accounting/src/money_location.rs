use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashbook_core::{AccountId, DomainError, Entity, MoneyLocationId};

use crate::account::Account;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationType {
    CashDrawer,
    Safe,
    BankAccount,
    DigitalWallet,
    PettyCash,
}

impl LocationType {
    pub fn as_str(self) -> &'static str {
        match self {
            LocationType::CashDrawer => "CASH_DRAWER",
            LocationType::Safe => "SAFE",
            LocationType::BankAccount => "BANK_ACCOUNT",
            LocationType::DigitalWallet => "DIGITAL_WALLET",
            LocationType::PettyCash => "PETTY_CASH",
        }
    }
}

impl core::str::FromStr for LocationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CASH_DRAWER" => Ok(LocationType::CashDrawer),
            "SAFE" => Ok(LocationType::Safe),
            "BANK_ACCOUNT" => Ok(LocationType::BankAccount),
            "DIGITAL_WALLET" => Ok(LocationType::DigitalWallet),
            "PETTY_CASH" => Ok(LocationType::PettyCash),
            other => Err(DomainError::validation(format!("unknown location type '{other}'"))),
        }
    }
}

/// A place money physically or virtually resides, bound to exactly one account.
///
/// `current_balance` is a cache. The ledger-derived truth is `-Σ amount` over
/// posted lines carrying this location's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyLocation {
    pub id: MoneyLocationId,
    pub code: String,
    pub name: String,
    pub location_type: LocationType,
    pub requires_session: bool,
    pub account_id: AccountId,
    pub current_balance: Decimal,
    pub default_float: Decimal,
    pub max_cash_limit: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for MoneyLocation {
    type Id = MoneyLocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMoneyLocation {
    pub code: String,
    pub name: String,
    pub location_type: LocationType,
    /// Defaults to `true` for cash drawers only.
    #[serde(default)]
    pub requires_session: Option<bool>,
    pub account_code: String,
    #[serde(default)]
    pub default_float: Decimal,
    #[serde(default)]
    pub max_cash_limit: Option<Decimal>,
}

impl NewMoneyLocation {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        location_type: LocationType,
        account_code: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            location_type,
            requires_session: None,
            account_code: account_code.into(),
            default_float: Decimal::ZERO,
            max_cash_limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyLocationPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub requires_session: Option<bool>,
    #[serde(default)]
    pub default_float: Option<Decimal>,
    #[serde(default)]
    pub max_cash_limit: Option<Decimal>,
}

/// Filtered listings. Everything except `All` returns active locations only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationFilter {
    All,
    Active,
    ByType(LocationType),
    /// Drawers that need open/close cycles.
    RequiringSession,
}

impl LocationFilter {
    pub fn matches(&self, location: &MoneyLocation) -> bool {
        match self {
            LocationFilter::All => true,
            LocationFilter::Active => location.is_active,
            LocationFilter::ByType(t) => location.is_active && location.location_type == *t,
            LocationFilter::RequiringSession => location.is_active && location.requires_session,
        }
    }
}

impl core::str::FromStr for LocationFilter {
    type Err = DomainError;

    /// `all`, `active`, `drawers` or `type:<LOCATION_TYPE>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(LocationFilter::All),
            "active" => Ok(LocationFilter::Active),
            "drawers" => Ok(LocationFilter::RequiringSession),
            other => match other.strip_prefix("type:") {
                Some(t) => Ok(LocationFilter::ByType(t.parse()?)),
                None => Err(DomainError::validation(format!("unknown location filter '{other}'"))),
            },
        }
    }
}

fn non_negative(value: Decimal, field: &str) -> LedgerResult<()> {
    if value < Decimal::ZERO {
        return Err(LedgerError::validation(format!("{field} must not be negative")));
    }
    Ok(())
}

impl MoneyLocation {
    /// Build a location bound to `account`, which must be an active leaf.
    pub fn create(
        id: MoneyLocationId,
        input: NewMoneyLocation,
        account: &Account,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let code = input.code.trim().to_string();
        if code.is_empty() {
            return Err(LedgerError::validation("location code must not be empty"));
        }
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("location name must not be empty"));
        }
        account.ensure_transactable()?;
        non_negative(input.default_float, "default_float")?;
        if let Some(limit) = input.max_cash_limit {
            non_negative(limit, "max_cash_limit")?;
        }

        Ok(Self {
            id,
            code,
            name,
            location_type: input.location_type,
            requires_session: input
                .requires_session
                .unwrap_or(input.location_type == LocationType::CashDrawer),
            account_id: account.id,
            current_balance: Decimal::ZERO,
            default_float: input.default_float,
            max_cash_limit: input.max_cash_limit,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_patch(&mut self, patch: MoneyLocationPatch, now: DateTime<Utc>) -> LedgerResult<()> {
        if let Some(float) = patch.default_float {
            non_negative(float, "default_float")?;
        }
        if let Some(limit) = patch.max_cash_limit {
            non_negative(limit, "max_cash_limit")?;
        }
        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(LedgerError::validation("location name must not be empty"));
            }
            self.name = name;
        }
        if let Some(requires_session) = patch.requires_session {
            self.requires_session = requires_session;
        }
        if let Some(float) = patch.default_float {
            self.default_float = float;
        }
        if patch.max_cash_limit.is_some() {
            self.max_cash_limit = patch.max_cash_limit;
        }
        self.updated_at = now;
        Ok(())
    }

    /// `current_balance > max_cash_limit`; never true without a limit.
    pub fn is_over_cash_limit(&self) -> bool {
        self.max_cash_limit
            .is_some_and(|limit| self.current_balance > limit)
    }
}
