use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashbook_core::{AccountId, DomainError, Entity, ValueObject};

use crate::error::{LedgerError, LedgerResult};

/// High-level account type (determines the default normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    pub fn normal_side(self) -> BalanceSide {
        match self {
            AccountType::Asset | AccountType::Expense => BalanceSide::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Income => BalanceSide::Credit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Income => "INCOME",
            AccountType::Expense => "EXPENSE",
        }
    }
}

impl core::str::FromStr for AccountType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "INCOME" => Ok(AccountType::Income),
            "EXPENSE" => Ok(AccountType::Expense),
            other => Err(DomainError::validation(format!("unknown account type '{other}'"))),
        }
    }
}

/// Side on which an account's balance normally grows.
///
/// Line amounts are signed: negative = debit, positive = credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceSide {
    Debit,
    Credit,
}

impl BalanceSide {
    /// Present a signed ledger sum on this side (positive = normal balance).
    pub fn present(self, signed: Decimal) -> Decimal {
        match self {
            BalanceSide::Debit => -signed,
            BalanceSide::Credit => signed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BalanceSide::Debit => "DEBIT",
            BalanceSide::Credit => "CREDIT",
        }
    }
}

impl core::str::FromStr for BalanceSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBIT" => Ok(BalanceSide::Debit),
            "CREDIT" => Ok(BalanceSide::Credit),
            other => Err(DomainError::validation(format!("unknown balance side '{other}'"))),
        }
    }
}

/// Hierarchical account code, e.g. `"1.1.01"`.
///
/// Dot-separated, non-empty ASCII alphanumeric segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountCode(String);

impl ValueObject for AccountCode {}

impl AccountCode {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(DomainError::validation("account code must not be empty"));
        }
        let valid = code
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric()));
        if !valid {
            return Err(DomainError::validation(format!(
                "account code '{code}' must be dot-separated alphanumeric segments"
            )));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of segments (`"1.1.01"` has depth 3).
    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }
}

impl core::fmt::Display for AccountCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountCode> for String {
    fn from(value: AccountCode) -> Self {
        value.0
    }
}

/// A node in the chart of accounts.
///
/// Invariant: `is_group` implies `!allow_transactions`. Accounts are never
/// deleted once referenced; they are deactivated instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub code: AccountCode,
    pub name: String,
    pub account_type: AccountType,
    pub normal_side: BalanceSide,
    pub is_group: bool,
    pub allow_transactions: bool,
    pub parent_id: Option<AccountId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    /// Defaults to `account_type.normal_side()`.
    #[serde(default)]
    pub normal_side: Option<BalanceSide>,
    #[serde(default)]
    pub is_group: bool,
    /// Defaults to `!is_group`.
    #[serde(default)]
    pub allow_transactions: Option<bool>,
    #[serde(default)]
    pub parent_code: Option<String>,
}

impl NewAccount {
    pub fn leaf(code: impl Into<String>, name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            account_type,
            normal_side: None,
            is_group: false,
            allow_transactions: None,
            parent_code: None,
        }
    }

    pub fn group(code: impl Into<String>, name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            is_group: true,
            ..Self::leaf(code, name, account_type)
        }
    }

    pub fn under(mut self, parent_code: impl Into<String>) -> Self {
        self.parent_code = Some(parent_code.into());
        self
    }
}

/// Administrative edit of an existing account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: Option<bool>,
    #[serde(default)]
    pub allow_transactions: Option<bool>,
}

/// Storage facts an [`AccountPatch`] is checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountUsage {
    /// Some posted line references the account.
    pub has_postings: bool,
    /// Some account names this one as its parent.
    pub has_children: bool,
}

impl Account {
    /// Build an account from validated input. `parent` must be the resolved
    /// account for `input.parent_code` (if any).
    pub fn create(
        id: AccountId,
        input: NewAccount,
        parent: Option<&Account>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let code = AccountCode::parse(&input.code)?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("account name must not be empty"));
        }

        let allow_transactions = input.allow_transactions.unwrap_or(!input.is_group);
        if input.is_group && allow_transactions {
            return Err(LedgerError::validation(format!(
                "group account {code} cannot allow transactions"
            )));
        }

        if let Some(parent) = parent {
            if !parent.is_group {
                return Err(LedgerError::validation(format!(
                    "parent account {} is not a group account",
                    parent.code
                )));
            }
            if !parent.is_active {
                return Err(LedgerError::AccountNotFound(parent.code.to_string()));
            }
        }

        Ok(Self {
            id,
            code,
            name,
            account_type: input.account_type,
            normal_side: input
                .normal_side
                .unwrap_or_else(|| input.account_type.normal_side()),
            is_group: input.is_group,
            allow_transactions,
            parent_id: parent.map(|p| p.id),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply an administrative edit. `usage` reports what already hangs off
    /// this account in storage.
    pub fn apply_patch(
        &mut self,
        patch: AccountPatch,
        usage: AccountUsage,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(LedgerError::validation("account name must not be empty"));
            }
            next.name = name;
        }
        if let Some(is_group) = patch.is_group {
            if is_group && !self.is_group && usage.has_postings {
                return Err(LedgerError::validation(format!(
                    "account {} has posted lines and cannot become a group",
                    self.code
                )));
            }
            if !is_group && self.is_group && usage.has_children {
                return Err(LedgerError::validation(format!(
                    "account {} has child accounts and must stay a group",
                    self.code
                )));
            }
            next.is_group = is_group;
            if is_group {
                next.allow_transactions = false;
            }
        }
        if let Some(allow) = patch.allow_transactions {
            next.allow_transactions = allow;
        }
        if next.is_group && next.allow_transactions {
            return Err(LedgerError::validation(format!(
                "group account {} cannot allow transactions",
                self.code
            )));
        }
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    /// Only active leaf accounts may appear on journal lines.
    pub fn ensure_transactable(&self) -> LedgerResult<()> {
        if !self.is_active {
            return Err(LedgerError::AccountNotFound(self.code.to_string()));
        }
        if self.is_group || !self.allow_transactions {
            return Err(LedgerError::GroupAccount(self.code.to_string()));
        }
        Ok(())
    }

    /// Signed ledger balance presented on the account's normal side.
    pub fn natural_balance(&self, signed: Decimal) -> Decimal {
        self.normal_side.present(signed)
    }
}

/// One node of the chart-of-accounts forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountTreeNode {
    pub account: Account,
    /// 0 for roots.
    pub level: usize,
    /// The account's parent reference could not be resolved, so it was
    /// promoted to a root.
    pub orphaned: bool,
    pub children: Vec<AccountTreeNode>,
}

impl AccountTreeNode {
    /// Pre-order walk as `(level, account)` pairs.
    pub fn flatten(&self) -> Vec<(usize, &Account)> {
        let mut out = vec![(self.level, &self.account)];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }

    /// Number of accounts in this subtree, including the node itself.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(AccountTreeNode::node_count).sum::<usize>()
    }
}

/// Build the chart-of-accounts forest from a flat list.
///
/// Roots and siblings are ordered by code. Accounts whose parent is missing
/// from `accounts` (or that reference themselves) become roots with
/// `orphaned = true`. Accounts caught in a parent cycle are unreachable from any
/// root; they are promoted to orphaned roots as well, lowest code first, so no
/// account is ever dropped.
pub fn build_tree(accounts: &[Account]) -> Vec<AccountTreeNode> {
    let index: HashMap<AccountId, usize> = accounts
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id, i))
        .collect();

    let mut children: HashMap<AccountId, Vec<usize>> = HashMap::new();
    let mut roots: Vec<(usize, bool)> = Vec::new();

    for (i, account) in accounts.iter().enumerate() {
        match account.parent_id {
            None => roots.push((i, false)),
            Some(parent) if parent != account.id && index.contains_key(&parent) => {
                children.entry(parent).or_default().push(i);
            }
            Some(_) => roots.push((i, true)),
        }
    }

    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| accounts[*a].code.cmp(&accounts[*b].code));
    }
    roots.sort_by(|a, b| accounts[a.0].code.cmp(&accounts[b.0].code));

    let mut visited = vec![false; accounts.len()];
    let mut forest = Vec::with_capacity(roots.len());
    for (i, orphaned) in roots {
        if let Some(node) = build_node(i, 0, orphaned, accounts, &children, &mut visited) {
            forest.push(node);
        }
    }

    // Parent cycles: nothing above reached these.
    let mut leftovers: Vec<usize> = (0..accounts.len()).filter(|i| !visited[*i]).collect();
    leftovers.sort_by(|a, b| accounts[*a].code.cmp(&accounts[*b].code));
    for i in leftovers {
        if let Some(node) = build_node(i, 0, true, accounts, &children, &mut visited) {
            forest.push(node);
        }
    }

    forest
}

fn build_node(
    i: usize,
    level: usize,
    orphaned: bool,
    accounts: &[Account],
    children: &HashMap<AccountId, Vec<usize>>,
    visited: &mut [bool],
) -> Option<AccountTreeNode> {
    if visited[i] {
        return None;
    }
    visited[i] = true;

    let account = &accounts[i];
    let kids = children
        .get(&account.id)
        .map(|idxs| {
            idxs.iter()
                .filter_map(|c| build_node(*c, level + 1, false, accounts, children, visited))
                .collect()
        })
        .unwrap_or_default();

    Some(AccountTreeNode {
        account: account.clone(),
        level,
        orphaned,
        children: kids,
    })
}
