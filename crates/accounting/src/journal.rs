//! Double-entry journal: entries, lines, numbering, validation and the
//! money-movement audit records derived from posted lines.
//!
//! Sign convention: negative amount = debit, positive amount = credit. An entry
//! is postable only when its line amounts sum to exactly zero.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashbook_core::{
    AccountId, CashSessionId, DomainError, Entity, JournalEntryId, JournalLineId, MoneyLocationId,
    MoneyMovementId, UserId, ValueObject,
};

use crate::account::{Account, AccountCode};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Sale,
    Purchase,
    Payment,
    Refund,
    CashDrop,
    Adjustment,
    Opening,
    Transfer,
    Expense,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Sale => "SALE",
            EntryType::Purchase => "PURCHASE",
            EntryType::Payment => "PAYMENT",
            EntryType::Refund => "REFUND",
            EntryType::CashDrop => "CASH_DROP",
            EntryType::Adjustment => "ADJUSTMENT",
            EntryType::Opening => "OPENING",
            EntryType::Transfer => "TRANSFER",
            EntryType::Expense => "EXPENSE",
        }
    }
}

impl core::str::FromStr for EntryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SALE" => Ok(EntryType::Sale),
            "PURCHASE" => Ok(EntryType::Purchase),
            "PAYMENT" => Ok(EntryType::Payment),
            "REFUND" => Ok(EntryType::Refund),
            "CASH_DROP" => Ok(EntryType::CashDrop),
            "ADJUSTMENT" => Ok(EntryType::Adjustment),
            "OPENING" => Ok(EntryType::Opening),
            "TRANSFER" => Ok(EntryType::Transfer),
            "EXPENSE" => Ok(EntryType::Expense),
            other => Err(DomainError::validation(format!("unknown entry type '{other}'"))),
        }
    }
}

/// Highest sequence representable in the six-digit `NNNNNN` suffix.
pub const MAX_ENTRY_SEQUENCE: u32 = 999_999;

/// Counter scope for entry numbers: one sequence per prefix and calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumberScope {
    pub prefix: String,
    pub year: i32,
}

impl NumberScope {
    pub fn new(prefix: impl Into<String>, year: i32) -> LedgerResult<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LedgerError::validation(format!(
                "entry number prefix '{prefix}' must be non-empty and alphanumeric"
            )));
        }
        Ok(Self { prefix, year })
    }

    pub fn exhausted(&self) -> LedgerError {
        LedgerError::SequenceExhausted {
            prefix: self.prefix.clone(),
            year: self.year,
        }
    }

    pub fn number(&self, seq: u32) -> LedgerResult<EntryNumber> {
        if seq > MAX_ENTRY_SEQUENCE {
            return Err(self.exhausted());
        }
        if seq == 0 {
            return Err(LedgerError::validation("entry sequence starts at 1"));
        }
        Ok(EntryNumber {
            prefix: self.prefix.clone(),
            year: self.year,
            seq,
        })
    }
}

/// `PREFIX-YEAR-NNNNNN`, e.g. `JE-2024-000042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryNumber {
    prefix: String,
    year: i32,
    seq: u32,
}

impl ValueObject for EntryNumber {}

impl EntryNumber {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn scope(&self) -> NumberScope {
        NumberScope {
            prefix: self.prefix.clone(),
            year: self.year,
        }
    }
}

impl core::fmt::Display for EntryNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}-{:06}", self.prefix, self.year, self.seq)
    }
}

impl core::str::FromStr for EntryNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("malformed entry number '{s}'"));
        let mut parts = s.rsplitn(3, '-');
        let seq = parts.next().ok_or_else(invalid)?;
        let year = parts.next().ok_or_else(invalid)?;
        let prefix = parts.next().ok_or_else(invalid)?;

        if seq.len() != 6 || !seq.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let seq: u32 = seq.parse().map_err(|_| invalid())?;
        let year: i32 = year.parse().map_err(|_| invalid())?;

        NumberScope::new(prefix, year)
            .and_then(|scope| scope.number(seq))
            .map_err(|_| invalid())
    }
}

impl TryFrom<String> for EntryNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryNumber> for String {
    fn from(value: EntryNumber) -> Self {
        value.to_string()
    }
}

/// One requested leg of a new entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalLine {
    pub account_code: String,
    /// Signed: negative = debit, positive = credit.
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub money_location_id: Option<MoneyLocationId>,
}

impl NewJournalLine {
    pub fn new(account_code: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_code: account_code.into(),
            amount,
            description: None,
            money_location_id: None,
        }
    }

    /// Debit `amount` (given as a positive value) to `account_code`.
    pub fn debit(account_code: impl Into<String>, amount: Decimal) -> Self {
        Self::new(account_code, -amount)
    }

    /// Credit `amount` (given as a positive value) to `account_code`.
    pub fn credit(account_code: impl Into<String>, amount: Decimal) -> Self {
        Self::new(account_code, amount)
    }

    pub fn at_location(mut self, location: MoneyLocationId) -> Self {
        self.money_location_id = Some(location);
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Input for `createEntry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub entry_type: EntryType,
    /// Defaults to the time of creation.
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub reference_type: Option<String>,
    #[serde(default)]
    pub cash_session_id: Option<CashSessionId>,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<NewJournalLine>,
}

impl NewJournalEntry {
    pub fn new(entry_type: EntryType) -> Self {
        Self {
            entry_type,
            transaction_date: None,
            reference_id: None,
            reference_type: None,
            cash_session_id: None,
            notes: None,
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, line: NewJournalLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn dated(mut self, at: DateTime<Utc>) -> Self {
        self.transaction_date = Some(at);
        self
    }

    pub fn reference(mut self, reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn in_session(mut self, session: CashSessionId) -> Self {
        self.cash_session_id = Some(session);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Line count and zero-sum checks; no lookups.
    pub fn validate(&self) -> LedgerResult<()> {
        validate_lines(self.lines.iter().map(|l| l.amount))
    }
}

/// Exact decimal sum. Overflow is a validation error, never a wrap or panic.
pub fn sum_amounts(amounts: impl IntoIterator<Item = Decimal>) -> LedgerResult<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, |acc, amount| {
        acc.checked_add(amount)
            .ok_or_else(|| LedgerError::validation("line amounts overflow"))
    })
}

/// At least two lines whose amounts sum to exactly zero.
pub fn validate_lines(amounts: impl IntoIterator<Item = Decimal>) -> LedgerResult<()> {
    let amounts: Vec<Decimal> = amounts.into_iter().collect();
    if amounts.len() < 2 {
        return Err(LedgerError::InsufficientLines { found: amounts.len() });
    }
    let sum = sum_amounts(amounts)?;
    if !sum.is_zero() {
        return Err(LedgerError::ImbalancedEntry { sum });
    }
    Ok(())
}

/// Journal entry header. Immutable once posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalEntryId,
    pub entry_number: EntryNumber,
    pub entry_type: EntryType,
    pub transaction_date: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub is_posted: bool,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub cash_session_id: Option<CashSessionId>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Entity for JournalEntry {
    type Id = JournalEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One persisted leg, annotated with the resolved account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: JournalLineId,
    pub entry_id: JournalEntryId,
    pub account_id: AccountId,
    pub account_code: AccountCode,
    pub account_name: String,
    pub money_location_id: Option<MoneyLocationId>,
    pub amount: Decimal,
    pub description: Option<String>,
}

impl JournalLine {
    pub fn resolved(entry_id: JournalEntryId, account: &Account, line: &NewJournalLine) -> Self {
        Self {
            id: JournalLineId::new(),
            entry_id,
            account_id: account.id,
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            money_location_id: line.money_location_id,
            amount: line.amount,
            description: line.description.clone(),
        }
    }
}

/// A validated entry with resolved lines, waiting for its number.
///
/// The store allocates the number and persists header, lines and the posted
/// flag as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntryDraft {
    pub id: JournalEntryId,
    pub entry_type: EntryType,
    pub transaction_date: DateTime<Utc>,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub cash_session_id: Option<CashSessionId>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<JournalLine>,
}

impl JournalEntryDraft {
    pub fn new(
        id: JournalEntryId,
        input: &NewJournalEntry,
        lines: Vec<JournalLine>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            entry_type: input.entry_type,
            transaction_date: input.transaction_date.unwrap_or(now),
            reference_id: input.reference_id.clone(),
            reference_type: input.reference_type.clone(),
            cash_session_id: input.cash_session_id,
            notes: input.notes.clone(),
            created_by,
            created_at: now,
            lines,
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        validate_lines(self.lines.iter().map(|l| l.amount))
    }

    /// Attach the allocated number; the entry is returned posted at `posted_at`.
    pub fn into_posted(self, entry_number: EntryNumber, posted_at: DateTime<Utc>) -> JournalEntryWithLines {
        JournalEntryWithLines {
            entry: JournalEntry {
                id: self.id,
                entry_number,
                entry_type: self.entry_type,
                transaction_date: self.transaction_date,
                posted_at: Some(posted_at),
                is_posted: true,
                reference_id: self.reference_id,
                reference_type: self.reference_type,
                cash_session_id: self.cash_session_id,
                notes: self.notes,
                created_by: self.created_by,
                created_at: self.created_at,
            },
            lines: self.lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryWithLines {
    #[serde(flatten)]
    pub entry: JournalEntry,
    pub lines: Vec<JournalLine>,
}

impl JournalEntryWithLines {
    pub fn total(&self) -> LedgerResult<Decimal> {
        sum_amounts(self.lines.iter().map(|l| l.amount))
    }

    pub fn is_balanced(&self) -> bool {
        validate_lines(self.lines.iter().map(|l| l.amount)).is_ok()
    }

    /// Mark posted, re-verifying the zero-sum rule. Returns `false` when the
    /// entry was already posted (no change).
    pub fn post(&mut self, now: DateTime<Utc>) -> LedgerResult<bool> {
        if self.entry.is_posted {
            return Ok(false);
        }
        validate_lines(self.lines.iter().map(|l| l.amount))?;
        self.entry.is_posted = true;
        self.entry.posted_at = Some(now);
        Ok(true)
    }
}

/// Listing filter for journal entries. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(default)]
    pub entry_type: Option<EntryType>,
    #[serde(default)]
    pub cash_session_id: Option<CashSessionId>,
    /// Inclusive lower bound on `transaction_date`.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `transaction_date`.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_posted: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EntryFilter {
    pub const DEFAULT_LIMIT: usize = 100;
    pub const MAX_LIMIT: usize = 1000;

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, entry: &JournalEntry) -> bool {
        self.entry_type.is_none_or(|t| entry.entry_type == t)
            && self
                .cash_session_id
                .is_none_or(|s| entry.cash_session_id == Some(s))
            && self.from.is_none_or(|from| entry.transaction_date >= from)
            && self.to.is_none_or(|to| entry.transaction_date <= to)
            && self.is_posted.is_none_or(|p| entry.is_posted == p)
    }
}

/// Newest first: transaction date, then creation time, then number.
pub fn newest_first(a: &JournalEntry, b: &JournalEntry) -> core::cmp::Ordering {
    b.transaction_date
        .cmp(&a.transaction_date)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.entry_number.cmp(&a.entry_number))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Debit line: cash into the location.
    In,
    /// Credit line: cash out of the location.
    Out,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
        }
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(MovementType::In),
            "OUT" => Ok(MovementType::Out),
            other => Err(DomainError::validation(format!("unknown movement type '{other}'"))),
        }
    }
}

/// Append-only audit record for a line that carries a money location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyMovement {
    pub id: MoneyMovementId,
    pub entry_id: JournalEntryId,
    pub money_location_id: MoneyLocationId,
    pub movement_type: MovementType,
    /// Always positive.
    pub amount: Decimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MoneyMovement {
    /// One movement per located, non-zero line of `entry`.
    pub fn derive(entry: &JournalEntryWithLines, now: DateTime<Utc>) -> Vec<MoneyMovement> {
        entry
            .lines
            .iter()
            .filter(|line| !line.amount.is_zero())
            .filter_map(|line| {
                let location = line.money_location_id?;
                let movement_type = if line.amount < Decimal::ZERO {
                    MovementType::In
                } else {
                    MovementType::Out
                };
                Some(MoneyMovement {
                    id: MoneyMovementId::new(),
                    entry_id: entry.entry.id,
                    money_location_id: location,
                    movement_type,
                    amount: line.amount.abs(),
                    description: line
                        .description
                        .clone()
                        .or_else(|| Some(entry.entry.entry_number.to_string())),
                    created_at: now,
                })
            })
            .collect()
    }

    /// Effect on the location's holdings: `+amount` for IN, `-amount` for OUT.
    pub fn signed_amount(&self) -> Decimal {
        match self.movement_type {
            MovementType::In => self.amount,
            MovementType::Out => -self.amount,
        }
    }
}
