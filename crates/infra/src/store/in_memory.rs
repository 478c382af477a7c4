use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use cashbook_accounting::{
    Account, CashSession, EntryFilter, JournalEntry, JournalEntryDraft, JournalEntryWithLines,
    JournalLine, LedgerError, LocationFilter, MoneyLocation, MoneyMovement, NumberScope,
    SessionClosing, SessionCounter, newest_first, sum_amounts,
};
use cashbook_core::{AccountId, CashSessionId, JournalEntryId, MoneyLocationId};

use super::r#trait::{LedgerStore, StoreError, StoreResult};

/// Injected failures for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `insert_entry` fails as if the line inserts hit a backend error.
    InsertLines,
    /// `insert_movements` fails.
    InsertMovements,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    locations: HashMap<MoneyLocationId, MoneyLocation>,
    entries: HashMap<JournalEntryId, JournalEntry>,
    lines: HashMap<JournalEntryId, Vec<JournalLine>>,
    movements: Vec<MoneyMovement>,
    sessions: HashMap<CashSessionId, CashSession>,
    sequences: HashMap<(String, i32), u32>,
}

impl State {
    fn open_session_for(&self, location: MoneyLocationId) -> Option<&CashSession> {
        self.sessions
            .values()
            .find(|s| s.money_location_id == location && s.is_open())
    }

    fn with_lines(&self, entry: &JournalEntry) -> JournalEntryWithLines {
        JournalEntryWithLines {
            entry: entry.clone(),
            lines: self.lines.get(&entry.id).cloned().unwrap_or_default(),
        }
    }

    /// Amounts of every posted line matching `keep`.
    fn posted_amounts<'a>(
        &'a self,
        as_of: Option<DateTime<Utc>>,
        keep: impl Fn(&JournalLine) -> bool + 'a,
    ) -> impl Iterator<Item = Decimal> + 'a {
        self.entries
            .values()
            .filter(move |e| e.is_posted && as_of.is_none_or(|t| e.transaction_date <= t))
            .flat_map(move |e| self.lines.get(&e.id).into_iter().flatten())
            .filter(move |l| keep(l))
            .map(|l| l.amount)
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A single lock guards all state, so every trait call
/// is atomic. Optional artificial latency is applied before the lock is taken,
/// which lets timeout tests drop a call before it has touched anything.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
    faults: Mutex<HashSet<FailPoint>>,
    latency: Option<Duration>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_on(&self, point: FailPoint) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(point);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// Move the last allocated number of a `(prefix, year)` scope.
    pub fn set_sequence(&self, prefix: &str, year: i32, last: u32) {
        if let Ok(mut state) = self.state.write() {
            state.sequences.insert((prefix.to_string(), year), last);
        }
    }

    /// Number of journal headers stored (posted or not).
    pub fn entry_count(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Number of journal lines stored.
    pub fn line_count(&self) -> usize {
        self.state
            .read()
            .map(|s| s.lines.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn failing(&self, point: FailPoint) -> bool {
        self.faults
            .lock()
            .map(|faults| faults.contains(&point))
            .unwrap_or(false)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        self.pause().await;
        let mut state = self.write()?;
        if state.accounts.values().any(|a| a.code == account.code) {
            return Err(StoreError::UniqueViolation(format!(
                "account code {} already exists",
                account.code
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        self.pause().await;
        let mut state = self.write()?;
        if state
            .accounts
            .values()
            .any(|a| a.code == account.code && a.id != account.id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "account code {} already exists",
                account.code
            )));
        }
        match state.accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(StoreError::Rejected(LedgerError::AccountNotFound(
                account.code.to_string(),
            ))),
        }
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        self.pause().await;
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn get_account_by_code(&self, code: &str) -> StoreResult<Option<Account>> {
        self.pause().await;
        Ok(self
            .read()?
            .accounts
            .values()
            .find(|a| a.code.as_str() == code)
            .cloned())
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        self.pause().await;
        let mut accounts: Vec<Account> = self.read()?.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    async fn account_has_postings(&self, id: AccountId) -> StoreResult<bool> {
        self.pause().await;
        let state = self.read()?;
        Ok(state.posted_amounts(None, move |l| l.account_id == id).next().is_some())
    }

    async fn account_has_children(&self, id: AccountId) -> StoreResult<bool> {
        self.pause().await;
        let state = self.read()?;
        Ok(state.accounts.values().any(|a| a.parent_id == Some(id)))
    }

    async fn account_balance(&self, id: AccountId, as_of: Option<DateTime<Utc>>) -> StoreResult<Decimal> {
        self.pause().await;
        let state = self.read()?;
        sum_amounts(state.posted_amounts(as_of, move |l| l.account_id == id)).map_err(StoreError::Rejected)
    }

    async fn insert_location(&self, location: &MoneyLocation) -> StoreResult<()> {
        self.pause().await;
        let mut state = self.write()?;
        if state.locations.values().any(|l| l.code == location.code) {
            return Err(StoreError::UniqueViolation(format!(
                "money location code {} already exists",
                location.code
            )));
        }
        if !state.accounts.contains_key(&location.account_id) {
            return Err(StoreError::Invariant(format!(
                "money location {} references unknown account {}",
                location.code, location.account_id
            )));
        }
        state.locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn update_location(&self, location: &MoneyLocation) -> StoreResult<()> {
        self.pause().await;
        let mut state = self.write()?;
        match state.locations.get_mut(&location.id) {
            Some(existing) => {
                *existing = location.clone();
                Ok(())
            }
            None => Err(StoreError::Rejected(LedgerError::MoneyLocationNotFound(
                location.id.to_string(),
            ))),
        }
    }

    async fn get_location(&self, id: MoneyLocationId) -> StoreResult<Option<MoneyLocation>> {
        self.pause().await;
        Ok(self.read()?.locations.get(&id).cloned())
    }

    async fn get_location_by_code(&self, code: &str) -> StoreResult<Option<MoneyLocation>> {
        self.pause().await;
        Ok(self
            .read()?
            .locations
            .values()
            .find(|l| l.code == code)
            .cloned())
    }

    async fn list_locations(&self, filter: LocationFilter) -> StoreResult<Vec<MoneyLocation>> {
        self.pause().await;
        let mut locations: Vec<MoneyLocation> = self
            .read()?
            .locations
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        locations.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(locations)
    }

    async fn deactivate_location(&self, id: MoneyLocationId, now: DateTime<Utc>) -> StoreResult<MoneyLocation> {
        self.pause().await;
        let mut state = self.write()?;
        if state.open_session_for(id).is_some() {
            return Err(StoreError::Rejected(LedgerError::SessionStillOpen(id)));
        }
        let location = state
            .locations
            .get_mut(&id)
            .ok_or_else(|| StoreError::Rejected(LedgerError::MoneyLocationNotFound(id.to_string())))?;
        location.is_active = false;
        location.updated_at = now;
        Ok(location.clone())
    }

    async fn set_location_balance(
        &self,
        id: MoneyLocationId,
        balance: Decimal,
        now: DateTime<Utc>,
    ) -> StoreResult<MoneyLocation> {
        self.pause().await;
        let mut state = self.write()?;
        let location = state
            .locations
            .get_mut(&id)
            .ok_or_else(|| StoreError::Rejected(LedgerError::MoneyLocationNotFound(id.to_string())))?;
        location.current_balance = balance;
        location.updated_at = now;
        Ok(location.clone())
    }

    async fn location_ledger_balance(&self, id: MoneyLocationId) -> StoreResult<Decimal> {
        self.pause().await;
        let state = self.read()?;
        let signed = sum_amounts(state.posted_amounts(None, move |l| l.money_location_id == Some(id)))
            .map_err(StoreError::Rejected)?;
        Ok(-signed)
    }

    async fn insert_entry(
        &self,
        draft: JournalEntryDraft,
        scope: &NumberScope,
    ) -> StoreResult<JournalEntryWithLines> {
        self.pause().await;
        if self.failing(FailPoint::InsertLines) {
            return Err(StoreError::Backend("injected failure: insert journal lines".to_string()));
        }

        let mut state = self.write()?;
        if let Some(line) = draft
            .lines
            .iter()
            .find(|l| !state.accounts.contains_key(&l.account_id))
        {
            return Err(StoreError::Invariant(format!(
                "journal line references unknown account {}",
                line.account_id
            )));
        }
        draft.validate().map_err(StoreError::Rejected)?;

        let key = (scope.prefix.clone(), scope.year);
        let next = state.sequences.get(&key).copied().unwrap_or(0).saturating_add(1);
        let number = scope.number(next).map_err(StoreError::Rejected)?;
        if state.entries.values().any(|e| e.entry_number == number) {
            return Err(StoreError::UniqueViolation(format!("entry number {number} already exists")));
        }

        let posted_at = draft.created_at;
        let entry = draft.into_posted(number, posted_at);
        state.sequences.insert(key, next);
        state.entries.insert(entry.entry.id, entry.entry.clone());
        state.lines.insert(entry.entry.id, entry.lines.clone());
        Ok(entry)
    }

    async fn post_entry(&self, id: JournalEntryId, now: DateTime<Utc>) -> StoreResult<JournalEntry> {
        self.pause().await;
        let mut state = self.write()?;
        let entry = state
            .entries
            .get(&id)
            .ok_or(StoreError::Rejected(LedgerError::EntryNotFound(id)))?;
        let mut full = state.with_lines(entry);
        full.post(now).map_err(StoreError::Rejected)?;
        state.entries.insert(id, full.entry.clone());
        Ok(full.entry)
    }

    async fn get_entry(&self, id: JournalEntryId) -> StoreResult<Option<JournalEntryWithLines>> {
        self.pause().await;
        let state = self.read()?;
        Ok(state.entries.get(&id).map(|e| state.with_lines(e)))
    }

    async fn list_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<JournalEntry>> {
        self.pause().await;
        let mut entries: Vec<JournalEntry> = self
            .read()?
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(newest_first);
        entries.truncate(filter.effective_limit());
        Ok(entries)
    }

    async fn insert_movements(&self, movements: &[MoneyMovement]) -> StoreResult<()> {
        self.pause().await;
        if self.failing(FailPoint::InsertMovements) {
            return Err(StoreError::Backend("injected failure: insert money movements".to_string()));
        }
        self.write()?.movements.extend_from_slice(movements);
        Ok(())
    }

    async fn list_movements(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<MoneyMovement>> {
        self.pause().await;
        Ok(self
            .read()?
            .movements
            .iter()
            .rev()
            .filter(|m| m.money_location_id == location)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_session(&self, session: &CashSession) -> StoreResult<()> {
        self.pause().await;
        let mut state = self.write()?;
        let location_active = state
            .locations
            .get(&session.money_location_id)
            .is_some_and(|l| l.is_active);
        if !location_active {
            return Err(StoreError::Rejected(LedgerError::MoneyLocationNotFound(
                session.money_location_id.to_string(),
            )));
        }
        if session.is_open() && state.open_session_for(session.money_location_id).is_some() {
            return Err(StoreError::UniqueViolation(format!(
                "location {} already has an open cash session",
                session.money_location_id
            )));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: CashSessionId) -> StoreResult<Option<CashSession>> {
        self.pause().await;
        Ok(self.read()?.sessions.get(&id).cloned())
    }

    async fn active_session(&self, location: MoneyLocationId) -> StoreResult<Option<CashSession>> {
        self.pause().await;
        Ok(self.read()?.open_session_for(location).cloned())
    }

    async fn list_sessions(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<CashSession>> {
        self.pause().await;
        let mut sessions: Vec<CashSession> = self
            .read()?
            .sessions
            .values()
            .filter(|s| s.money_location_id == location)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn increment_session_counter(
        &self,
        location: MoneyLocationId,
        counter: SessionCounter,
        amount: Decimal,
    ) -> StoreResult<Option<CashSession>> {
        self.pause().await;
        let mut state = self.write()?;
        let Some(id) = state.open_session_for(location).map(|s| s.id) else {
            return Ok(None);
        };
        let Some(session) = state.sessions.get_mut(&id) else {
            return Ok(None);
        };
        let mut updated = session.clone();
        updated.record(counter, amount).map_err(StoreError::Rejected)?;
        *session = updated.clone();
        Ok(Some(updated))
    }

    async fn close_session(&self, id: CashSessionId, closing: SessionClosing) -> StoreResult<CashSession> {
        self.pause().await;
        let mut state = self.write()?;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::Rejected(LedgerError::SessionNotFound(id)))?;
        let mut updated = session.clone();
        updated.close(closing).map_err(StoreError::Rejected)?;
        *session = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashbook_accounting::{
        AccountCode, AccountType, BalanceSide, EntryType, LocationType, NewJournalEntry,
        NewJournalLine, NewMoneyLocation,
    };
    use cashbook_core::UserId;

    fn leaf(code: &str) -> Account {
        let now = Utc::now();
        Account {
            id: AccountId::new(),
            code: AccountCode::parse(code).unwrap(),
            name: code.to_string(),
            account_type: AccountType::Asset,
            normal_side: BalanceSide::Debit,
            is_group: false,
            allow_transactions: true,
            parent_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn draft(cash: &Account, revenue: &Account, amount: i64) -> JournalEntryDraft {
        let id = JournalEntryId::new();
        let input = NewJournalEntry::new(EntryType::Sale)
            .line(NewJournalLine::debit(cash.code.as_str(), Decimal::new(amount, 0)))
            .line(NewJournalLine::credit(revenue.code.as_str(), Decimal::new(amount, 0)));
        let lines = vec![
            JournalLine::resolved(id, cash, &input.lines[0]),
            JournalLine::resolved(id, revenue, &input.lines[1]),
        ];
        JournalEntryDraft::new(id, &input, lines, UserId::new(), Utc::now())
    }

    async fn seeded() -> (InMemoryLedgerStore, Account, Account) {
        let store = InMemoryLedgerStore::new();
        let cash = leaf("1.1.01");
        let revenue = leaf("4.1.01");
        store.insert_account(&cash).await.unwrap();
        store.insert_account(&revenue).await.unwrap();
        (store, cash, revenue)
    }

    #[tokio::test]
    async fn entry_numbers_are_sequential_per_scope() {
        let (store, cash, revenue) = seeded().await;
        let y24 = NumberScope::new("JE", 2024).unwrap();
        let y25 = NumberScope::new("JE", 2025).unwrap();

        let a = store.insert_entry(draft(&cash, &revenue, 10), &y24).await.unwrap();
        let b = store.insert_entry(draft(&cash, &revenue, 10), &y24).await.unwrap();
        let c = store.insert_entry(draft(&cash, &revenue, 10), &y25).await.unwrap();

        assert_eq!(a.entry.entry_number.to_string(), "JE-2024-000001");
        assert_eq!(b.entry.entry_number.to_string(), "JE-2024-000002");
        assert_eq!(c.entry.entry_number.to_string(), "JE-2025-000001");
        assert!(a.entry.is_posted);
    }

    #[tokio::test]
    async fn failed_insert_leaves_no_rows_and_does_not_consume_a_number() {
        let (store, cash, revenue) = seeded().await;
        let scope = NumberScope::new("JE", 2024).unwrap();

        store.fail_on(FailPoint::InsertLines);
        assert!(store.insert_entry(draft(&cash, &revenue, 5), &scope).await.is_err());
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.line_count(), 0);

        store.clear_faults();
        let entry = store.insert_entry(draft(&cash, &revenue, 5), &scope).await.unwrap();
        assert_eq!(entry.entry.entry_number.seq(), 1);
    }

    #[tokio::test]
    async fn imbalanced_draft_is_refused_by_the_store() {
        let (store, cash, revenue) = seeded().await;
        let mut bad = draft(&cash, &revenue, 5);
        bad.lines[1].amount = Decimal::new(4, 0);

        let err = store
            .insert_entry(bad, &NumberScope::new("JE", 2024).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(LedgerError::ImbalancedEntry { .. })));
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn second_open_session_is_a_unique_violation() {
        let (store, cash, _) = seeded().await;
        let drawer = MoneyLocation::create(
            MoneyLocationId::new(),
            NewMoneyLocation::new("DRW-1", "Drawer", LocationType::CashDrawer, "1.1.01"),
            &cash,
            Utc::now(),
        )
        .unwrap();
        store.insert_location(&drawer).await.unwrap();

        let open = |starting: i64| {
            CashSession::open(
                CashSessionId::new(),
                drawer.id,
                Decimal::new(starting, 0),
                UserId::new(),
                None,
                Utc::now(),
            )
            .unwrap()
        };
        let first = open(100);
        store.insert_session(&first).await.unwrap();
        let err = store.insert_session(&open(50)).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let active = store.active_session(drawer.id).await.unwrap().unwrap();
        assert_eq!(active, first);

        let err = store.deactivate_location(drawer.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(LedgerError::SessionStillOpen(_))));
    }
}
