//! Journal Engine: validated double-entry posting.
//!
//! ## `create_entry` pipeline
//!
//! ```text
//! NewJournalEntry
//!   ↓
//! 1. Validate line count and zero sum (no IO)
//!   ↓
//! 2. Resolve accounts (active leaf only) and money locations
//!   ↓
//! 3. Store: allocate number, insert header + lines, mark posted (one unit)
//!   ↓
//! 4. Write money movements (best effort)
//!   ↓
//! 5. Publish JournalEntryCreated (best effort)
//! ```
//!
//! Every validation error is raised before step 3. A failure or timeout in
//! step 3 leaves nothing behind. An entry-number conflict in step 3 is retried
//! up to `entry_number_retries` times with a fresh allocation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use cashbook_accounting::{
    Account, EntryFilter, JournalEntry, JournalEntryCreated, JournalEntryDraft,
    JournalEntryWithLines, JournalLine, LedgerError, LedgerEvent, LedgerResult, MoneyMovement,
    NewJournalEntry, NumberScope,
};
use cashbook_core::{AccountId, JournalEntryId, MoneyLocationId, UserId};
use cashbook_events::EventBus;

use crate::config::LedgerConfig;
use crate::notify::{LedgerEnvelope, publish};
use crate::store::{LedgerStore, bounded};

#[derive(Debug, Clone)]
pub struct JournalEngine<S, B> {
    store: S,
    bus: B,
    entry_prefix: String,
    timeout: Duration,
    entry_number_retries: u32,
}

impl<S, B> JournalEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(store: S, bus: B, config: &LedgerConfig) -> Self {
        Self {
            store,
            bus,
            entry_prefix: config.entry_prefix.clone(),
            timeout: config.storage_timeout,
            entry_number_retries: config.entry_number_retries,
        }
    }

    #[instrument(
        skip(self, input),
        fields(entry_type = input.entry_type.as_str(), line_count = input.lines.len(), acting_user = %acting_user),
        err
    )]
    pub async fn create_entry(
        &self,
        input: NewJournalEntry,
        acting_user: UserId,
    ) -> LedgerResult<JournalEntryWithLines> {
        input.validate()?;

        let entry_id = JournalEntryId::new();
        let lines = self.resolve_lines(entry_id, &input).await?;
        if let Some(session_id) = input.cash_session_id {
            bounded(self.timeout, "get_session", self.store.get_session(session_id))
                .await?
                .ok_or(LedgerError::SessionNotFound(session_id))?;
        }

        let now = Utc::now();
        let draft = JournalEntryDraft::new(entry_id, &input, lines, acting_user, now);
        let scope = NumberScope::new(self.entry_prefix.clone(), now.year())?;
        let entry = self.insert_with_retry(draft, &scope).await?;

        self.write_movements(&entry, now).await;
        publish(
            &self.bus,
            LedgerEvent::JournalEntryCreated(JournalEntryCreated::from_entry(&entry.entry, acting_user, now)),
        );

        info!(
            entry_id = %entry.entry.id,
            entry_number = %entry.entry.entry_number,
            "journal entry posted"
        );
        Ok(entry)
    }

    async fn resolve_lines(&self, entry_id: JournalEntryId, input: &NewJournalEntry) -> LedgerResult<Vec<JournalLine>> {
        let mut accounts: HashMap<&str, Account> = HashMap::new();
        let mut locations: HashMap<MoneyLocationId, AccountId> = HashMap::new();
        let mut lines = Vec::with_capacity(input.lines.len());

        for line in &input.lines {
            let code = line.account_code.as_str();
            if !accounts.contains_key(code) {
                let account = bounded(self.timeout, "get_account_by_code", self.store.get_account_by_code(code))
                    .await?
                    .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))?;
                account.ensure_transactable()?;
                accounts.insert(code, account);
            }
            let Some(account) = accounts.get(code) else {
                return Err(LedgerError::AccountNotFound(code.to_string()));
            };

            if let Some(location_id) = line.money_location_id {
                let bound = match locations.get(&location_id) {
                    Some(bound) => *bound,
                    None => {
                        let location = bounded(self.timeout, "get_location", self.store.get_location(location_id))
                            .await?
                            .filter(|l| l.is_active)
                            .ok_or_else(|| LedgerError::MoneyLocationNotFound(location_id.to_string()))?;
                        locations.insert(location_id, location.account_id);
                        location.account_id
                    }
                };
                if bound != account.id {
                    return Err(LedgerError::validation(format!(
                        "money location {location_id} is not bound to account {}",
                        account.code
                    )));
                }
            }

            lines.push(JournalLine::resolved(entry_id, account, line));
        }

        Ok(lines)
    }

    async fn insert_with_retry(
        &self,
        draft: JournalEntryDraft,
        scope: &NumberScope,
    ) -> LedgerResult<JournalEntryWithLines> {
        let mut attempt = 0;
        loop {
            match bounded(self.timeout, "insert_entry", self.store.insert_entry(draft.clone(), scope)).await {
                Err(LedgerError::Conflict(msg)) if attempt < self.entry_number_retries => {
                    attempt += 1;
                    warn!(attempt, error = %msg, "entry number conflict; retrying");
                }
                other => return other,
            }
        }
    }

    /// Movement rows are an audit trail; a failure is logged and the entry
    /// stays posted.
    async fn write_movements(&self, entry: &JournalEntryWithLines, now: DateTime<Utc>) {
        let movements = MoneyMovement::derive(entry, now);
        if movements.is_empty() {
            return;
        }
        if let Err(err) = bounded(self.timeout, "insert_movements", self.store.insert_movements(&movements)).await {
            warn!(
                entry_number = %entry.entry.entry_number,
                locations = ?movements.iter().map(|m| m.money_location_id.to_string()).collect::<Vec<_>>(),
                error = %err,
                "failed to record money movements"
            );
        }
    }

    /// Idempotent. The store re-verifies the zero-sum rule.
    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn post_entry(&self, id: JournalEntryId) -> LedgerResult<JournalEntry> {
        bounded(self.timeout, "post_entry", self.store.post_entry(id, Utc::now())).await
    }

    pub async fn get_entry(&self, id: JournalEntryId) -> LedgerResult<JournalEntryWithLines> {
        bounded(self.timeout, "get_entry", self.store.get_entry(id))
            .await?
            .ok_or(LedgerError::EntryNotFound(id))
    }

    /// Newest first.
    pub async fn list_entries(&self, filter: &EntryFilter) -> LedgerResult<Vec<JournalEntry>> {
        bounded(self.timeout, "list_entries", self.store.list_entries(filter)).await
    }

    /// Signed sum of posted line amounts (negative = net debit). `as_of`
    /// excludes entries dated after it.
    pub async fn get_account_balance(
        &self,
        account_id: AccountId,
        as_of: Option<DateTime<Utc>>,
    ) -> LedgerResult<Decimal> {
        bounded(self.timeout, "get_account", self.store.get_account(account_id))
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        bounded(self.timeout, "account_balance", self.store.account_balance(account_id, as_of)).await
    }

    pub async fn list_movements(&self, location: MoneyLocationId, limit: usize) -> LedgerResult<Vec<MoneyMovement>> {
        bounded(self.timeout, "list_movements", self.store.list_movements(location, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;

    use cashbook_accounting::{
        AccountType, EntryType, LocationType, MAX_ENTRY_SEQUENCE, NewAccount, NewJournalLine, NewMoneyLocation,
    };
    use cashbook_events::InMemoryEventBus;

    use crate::accounts::AccountRegistry;
    use crate::money_locations::MoneyLocationRegistry;
    use crate::store::InMemoryLedgerStore;

    type Engine = JournalEngine<Arc<InMemoryLedgerStore>, Arc<InMemoryEventBus<LedgerEnvelope>>>;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn setup() -> (Arc<InMemoryLedgerStore>, Arc<InMemoryEventBus<LedgerEnvelope>>, Engine) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let accounts = AccountRegistry::new(store.clone(), Duration::from_secs(1));
        for (code, kind) in [
            ("1.1.01", AccountType::Asset),
            ("1.2.01", AccountType::Asset),
            ("4.1.01", AccountType::Income),
            ("2.1.02", AccountType::Liability),
        ] {
            accounts
                .create_account(NewAccount::leaf(code, code, kind))
                .await
                .unwrap();
        }
        let engine = JournalEngine::new(store.clone(), bus.clone(), &LedgerConfig::default());
        (store, bus, engine)
    }

    fn sale(amount: &str) -> NewJournalEntry {
        NewJournalEntry::new(EntryType::Sale)
            .line(NewJournalLine::debit("1.1.01", dec(amount)))
            .line(NewJournalLine::credit("4.1.01", dec(amount)))
    }

    #[tokio::test]
    async fn create_entry_posts_and_notifies() {
        let (_, bus, engine) = setup().await;
        let notifications = bus.subscribe();

        let entry = engine
            .create_entry(sale("12.50").reference("sale", "S-1"), UserId::new())
            .await
            .unwrap();

        assert!(entry.entry.is_posted);
        assert_eq!(entry.entry.entry_number.prefix(), "JE");
        assert_eq!(entry.entry.entry_number.seq(), 1);
        assert_eq!(entry.total().unwrap(), Decimal::ZERO);

        let published = notifications.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), LedgerEvent::JOURNAL_ENTRY_CREATED);
        let LedgerEvent::JournalEntryCreated(payload) = published[0].payload() else {
            panic!("unexpected notification");
        };
        assert_eq!(payload.entry_id, entry.entry.id);
        assert_eq!(payload.reference_id.as_deref(), Some("S-1"));
    }

    #[tokio::test]
    async fn validation_happens_before_any_write() {
        let (store, bus, engine) = setup().await;
        let notifications = bus.subscribe();

        let one_line = NewJournalEntry::new(EntryType::Adjustment).line(NewJournalLine::debit("1.1.01", dec("1")));
        assert_eq!(
            engine.create_entry(one_line, UserId::new()).await.unwrap_err(),
            LedgerError::InsufficientLines { found: 1 }
        );

        let unknown = NewJournalEntry::new(EntryType::Sale)
            .line(NewJournalLine::debit("1.1.01", dec("5")))
            .line(NewJournalLine::credit("9.9.99", dec("5")));
        assert_eq!(
            engine.create_entry(unknown, UserId::new()).await.unwrap_err(),
            LedgerError::AccountNotFound("9.9.99".into())
        );

        assert_eq!(store.entry_count(), 0);
        assert!(notifications.drain().is_empty());
    }

    #[tokio::test]
    async fn located_line_must_use_the_bound_account() {
        let (store, _, engine) = setup().await;
        let locations = MoneyLocationRegistry::new(store.clone(), Duration::from_secs(1));
        let drawer = locations
            .create(NewMoneyLocation::new("D1", "Drawer", LocationType::CashDrawer, "1.1.01"))
            .await
            .unwrap();

        let wrong = NewJournalEntry::new(EntryType::Sale)
            .line(NewJournalLine::debit("1.2.01", dec("5")).at_location(drawer.id))
            .line(NewJournalLine::credit("4.1.01", dec("5")));
        assert!(matches!(
            engine.create_entry(wrong, UserId::new()).await,
            Err(LedgerError::Validation(_))
        ));

        let missing = NewJournalEntry::new(EntryType::Sale)
            .line(NewJournalLine::debit("1.1.01", dec("5")).at_location(MoneyLocationId::new()))
            .line(NewJournalLine::credit("4.1.01", dec("5")));
        assert!(matches!(
            engine.create_entry(missing, UserId::new()).await,
            Err(LedgerError::MoneyLocationNotFound(_))
        ));

        let right = NewJournalEntry::new(EntryType::Sale)
            .line(NewJournalLine::debit("1.1.01", dec("5")).at_location(drawer.id))
            .line(NewJournalLine::credit("4.1.01", dec("5")));
        engine.create_entry(right, UserId::new()).await.unwrap();
        assert_eq!(store.entry_count(), 1);

        let movements = engine.list_movements(drawer.id, 10).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].signed_amount(), dec("5"));
    }

    #[tokio::test]
    async fn unknown_session_reference_is_rejected() {
        let (store, _, engine) = setup().await;
        let err = engine
            .create_entry(sale("1").in_session(cashbook_core::CashSessionId::new()), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionNotFound(_)));
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn get_list_post_and_balance() {
        let (store, _, engine) = setup().await;
        let first = engine.create_entry(sale("10"), UserId::new()).await.unwrap();
        let second = engine.create_entry(sale("2.5"), UserId::new()).await.unwrap();

        let fetched = engine.get_entry(first.entry.id).await.unwrap();
        assert_eq!(fetched, first);

        let listed = engine.list_entries(&EntryFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.entry.id);

        let again = engine.post_entry(first.entry.id).await.unwrap();
        assert_eq!(again.posted_at, first.entry.posted_at);

        let cash = store.get_account_by_code("1.1.01").await.unwrap().unwrap();
        assert_eq!(engine.get_account_balance(cash.id, None).await.unwrap(), dec("-12.5"));
        assert!(matches!(
            engine.get_entry(JournalEntryId::new()).await,
            Err(LedgerError::EntryNotFound(_))
        ));
        assert!(matches!(
            engine.get_account_balance(AccountId::new(), None).await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_numbering_is_reported_once_and_not_retried() {
        let (store, bus, engine) = setup().await;
        let notifications = bus.subscribe();
        let year = Utc::now().year();
        store.set_sequence("JE", year, MAX_ENTRY_SEQUENCE);

        let err = engine.create_entry(sale("5"), UserId::new()).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::SequenceExhausted {
                prefix: "JE".into(),
                year
            }
        );
        assert!(!err.is_retryable());
        assert_eq!(store.entry_count(), 0);
        assert!(notifications.drain().is_empty());

        store.set_sequence("JE", year, MAX_ENTRY_SEQUENCE - 1);
        let last = engine.create_entry(sale("5"), UserId::new()).await.unwrap();
        assert_eq!(last.entry.entry_number.to_string(), format!("JE-{year}-999999"));
    }
}
