//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Duplicate code or entry number, second OPEN session for a location |
//! | Database (foreign key violation) | `23503` | `Invariant` | Line or location referencing a missing row |
//! | Database (check constraint violation) | `23514` | `Invariant` | Posting guard refused an unbalanced entry, group account allowing transactions |
//! | Database (serialization / deadlock) | `40001` / `40P01` | `Conflict` | Concurrent writers; safe to retry |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | Other | N/A | `Backend` | Pool closed, network errors, connection failures |
//!
//! ## Atomicity
//!
//! Every multi-statement operation runs in one transaction. An early return or
//! a dropped future drops the `Transaction`, which rolls it back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgExecutor, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use cashbook_accounting::{
    Account, AccountCode, CashSession, EntryFilter, JournalEntry, JournalEntryDraft,
    JournalEntryWithLines, JournalLine, LedgerError, LocationFilter, MoneyLocation, MoneyMovement,
    NumberScope, SessionClosing, SessionCounter,
};
use cashbook_core::{
    AccountId, CashSessionId, JournalEntryId, JournalLineId, MoneyLocationId, MoneyMovementId,
    UserId,
};

use super::r#trait::{LedgerStore, StoreError, StoreResult};

/// Embedded schema applied by [`PostgresLedgerStore::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

const ACCOUNT_COLUMNS: &str = "id, code, name, account_type, normal_side, is_group, \
     allow_transactions, parent_id, is_active, created_at, updated_at";

const LOCATION_COLUMNS: &str = "id, code, name, location_type, requires_session, account_id, \
     current_balance, default_float, max_cash_limit, is_active, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, entry_number, entry_type, transaction_date, posted_at, is_posted, \
     reference_id, reference_type, cash_session_id, notes, created_by, created_at";

const SESSION_COLUMNS: &str = "id, money_location_id, opened_at, opened_by, closed_at, closed_by, \
     starting_cash, cash_sales, cash_refunds, cash_drops, status, opening_notes, closing_notes, \
     actual_cash, variance, forced";

const MOVEMENT_COLUMNS: &str =
    "id, entry_id, money_location_id, movement_type, amount, description, created_at";

/// Postgres-backed ledger store.
///
/// Uses the SQLx connection pool, so it is `Send + Sync` and cheap to clone.
/// Storage-side rules (unique codes, one open session per location, the
/// posting guard trigger) back up the checks the services already make.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn load_lines<'e, E>(executor: E, entry_id: JournalEntryId) -> StoreResult<Vec<JournalLine>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT
            l.id,
            l.entry_id,
            l.account_id,
            a.code AS account_code,
            a.name AS account_name,
            l.money_location_id,
            l.amount,
            l.description
        FROM journal_lines l
        JOIN accounts a ON a.id = l.account_id
        WHERE l.entry_id = $1
        ORDER BY l.line_no ASC
        "#,
    )
    .bind(entry_id.as_uuid())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("load_lines", e))?;

    rows.iter().map(line_from_row).collect()
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, account), fields(code = %account.code), err)]
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, code, name, account_type, normal_side, is_group,
                allow_transactions, parent_id, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(account.code.as_str())
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(account.normal_side.as_str())
        .bind(account.is_group)
        .bind(account.allow_transactions)
        .bind(account.parent_id.map(|id| *id.as_uuid()))
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                code = $2,
                name = $3,
                account_type = $4,
                normal_side = $5,
                is_group = $6,
                allow_transactions = $7,
                parent_id = $8,
                is_active = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(account.code.as_str())
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(account.normal_side.as_str())
        .bind(account.is_group)
        .bind(account.allow_transactions)
        .bind(account.parent_id.map(|id| *id.as_uuid()))
        .bind(account.is_active)
        .bind(account.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Rejected(LedgerError::AccountNotFound(
                account.code.to_string(),
            )));
        }
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn get_account_by_code(&self, code: &str) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE code = $1");
        sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account_by_code", e))?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY code ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_accounts", e))?;
        rows.iter().map(account_from_row).collect()
    }

    async fn account_has_postings(&self, id: AccountId) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM journal_lines l
                JOIN journal_entries e ON e.id = l.entry_id
                WHERE l.account_id = $1 AND e.is_posted
            )
            "#,
        )
        .bind(id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("account_has_postings", e))
    }

    async fn account_has_children(&self, id: AccountId) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM accounts WHERE parent_id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_has_children", e))
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn account_balance(&self, id: AccountId, as_of: Option<DateTime<Utc>>) -> StoreResult<Decimal> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(l.amount), 0)
            FROM journal_lines l
            JOIN journal_entries e ON e.id = l.entry_id
            WHERE l.account_id = $1
                AND e.is_posted
                AND ($2::timestamptz IS NULL OR e.transaction_date <= $2)
            "#,
        )
        .bind(id.as_uuid())
        .bind(as_of)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("account_balance", e))
    }

    #[instrument(skip(self, location), fields(code = %location.code), err)]
    async fn insert_location(&self, location: &MoneyLocation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO money_locations (
                id, code, name, location_type, requires_session, account_id,
                current_balance, default_float, max_cash_limit, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(location.id.as_uuid())
        .bind(&location.code)
        .bind(&location.name)
        .bind(location.location_type.as_str())
        .bind(location.requires_session)
        .bind(location.account_id.as_uuid())
        .bind(location.current_balance)
        .bind(location.default_float)
        .bind(location.max_cash_limit)
        .bind(location.is_active)
        .bind(location.created_at)
        .bind(location.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_location", e))?;
        Ok(())
    }

    async fn update_location(&self, location: &MoneyLocation) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE money_locations SET
                name = $2,
                requires_session = $3,
                default_float = $4,
                max_cash_limit = $5,
                is_active = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(location.id.as_uuid())
        .bind(&location.name)
        .bind(location.requires_session)
        .bind(location.default_float)
        .bind(location.max_cash_limit)
        .bind(location.is_active)
        .bind(location.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_location", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Rejected(LedgerError::MoneyLocationNotFound(
                location.id.to_string(),
            )));
        }
        Ok(())
    }

    async fn get_location(&self, id: MoneyLocationId) -> StoreResult<Option<MoneyLocation>> {
        let sql = format!("SELECT {LOCATION_COLUMNS} FROM money_locations WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_location", e))?
            .as_ref()
            .map(location_from_row)
            .transpose()
    }

    async fn get_location_by_code(&self, code: &str) -> StoreResult<Option<MoneyLocation>> {
        let sql = format!("SELECT {LOCATION_COLUMNS} FROM money_locations WHERE code = $1");
        sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_location_by_code", e))?
            .as_ref()
            .map(location_from_row)
            .transpose()
    }

    async fn list_locations(&self, filter: LocationFilter) -> StoreResult<Vec<MoneyLocation>> {
        let (active, location_type, requires_session) = match filter {
            LocationFilter::All => (None, None, None),
            LocationFilter::Active => (Some(true), None, None),
            LocationFilter::ByType(t) => (Some(true), Some(t.as_str()), None),
            LocationFilter::RequiringSession => (Some(true), None, Some(true)),
        };
        let sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM money_locations
             WHERE ($1::boolean IS NULL OR is_active = $1)
               AND ($2::text IS NULL OR location_type = $2)
               AND ($3::boolean IS NULL OR requires_session = $3)
             ORDER BY code ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(active)
            .bind(location_type)
            .bind(requires_session)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_locations", e))?;
        rows.iter().map(location_from_row).collect()
    }

    #[instrument(skip(self), fields(location_id = %id), err)]
    async fn deactivate_location(&self, id: MoneyLocationId, now: DateTime<Utc>) -> StoreResult<MoneyLocation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Row lock: `insert_session` takes FOR SHARE on the same row.
        let exists = sqlx::query("SELECT id FROM money_locations WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_location", e))?;
        if exists.is_none() {
            return Err(StoreError::Rejected(LedgerError::MoneyLocationNotFound(id.to_string())));
        }

        let has_open_session = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM cash_sessions WHERE money_location_id = $1 AND status = 'OPEN')",
        )
        .bind(id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_open_session", e))?;
        if has_open_session {
            return Err(StoreError::Rejected(LedgerError::SessionStillOpen(id)));
        }

        let sql = format!(
            "UPDATE money_locations SET is_active = FALSE, updated_at = $2 WHERE id = $1 RETURNING {LOCATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("deactivate_location", e))?;
        let location = location_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(location)
    }

    #[instrument(skip(self), fields(location_id = %id, balance = %balance), err)]
    async fn set_location_balance(
        &self,
        id: MoneyLocationId,
        balance: Decimal,
        now: DateTime<Utc>,
    ) -> StoreResult<MoneyLocation> {
        let sql = format!(
            "UPDATE money_locations SET current_balance = $2, updated_at = $3 WHERE id = $1 RETURNING {LOCATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(balance)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_location_balance", e))?
            .ok_or_else(|| StoreError::Rejected(LedgerError::MoneyLocationNotFound(id.to_string())))?;
        location_from_row(&row)
    }

    async fn location_ledger_balance(&self, id: MoneyLocationId) -> StoreResult<Decimal> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT -COALESCE(SUM(l.amount), 0)
            FROM journal_lines l
            JOIN journal_entries e ON e.id = l.entry_id
            WHERE l.money_location_id = $1 AND e.is_posted
            "#,
        )
        .bind(id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("location_ledger_balance", e))
    }

    #[instrument(
        skip(self, draft),
        fields(
            entry_id = %draft.id,
            prefix = %scope.prefix,
            year = scope.year,
            line_count = draft.lines.len()
        ),
        err
    )]
    async fn insert_entry(
        &self,
        draft: JournalEntryDraft,
        scope: &NumberScope,
    ) -> StoreResult<JournalEntryWithLines> {
        draft.validate().map_err(StoreError::Rejected)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // 1) Allocate the number: the upsert holds the counter row lock until commit.
        let seq = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO journal_sequences (prefix, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, year)
            DO UPDATE SET last_value = journal_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(&scope.prefix)
        .bind(scope.year)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("allocate_entry_number", e))?;
        let seq = u32::try_from(seq).map_err(|_| StoreError::Rejected(scope.exhausted()))?;
        let number = scope.number(seq).map_err(StoreError::Rejected)?;

        // 2) Header, unposted.
        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id, entry_number, entry_type, transaction_date, posted_at, is_posted,
                reference_id, reference_type, cash_session_id, notes, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, NULL, FALSE, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(draft.id.as_uuid())
        .bind(number.to_string())
        .bind(draft.entry_type.as_str())
        .bind(draft.transaction_date)
        .bind(&draft.reference_id)
        .bind(&draft.reference_type)
        .bind(draft.cash_session_id.map(|id| *id.as_uuid()))
        .bind(&draft.notes)
        .bind(draft.created_by.as_uuid())
        .bind(draft.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entry_header", e))?;

        // 3) Lines.
        for (line_no, line) in draft.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO journal_lines (
                    id, entry_id, line_no, account_id, money_location_id, amount, description
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(draft.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.account_id.as_uuid())
            .bind(line.money_location_id.map(|id| *id.as_uuid()))
            .bind(line.amount)
            .bind(&line.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_entry_line", e))?;
        }

        // 4) Post. The posting guard trigger re-verifies the zero sum.
        let posted_at = draft.created_at;
        sqlx::query("UPDATE journal_entries SET is_posted = TRUE, posted_at = $2 WHERE id = $1")
            .bind(draft.id.as_uuid())
            .bind(posted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("post_entry", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(draft.into_posted(number, posted_at))
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    async fn post_entry(&self, id: JournalEntryId, now: DateTime<Utc>) -> StoreResult<JournalEntry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!("SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_entry", e))?
            .ok_or(StoreError::Rejected(LedgerError::EntryNotFound(id)))?;
        let entry = entry_from_row(&row)?;
        if entry.is_posted {
            return Ok(entry);
        }

        let lines = load_lines(&mut *tx, id).await?;
        let mut full = JournalEntryWithLines { entry, lines };
        full.post(now).map_err(StoreError::Rejected)?;

        sqlx::query("UPDATE journal_entries SET is_posted = TRUE, posted_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("post_entry", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(full.entry)
    }

    async fn get_entry(&self, id: JournalEntryId) -> StoreResult<Option<JournalEntryWithLines>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = $1");
        let Some(row) = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_entry", e))?
        else {
            return Ok(None);
        };
        let entry = entry_from_row(&row)?;
        let lines = load_lines(&*self.pool, id).await?;
        Ok(Some(JournalEntryWithLines { entry, lines }))
    }

    async fn list_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<JournalEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries
             WHERE ($1::text IS NULL OR entry_type = $1)
               AND ($2::uuid IS NULL OR cash_session_id = $2)
               AND ($3::timestamptz IS NULL OR transaction_date >= $3)
               AND ($4::timestamptz IS NULL OR transaction_date <= $4)
               AND ($5::boolean IS NULL OR is_posted = $5)
             ORDER BY transaction_date DESC, created_at DESC, entry_number DESC
             LIMIT $6"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.entry_type.map(|t| t.as_str()))
            .bind(filter.cash_session_id.map(|id| *id.as_uuid()))
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.is_posted)
            .bind(filter.effective_limit() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_entries", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self, movements), fields(movement_count = movements.len()), err)]
    async fn insert_movements(&self, movements: &[MoneyMovement]) -> StoreResult<()> {
        if movements.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for movement in movements {
            sqlx::query(
                r#"
                INSERT INTO money_movements (
                    id, entry_id, money_location_id, movement_type, amount, description, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(movement.id.as_uuid())
            .bind(movement.entry_id.as_uuid())
            .bind(movement.money_location_id.as_uuid())
            .bind(movement.movement_type.as_str())
            .bind(movement.amount)
            .bind(&movement.description)
            .bind(movement.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn list_movements(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<MoneyMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM money_movements
             WHERE money_location_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(location.as_uuid())
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;
        rows.iter().map(movement_from_row).collect()
    }

    #[instrument(skip(self, session), fields(session_id = %session.id, location_id = %session.money_location_id), err)]
    async fn insert_session(&self, session: &CashSession) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let active = sqlx::query_scalar::<_, bool>(
            "SELECT is_active FROM money_locations WHERE id = $1 FOR SHARE",
        )
        .bind(session.money_location_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_location", e))?;
        if active != Some(true) {
            return Err(StoreError::Rejected(LedgerError::MoneyLocationNotFound(
                session.money_location_id.to_string(),
            )));
        }

        // A second OPEN row violates cash_sessions_one_open_per_location (23505).
        sqlx::query(
            r#"
            INSERT INTO cash_sessions (
                id, money_location_id, opened_at, opened_by, closed_at, closed_by,
                starting_cash, cash_sales, cash_refunds, cash_drops, status,
                opening_notes, closing_notes, actual_cash, variance, forced
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.money_location_id.as_uuid())
        .bind(session.opened_at)
        .bind(session.opened_by.as_uuid())
        .bind(session.closed_at)
        .bind(session.closed_by.map(|id| *id.as_uuid()))
        .bind(session.starting_cash)
        .bind(session.cash_sales)
        .bind(session.cash_refunds)
        .bind(session.cash_drops)
        .bind(session.status.as_str())
        .bind(&session.opening_notes)
        .bind(&session.closing_notes)
        .bind(session.actual_cash)
        .bind(session.variance)
        .bind(session.forced)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn get_session(&self, id: CashSessionId) -> StoreResult<Option<CashSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM cash_sessions WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_session", e))?
            .as_ref()
            .map(session_from_row)
            .transpose()
    }

    async fn active_session(&self, location: MoneyLocationId) -> StoreResult<Option<CashSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM cash_sessions WHERE money_location_id = $1 AND status = 'OPEN'"
        );
        sqlx::query(&sql)
            .bind(location.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_session", e))?
            .as_ref()
            .map(session_from_row)
            .transpose()
    }

    async fn list_sessions(&self, location: MoneyLocationId, limit: usize) -> StoreResult<Vec<CashSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM cash_sessions
             WHERE money_location_id = $1
             ORDER BY opened_at DESC
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(location.as_uuid())
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_sessions", e))?;
        rows.iter().map(session_from_row).collect()
    }

    #[instrument(skip(self), fields(location_id = %location, counter = counter.as_str(), amount = %amount), err)]
    async fn increment_session_counter(
        &self,
        location: MoneyLocationId,
        counter: SessionCounter,
        amount: Decimal,
    ) -> StoreResult<Option<CashSession>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM cash_sessions
             WHERE money_location_id = $1 AND status = 'OPEN' FOR UPDATE"
        );
        let Some(row) = sqlx::query(&sql)
            .bind(location.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_session", e))?
        else {
            return Ok(None);
        };
        let mut session = session_from_row(&row)?;
        session.record(counter, amount).map_err(StoreError::Rejected)?;

        let total = match counter {
            SessionCounter::Sales => session.cash_sales,
            SessionCounter::Refunds => session.cash_refunds,
            SessionCounter::Drops => session.cash_drops,
        };
        // Column names come from a closed enum, never from input.
        let column = counter.as_str();
        sqlx::query(&format!("UPDATE cash_sessions SET {column} = $2 WHERE id = $1"))
            .bind(session.id.as_uuid())
            .bind(total)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("increment_session_counter", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Some(session))
    }

    #[instrument(skip(self, closing), fields(session_id = %id, forced = closing.forced), err)]
    async fn close_session(&self, id: CashSessionId, closing: SessionClosing) -> StoreResult<CashSession> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!("SELECT {SESSION_COLUMNS} FROM cash_sessions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_session", e))?
            .ok_or(StoreError::Rejected(LedgerError::SessionNotFound(id)))?;
        let mut session = session_from_row(&row)?;
        session.close(closing).map_err(StoreError::Rejected)?;

        sqlx::query(
            r#"
            UPDATE cash_sessions SET
                closed_at = $2,
                closed_by = $3,
                status = $4,
                closing_notes = $5,
                actual_cash = $6,
                variance = $7,
                forced = $8
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(session.closed_at)
        .bind(session.closed_by.map(|u| *u.as_uuid()))
        .bind(session.status.as_str())
        .bind(&session.closing_notes)
        .bind(session.actual_cash)
        .bind(session.variance)
        .bind(session.forced)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("close_session", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(session)
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") | Some("23514") => StoreError::Invariant(msg),
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring a connection in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

// Row decoding

fn column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to read column {name}: {e}")))
}

fn parsed<T>(row: &PgRow, name: &str) -> StoreResult<T>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = column(row, name)?;
    raw.parse()
        .map_err(|e| StoreError::Backend(format!("corrupt value in column {name}: {e}")))
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let code: String = column(row, "code")?;
    Ok(Account {
        id: AccountId::from_uuid(column(row, "id")?),
        code: AccountCode::parse(&code)
            .map_err(|e| StoreError::Backend(format!("corrupt account code: {e}")))?,
        name: column(row, "name")?,
        account_type: parsed(row, "account_type")?,
        normal_side: parsed(row, "normal_side")?,
        is_group: column(row, "is_group")?,
        allow_transactions: column(row, "allow_transactions")?,
        parent_id: column::<Option<Uuid>>(row, "parent_id")?.map(AccountId::from_uuid),
        is_active: column(row, "is_active")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn location_from_row(row: &PgRow) -> StoreResult<MoneyLocation> {
    Ok(MoneyLocation {
        id: MoneyLocationId::from_uuid(column(row, "id")?),
        code: column(row, "code")?,
        name: column(row, "name")?,
        location_type: parsed(row, "location_type")?,
        requires_session: column(row, "requires_session")?,
        account_id: AccountId::from_uuid(column(row, "account_id")?),
        current_balance: column(row, "current_balance")?,
        default_float: column(row, "default_float")?,
        max_cash_limit: column(row, "max_cash_limit")?,
        is_active: column(row, "is_active")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> StoreResult<JournalEntry> {
    Ok(JournalEntry {
        id: JournalEntryId::from_uuid(column(row, "id")?),
        entry_number: parsed(row, "entry_number")?,
        entry_type: parsed(row, "entry_type")?,
        transaction_date: column(row, "transaction_date")?,
        posted_at: column(row, "posted_at")?,
        is_posted: column(row, "is_posted")?,
        reference_id: column(row, "reference_id")?,
        reference_type: column(row, "reference_type")?,
        cash_session_id: column::<Option<Uuid>>(row, "cash_session_id")?.map(CashSessionId::from_uuid),
        notes: column(row, "notes")?,
        created_by: UserId::from_uuid(column(row, "created_by")?),
        created_at: column(row, "created_at")?,
    })
}

fn line_from_row(row: &PgRow) -> StoreResult<JournalLine> {
    let code: String = column(row, "account_code")?;
    Ok(JournalLine {
        id: JournalLineId::from_uuid(column(row, "id")?),
        entry_id: JournalEntryId::from_uuid(column(row, "entry_id")?),
        account_id: AccountId::from_uuid(column(row, "account_id")?),
        account_code: AccountCode::parse(&code)
            .map_err(|e| StoreError::Backend(format!("corrupt account code: {e}")))?,
        account_name: column(row, "account_name")?,
        money_location_id: column::<Option<Uuid>>(row, "money_location_id")?
            .map(MoneyLocationId::from_uuid),
        amount: column(row, "amount")?,
        description: column(row, "description")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<CashSession> {
    Ok(CashSession {
        id: CashSessionId::from_uuid(column(row, "id")?),
        money_location_id: MoneyLocationId::from_uuid(column(row, "money_location_id")?),
        opened_at: column(row, "opened_at")?,
        opened_by: UserId::from_uuid(column(row, "opened_by")?),
        closed_at: column(row, "closed_at")?,
        closed_by: column::<Option<Uuid>>(row, "closed_by")?.map(UserId::from_uuid),
        starting_cash: column(row, "starting_cash")?,
        cash_sales: column(row, "cash_sales")?,
        cash_refunds: column(row, "cash_refunds")?,
        cash_drops: column(row, "cash_drops")?,
        status: parsed(row, "status")?,
        opening_notes: column(row, "opening_notes")?,
        closing_notes: column(row, "closing_notes")?,
        actual_cash: column(row, "actual_cash")?,
        variance: column(row, "variance")?,
        forced: column(row, "forced")?,
    })
}

fn movement_from_row(row: &PgRow) -> StoreResult<MoneyMovement> {
    Ok(MoneyMovement {
        id: MoneyMovementId::from_uuid(column(row, "id")?),
        entry_id: JournalEntryId::from_uuid(column(row, "entry_id")?),
        money_location_id: MoneyLocationId::from_uuid(column(row, "money_location_id")?),
        movement_type: parsed(row, "movement_type")?,
        amount: column(row, "amount")?,
        description: column(row, "description")?,
        created_at: column(row, "created_at")?,
    })
}
