//! Cash Session Manager: drawer open/record/close cycles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use cashbook_accounting::{
    CashSession, CashSessionClosed, CashSessionOpened, LedgerError, LedgerEvent, LedgerResult,
    SessionClosing, SessionCounter,
};
use cashbook_core::{CashSessionId, MoneyLocationId, UserId};
use cashbook_events::EventBus;

use crate::config::LedgerConfig;
use crate::notify::{LedgerEnvelope, publish};
use crate::store::{LedgerStore, StoreError, bounded};

/// Pre-close check owned by the surrounding application (open orders,
/// staff still clocked in, ...). Returns human-readable pending items; an
/// empty list allows the close.
#[async_trait]
pub trait PendingActivityCheck: Send + Sync {
    async fn pending_activity(&self, session: &CashSession) -> LedgerResult<Vec<String>>;
}

#[derive(Clone)]
pub struct CashSessionManager<S, B> {
    store: S,
    bus: B,
    timeout: Duration,
    pending: Option<Arc<dyn PendingActivityCheck>>,
}

impl<S, B> core::fmt::Debug for CashSessionManager<S, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CashSessionManager")
            .field("timeout", &self.timeout)
            .field("pending_check", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, B> CashSessionManager<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(store: S, bus: B, config: &LedgerConfig) -> Self {
        Self {
            store,
            bus,
            timeout: config.storage_timeout,
            pending: None,
        }
    }

    pub fn with_pending_check(mut self, check: Arc<dyn PendingActivityCheck>) -> Self {
        self.pending = Some(check);
        self
    }

    /// Open a session. Exclusivity is decided by the store's uniqueness rule,
    /// not by a read-then-write check here.
    #[instrument(skip(self, notes), fields(location_id = %location_id, starting_cash = %starting_cash), err)]
    pub async fn open_session(
        &self,
        location_id: MoneyLocationId,
        starting_cash: Decimal,
        acting_user: UserId,
        notes: Option<String>,
    ) -> LedgerResult<CashSession> {
        let location = bounded(self.timeout, "get_location", self.store.get_location(location_id))
            .await?
            .filter(|l| l.is_active)
            .ok_or_else(|| LedgerError::MoneyLocationNotFound(location_id.to_string()))?;
        if !location.requires_session {
            return Err(LedgerError::validation(format!(
                "money location {} does not use cash sessions",
                location.code
            )));
        }

        let session = CashSession::open(
            CashSessionId::new(),
            location_id,
            starting_cash,
            acting_user,
            notes,
            Utc::now(),
        )?;

        bounded(self.timeout, "insert_session", async {
            self.store.insert_session(&session).await.map_err(|err| match err {
                StoreError::UniqueViolation(_) => {
                    StoreError::Rejected(LedgerError::SessionAlreadyOpen(location_id))
                }
                other => other,
            })
        })
        .await?;

        publish(&self.bus, LedgerEvent::CashSessionOpened(CashSessionOpened::from_session(&session)));
        info!(session_id = %session.id, code = %location.code, "cash session opened");
        Ok(session)
    }

    /// Add a cash sale to the location's open session. Without an open
    /// session this logs and returns `Ok(None)`: ledger posting must not
    /// depend on session bookkeeping.
    pub async fn record_sale(&self, location_id: MoneyLocationId, amount: Decimal) -> LedgerResult<Option<CashSession>> {
        self.record(location_id, SessionCounter::Sales, amount).await
    }

    pub async fn record_refund(&self, location_id: MoneyLocationId, amount: Decimal) -> LedgerResult<Option<CashSession>> {
        self.record(location_id, SessionCounter::Refunds, amount).await
    }

    pub async fn record_drop(&self, location_id: MoneyLocationId, amount: Decimal) -> LedgerResult<Option<CashSession>> {
        self.record(location_id, SessionCounter::Drops, amount).await
    }

    async fn record(
        &self,
        location_id: MoneyLocationId,
        counter: SessionCounter,
        amount: Decimal,
    ) -> LedgerResult<Option<CashSession>> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "{} amount must not be negative",
                counter.as_str()
            )));
        }
        let updated = bounded(
            self.timeout,
            "increment_session_counter",
            self.store.increment_session_counter(location_id, counter, amount),
        )
        .await?;
        if updated.is_none() {
            warn!(
                location_id = %location_id,
                counter = counter.as_str(),
                amount = %amount,
                "no open cash session; amount not recorded"
            );
        }
        Ok(updated)
    }

    /// Close with a physical count. Pending activity reported by the
    /// configured check blocks the close.
    #[instrument(skip(self, notes), fields(session_id = %session_id, actual_cash = %actual_cash), err)]
    pub async fn close_session(
        &self,
        session_id: CashSessionId,
        actual_cash: Decimal,
        acting_user: UserId,
        notes: Option<String>,
    ) -> LedgerResult<CashSession> {
        let session = self.get_session(session_id).await?;
        if !session.is_open() {
            return Err(LedgerError::SessionNotOpen(session_id));
        }
        if let Some(check) = &self.pending {
            let pending = check.pending_activity(&session).await?;
            if !pending.is_empty() {
                return Err(LedgerError::PendingActivity(pending));
            }
        }
        self.finish(session_id, actual_cash, acting_user, notes, false).await
    }

    /// Administrative close: skips the pending-activity check, computes the
    /// variance exactly like `close_session`.
    #[instrument(skip(self, notes), fields(session_id = %session_id, actual_cash = %actual_cash), err)]
    pub async fn force_close(
        &self,
        session_id: CashSessionId,
        actual_cash: Decimal,
        acting_user: UserId,
        notes: Option<String>,
    ) -> LedgerResult<CashSession> {
        warn!(acting_user = %acting_user, "force-closing cash session");
        self.finish(session_id, actual_cash, acting_user, notes, true).await
    }

    async fn finish(
        &self,
        session_id: CashSessionId,
        actual_cash: Decimal,
        acting_user: UserId,
        notes: Option<String>,
        forced: bool,
    ) -> LedgerResult<CashSession> {
        let closing = SessionClosing {
            actual_cash,
            closed_by: acting_user,
            notes,
            closed_at: Utc::now(),
            forced,
        };
        let session = bounded(self.timeout, "close_session", self.store.close_session(session_id, closing)).await?;

        if let Some(closed) = CashSessionClosed::from_session(&session) {
            publish(&self.bus, LedgerEvent::CashSessionClosed(closed));
        }
        info!(
            session_id = %session.id,
            status = session.status.as_str(),
            variance = ?session.variance,
            forced,
            "cash session closed"
        );
        Ok(session)
    }

    pub async fn get_active_session(&self, location_id: MoneyLocationId) -> LedgerResult<Option<CashSession>> {
        bounded(self.timeout, "active_session", self.store.active_session(location_id)).await
    }

    pub async fn get_session(&self, session_id: CashSessionId) -> LedgerResult<CashSession> {
        bounded(self.timeout, "get_session", self.store.get_session(session_id))
            .await?
            .ok_or(LedgerError::SessionNotFound(session_id))
    }

    /// Newest first.
    pub async fn list_sessions(&self, location_id: MoneyLocationId, limit: usize) -> LedgerResult<Vec<CashSession>> {
        bounded(self.timeout, "list_sessions", self.store.list_sessions(location_id, limit)).await
    }
}
