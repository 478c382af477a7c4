use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use cashbook_accounting::{EntryType, LedgerError, LedgerResult, NewJournalEntry};
use cashbook_events::{EventBus, EventHandler, HandlerError};

use super::events::{BusinessEvent, CashDropped};
use super::{ensure_positive, located_leg};
use crate::notify::LedgerEnvelope;
use crate::services::LedgerServices;
use crate::store::LedgerStore;

/// Drawer to safe transfer: debit the destination's account, credit the
/// drawer's account, and count the drop against the drawer's session.
#[derive(Debug)]
pub struct CashDropHandler<S, B> {
    ledger: Arc<LedgerServices<S, B>>,
}

impl<S, B> CashDropHandler<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(ledger: Arc<LedgerServices<S, B>>) -> Self {
        Self { ledger }
    }

    async fn on_drop(&self, drop: &CashDropped) -> LedgerResult<()> {
        ensure_positive(drop.amount, "drop amount")?;
        if drop.from_location_id == drop.to_location_id {
            return Err(LedgerError::validation("cash drop source and destination are the same location"));
        }
        let from = located_leg(&self.ledger, drop.from_location_id).await?;
        let to = located_leg(&self.ledger, drop.to_location_id).await?;

        let mut input = NewJournalEntry::new(EntryType::CashDrop)
            .dated(drop.timestamp)
            .reference("cash_drop", drop.drop_id.clone())
            .line(to.line(-drop.amount).described(format!("Drop {} in", drop.drop_id)))
            .line(from.line(drop.amount).described(format!("Drop {} out", drop.drop_id)));
        if let Some(session) = from.session {
            input = input.in_session(session);
        }

        let entry = self.ledger.journal.create_entry(input, drop.acting_user).await?;
        self.ledger.sessions.record_drop(drop.from_location_id, drop.amount).await?;
        info!(drop_id = %drop.drop_id, entry_number = %entry.entry.entry_number, "cash drop posted");
        Ok(())
    }
}

#[async_trait]
impl<S, B> EventHandler<BusinessEvent> for CashDropHandler<S, B>
where
    S: LedgerStore + 'static,
    B: EventBus<LedgerEnvelope> + 'static,
{
    fn name(&self) -> &'static str {
        "cash_drops"
    }

    async fn handle(&self, message: &BusinessEvent) -> Result<(), HandlerError> {
        match message {
            BusinessEvent::CashDropped(drop) => self.on_drop(drop).await.map_err(HandlerError::new),
            _ => Ok(()),
        }
    }
}
