use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use cashbook_accounting::{EntryType, LedgerResult, NewJournalEntry, NewJournalLine};
use cashbook_events::{EventBus, EventHandler, HandlerError};

use super::events::{BusinessEvent, PurchaseReceived, SupplierPaid};
use super::{ensure_positive, located_leg};
use crate::notify::LedgerEnvelope;
use crate::services::LedgerServices;
use crate::store::LedgerStore;

/// Goods received on credit: debit inventory, credit payables.
/// Supplier paid: debit payables, credit the paying location's account.
/// Cash paid out of a session drawer is recorded as a drop.
#[derive(Debug)]
pub struct ProcurementHandler<S, B> {
    ledger: Arc<LedgerServices<S, B>>,
}

impl<S, B> ProcurementHandler<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(ledger: Arc<LedgerServices<S, B>>) -> Self {
        Self { ledger }
    }

    async fn on_received(&self, purchase: &PurchaseReceived) -> LedgerResult<()> {
        ensure_positive(purchase.amount, "purchase amount")?;
        let mapping = &self.ledger.mapping;
        let input = NewJournalEntry::new(EntryType::Purchase)
            .dated(purchase.timestamp)
            .reference("purchase", purchase.purchase_id.clone())
            .line(NewJournalLine::debit(mapping.inventory.clone(), purchase.amount))
            .line(NewJournalLine::credit(mapping.payables.clone(), purchase.amount));

        let entry = self.ledger.journal.create_entry(input, purchase.acting_user).await?;
        info!(purchase_id = %purchase.purchase_id, entry_number = %entry.entry.entry_number, "purchase posted");
        Ok(())
    }

    async fn on_paid(&self, payment: &SupplierPaid) -> LedgerResult<()> {
        ensure_positive(payment.amount, "supplier payment amount")?;
        let source = located_leg(&self.ledger, payment.money_location_id).await?;

        let mut input = NewJournalEntry::new(EntryType::Payment)
            .dated(payment.timestamp)
            .reference("supplier_payment", payment.payment_id.clone())
            .line(NewJournalLine::debit(self.ledger.mapping.payables.clone(), payment.amount))
            .line(source.line(payment.amount).described(format!("Supplier payment {}", payment.payment_id)));
        if let Some(purchase_id) = &payment.purchase_id {
            input = input.notes(format!("Settles purchase {purchase_id}"));
        }
        if let Some(session) = source.session {
            input = input.in_session(session);
        }

        let entry = self.ledger.journal.create_entry(input, payment.acting_user).await?;
        if source.session.is_some() {
            self.ledger.sessions.record_drop(payment.money_location_id, payment.amount).await?;
        }
        info!(payment_id = %payment.payment_id, entry_number = %entry.entry.entry_number, "supplier payment posted");
        Ok(())
    }
}

#[async_trait]
impl<S, B> EventHandler<BusinessEvent> for ProcurementHandler<S, B>
where
    S: LedgerStore + 'static,
    B: EventBus<LedgerEnvelope> + 'static,
{
    fn name(&self) -> &'static str {
        "procurement"
    }

    async fn handle(&self, message: &BusinessEvent) -> Result<(), HandlerError> {
        let result = match message {
            BusinessEvent::PurchaseReceived(purchase) => self.on_received(purchase).await,
            BusinessEvent::SupplierPaid(payment) => self.on_paid(payment).await,
            _ => Ok(()),
        };
        result.map_err(HandlerError::new)
    }
}
