use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use cashbook_accounting::{EntryType, LedgerResult, NewJournalEntry, NewJournalLine};
use cashbook_events::{EventBus, EventHandler, HandlerError};

use super::events::{BusinessEvent, PaymentCompleted};
use super::{ensure_positive, tender_leg};
use crate::notify::LedgerEnvelope;
use crate::services::LedgerServices;
use crate::store::LedgerStore;

/// Customer payment on account: debit the tender, credit receivables.
#[derive(Debug)]
pub struct PaymentHandler<S, B> {
    ledger: Arc<LedgerServices<S, B>>,
}

impl<S, B> PaymentHandler<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(ledger: Arc<LedgerServices<S, B>>) -> Self {
        Self { ledger }
    }

    async fn on_payment(&self, payment: &PaymentCompleted) -> LedgerResult<()> {
        ensure_positive(payment.amount, "payment amount")?;
        let tender = tender_leg(&self.ledger, payment.payment_method, payment.money_location_id).await?;

        let mut input = NewJournalEntry::new(EntryType::Payment)
            .dated(payment.timestamp)
            .reference("payment", payment.payment_id.clone())
            .line(tender.line(-payment.amount).described(format!("Payment {}", payment.payment_id)))
            .line(NewJournalLine::credit(
                self.ledger.mapping.receivables.clone(),
                payment.amount,
            ));
        if let Some(session) = tender.session {
            input = input.in_session(session);
        }

        let entry = self.ledger.journal.create_entry(input, payment.acting_user).await?;
        if let Some(location) = tender.location {
            self.ledger.sessions.record_sale(location, payment.amount).await?;
        }
        info!(payment_id = %payment.payment_id, entry_number = %entry.entry.entry_number, "payment posted");
        Ok(())
    }
}

#[async_trait]
impl<S, B> EventHandler<BusinessEvent> for PaymentHandler<S, B>
where
    S: LedgerStore + 'static,
    B: EventBus<LedgerEnvelope> + 'static,
{
    fn name(&self) -> &'static str {
        "payments"
    }

    async fn handle(&self, message: &BusinessEvent) -> Result<(), HandlerError> {
        match message {
            BusinessEvent::PaymentCompleted(payment) => {
                self.on_payment(payment).await.map_err(HandlerError::new)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use cashbook_core::UserId;

    use crate::handlers::Tender;
    use crate::testing::fixture;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn cash_payment_clears_receivables_and_counts_as_drawer_cash() {
        let fx = fixture().await;
        fx.ledger
            .sessions
            .open_session(fx.drawer.id, dec("0"), UserId::new(), None)
            .await
            .unwrap();
        let handler = PaymentHandler::new(fx.ledger.clone());

        handler
            .handle(&BusinessEvent::PaymentCompleted(PaymentCompleted {
                payment_id: "P-1".into(),
                amount: dec("45.00"),
                payment_method: Tender::Cash,
                money_location_id: Some(fx.drawer.id),
                acting_user: UserId::new(),
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        assert_eq!(fx.balance("1.1.01").await, dec("-45"));
        assert_eq!(fx.balance("1.1.05").await, dec("45"));
        let active = fx.ledger.sessions.get_active_session(fx.drawer.id).await.unwrap().unwrap();
        assert_eq!(active.cash_sales, dec("45"));
    }

    #[tokio::test]
    async fn cash_payment_without_open_session_still_posts() {
        let fx = fixture().await;
        let handler = PaymentHandler::new(fx.ledger.clone());

        handler
            .handle(&BusinessEvent::PaymentCompleted(PaymentCompleted {
                payment_id: "P-2".into(),
                amount: dec("5"),
                payment_method: Tender::Cash,
                money_location_id: Some(fx.drawer.id),
                acting_user: UserId::new(),
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        let entries = fx.ledger.journal.list_entries(&Default::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cash_session_id, None);
    }
}
