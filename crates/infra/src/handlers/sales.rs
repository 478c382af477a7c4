use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use cashbook_accounting::{EntryType, LedgerResult, NewJournalEntry, NewJournalLine};
use cashbook_events::{EventBus, EventHandler, HandlerError};

use super::events::{BusinessEvent, SaleCompleted, SaleRefunded};
use super::tender_leg;
use crate::notify::LedgerEnvelope;
use crate::services::LedgerServices;
use crate::store::LedgerStore;

/// Sale: debit the tender, credit revenue (net) and tax. Refund: the mirror
/// image, with the net amount going to the refunds account.
#[derive(Debug)]
pub struct SalesHandler<S, B> {
    ledger: Arc<LedgerServices<S, B>>,
}

impl<S, B> SalesHandler<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(ledger: Arc<LedgerServices<S, B>>) -> Self {
        Self { ledger }
    }

    async fn on_sale(&self, sale: &SaleCompleted) -> LedgerResult<()> {
        let gross = sale.gross()?;
        let mapping = &self.ledger.mapping;
        let tender = tender_leg(&self.ledger, sale.tender, sale.money_location_id).await?;

        let mut input = NewJournalEntry::new(EntryType::Sale)
            .dated(sale.timestamp)
            .reference("sale", sale.sale_id.clone())
            .line(tender.line(-gross).described(format!("Sale {}", sale.sale_id)))
            .line(NewJournalLine::credit(mapping.revenue.clone(), sale.net_amount));
        if !sale.tax_amount.is_zero() {
            input = input.line(NewJournalLine::credit(mapping.tax.clone(), sale.tax_amount));
        }
        if let Some(session) = tender.session {
            input = input.in_session(session);
        }

        let entry = self.ledger.journal.create_entry(input, sale.acting_user).await?;
        if let Some(location) = tender.location {
            self.ledger.sessions.record_sale(location, gross).await?;
        }
        info!(sale_id = %sale.sale_id, entry_number = %entry.entry.entry_number, "sale posted");
        Ok(())
    }

    async fn on_refund(&self, refund: &SaleRefunded) -> LedgerResult<()> {
        let gross = refund.gross()?;
        let mapping = &self.ledger.mapping;
        let tender = tender_leg(&self.ledger, refund.tender, refund.money_location_id).await?;

        let mut input = NewJournalEntry::new(EntryType::Refund)
            .dated(refund.timestamp)
            .reference("refund", refund.refund_id.clone())
            .notes(format!("Refund of sale {}", refund.sale_id))
            .line(tender.line(gross).described(format!("Refund {}", refund.refund_id)))
            .line(NewJournalLine::debit(mapping.refunds.clone(), refund.net_amount));
        if !refund.tax_amount.is_zero() {
            input = input.line(NewJournalLine::debit(mapping.tax.clone(), refund.tax_amount));
        }
        if let Some(session) = tender.session {
            input = input.in_session(session);
        }

        let entry = self.ledger.journal.create_entry(input, refund.acting_user).await?;
        if let Some(location) = tender.location {
            self.ledger.sessions.record_refund(location, gross).await?;
        }
        info!(refund_id = %refund.refund_id, entry_number = %entry.entry.entry_number, "refund posted");
        Ok(())
    }
}

#[async_trait]
impl<S, B> EventHandler<BusinessEvent> for SalesHandler<S, B>
where
    S: LedgerStore + 'static,
    B: EventBus<LedgerEnvelope> + 'static,
{
    fn name(&self) -> &'static str {
        "sales"
    }

    async fn handle(&self, message: &BusinessEvent) -> Result<(), HandlerError> {
        let result = match message {
            BusinessEvent::SaleCompleted(sale) => self.on_sale(sale).await,
            BusinessEvent::SaleRefunded(refund) => self.on_refund(refund).await,
            _ => Ok(()),
        };
        result.map_err(HandlerError::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use cashbook_accounting::SessionStatus;
    use cashbook_core::UserId;

    use crate::handlers::Tender;
    use crate::testing::{Fixture, fixture};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn sale(tender: Tender, fixture: &Fixture) -> SaleCompleted {
        SaleCompleted {
            sale_id: "S-100".into(),
            net_amount: dec("826.45"),
            tax_amount: dec("173.55"),
            tender,
            money_location_id: Some(fixture.drawer.id),
            acting_user: UserId::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cash_sale_posts_to_the_drawer_and_its_session() {
        let fx = fixture().await;
        let session = fx
            .ledger
            .sessions
            .open_session(fx.drawer.id, dec("200"), UserId::new(), None)
            .await
            .unwrap();
        let handler = SalesHandler::new(fx.ledger.clone());

        handler
            .handle(&BusinessEvent::SaleCompleted(sale(Tender::Cash, &fx)))
            .await
            .unwrap();

        let entries = fx.ledger.journal.list_entries(&Default::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cash_session_id, Some(session.id));
        assert_eq!(fx.balance("1.1.01").await, dec("-1000"));
        assert_eq!(fx.balance("4.1.01").await, dec("826.45"));
        assert_eq!(fx.balance("2.1.02").await, dec("173.55"));

        let active = fx.ledger.sessions.get_active_session(fx.drawer.id).await.unwrap().unwrap();
        assert_eq!(active.cash_sales, dec("1000"));
        assert_eq!(active.status, SessionStatus::Open);
    }

    #[tokio::test]
    async fn card_sale_settles_through_clearing_without_touching_sessions() {
        let fx = fixture().await;
        let handler = SalesHandler::new(fx.ledger.clone());

        handler
            .handle(&BusinessEvent::SaleCompleted(sale(Tender::Card, &fx)))
            .await
            .unwrap();

        assert_eq!(fx.balance("1.1.04").await, dec("-1000"));
        assert_eq!(fx.balance("1.1.01").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn cash_refund_mirrors_the_sale() {
        let fx = fixture().await;
        fx.ledger
            .sessions
            .open_session(fx.drawer.id, dec("50"), UserId::new(), None)
            .await
            .unwrap();
        let handler = SalesHandler::new(fx.ledger.clone());

        handler
            .handle(&BusinessEvent::SaleRefunded(SaleRefunded {
                refund_id: "R-1".into(),
                sale_id: "S-99".into(),
                net_amount: dec("10"),
                tax_amount: dec("2.10"),
                tender: Tender::Cash,
                money_location_id: Some(fx.drawer.id),
                acting_user: UserId::new(),
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        assert_eq!(fx.balance("1.1.01").await, dec("12.10"));
        assert_eq!(fx.balance("4.1.02").await, dec("-10"));
        assert_eq!(fx.balance("2.1.02").await, dec("-2.10"));
        let active = fx.ledger.sessions.get_active_session(fx.drawer.id).await.unwrap().unwrap();
        assert_eq!(active.cash_refunds, dec("12.10"));
    }

    #[tokio::test]
    async fn zero_total_is_refused_and_nothing_posts() {
        let fx = fixture().await;
        let handler = SalesHandler::new(fx.ledger.clone());
        let mut empty = sale(Tender::Cash, &fx);
        empty.net_amount = Decimal::ZERO;
        empty.tax_amount = Decimal::ZERO;

        assert!(handler.handle(&BusinessEvent::SaleCompleted(empty)).await.is_err());
        assert!(fx.ledger.journal.list_entries(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn negative_net_is_refused_even_when_tax_makes_the_total_positive() {
        let fx = fixture().await;
        let handler = SalesHandler::new(fx.ledger.clone());
        let mut skewed = sale(Tender::Card, &fx);
        skewed.net_amount = dec("-10");
        skewed.tax_amount = dec("25");

        let err = handler.handle(&BusinessEvent::SaleCompleted(skewed)).await.unwrap_err();
        assert!(err.to_string().contains("net amount must be positive"), "{err}");

        let mut negative_tax = sale(Tender::Card, &fx);
        negative_tax.tax_amount = dec("-1");
        assert!(handler.handle(&BusinessEvent::SaleCompleted(negative_tax)).await.is_err());

        assert!(fx.ledger.journal.list_entries(&Default::default()).await.unwrap().is_empty());
        assert_eq!(fx.balance("4.1.01").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn oversized_amounts_are_refused_without_panicking() {
        let fx = fixture().await;
        let handler = SalesHandler::new(fx.ledger.clone());
        let mut huge = sale(Tender::Cash, &fx);
        huge.net_amount = Decimal::MAX;
        huge.tax_amount = Decimal::ONE;
        let err = handler.handle(&BusinessEvent::SaleCompleted(huge)).await.unwrap_err();
        assert!(err.to_string().contains("sale total overflow"), "{err}");

        let refund = SaleRefunded {
            refund_id: "R-2".into(),
            sale_id: "S-1".into(),
            net_amount: Decimal::MAX,
            tax_amount: Decimal::ONE,
            tender: Tender::Card,
            money_location_id: None,
            acting_user: UserId::new(),
            timestamp: Utc::now(),
        };
        assert!(handler.handle(&BusinessEvent::SaleRefunded(refund)).await.is_err());

        assert!(fx.ledger.journal.list_entries(&Default::default()).await.unwrap().is_empty());
    }
}
