//! Domain event handlers: translate business events into balanced journal
//! entries and session bookkeeping.
//!
//! Handlers sit outside the ledger core and only use its public services.
//! Which account code means "cash" or "revenue" comes from `AccountMapping`.
//! A failed accounting step is reported to the registry (which logs it); the
//! originating business action is never undone here.

pub mod cash_drops;
pub mod events;
pub mod payments;
pub mod procurement;
pub mod sales;

use std::sync::Arc;

use rust_decimal::Decimal;

use cashbook_accounting::{LedgerError, LedgerResult, NewJournalLine};
use cashbook_core::{CashSessionId, MoneyLocationId};
use cashbook_events::{EventBus, HandlerRegistry};

use crate::notify::LedgerEnvelope;
use crate::services::LedgerServices;
use crate::store::LedgerStore;

pub use cash_drops::CashDropHandler;
pub use events::{
    BusinessEvent, CashDropped, PaymentCompleted, PurchaseReceived, SaleCompleted, SaleRefunded,
    SupplierPaid, Tender,
};
pub use payments::PaymentHandler;
pub use procurement::ProcurementHandler;
pub use sales::SalesHandler;

/// Wire the sales, payment, procurement and cash-drop handlers.
pub fn register_default_handlers<S, B>(
    registry: &mut HandlerRegistry<BusinessEvent>,
    ledger: Arc<LedgerServices<S, B>>,
) where
    S: LedgerStore + 'static,
    B: EventBus<LedgerEnvelope> + 'static,
{
    let sales = Arc::new(SalesHandler::new(ledger.clone()));
    let payments = Arc::new(PaymentHandler::new(ledger.clone()));
    let procurement = Arc::new(ProcurementHandler::new(ledger.clone()));
    let drops = Arc::new(CashDropHandler::new(ledger));

    registry
        .register(BusinessEvent::SALE_COMPLETED, sales.clone())
        .register(BusinessEvent::SALE_REFUNDED, sales)
        .register(BusinessEvent::PAYMENT_COMPLETED, payments)
        .register(BusinessEvent::PURCHASE_RECEIVED, procurement.clone())
        .register(BusinessEvent::SUPPLIER_PAID, procurement)
        .register(BusinessEvent::CASH_DROPPED, drops);
}

fn ensure_positive(amount: Decimal, what: &str) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation(format!("{what} must be positive")));
    }
    Ok(())
}

/// The side of an entry where the money physically moved.
#[derive(Debug, Clone)]
struct TenderLeg {
    account_code: String,
    /// Set when the money went through a tracked location.
    location: Option<MoneyLocationId>,
    /// Open session at that location, if any.
    session: Option<CashSessionId>,
}

impl TenderLeg {
    /// `amount` is signed (negative = debit).
    fn line(&self, amount: Decimal) -> NewJournalLine {
        let line = NewJournalLine::new(self.account_code.clone(), amount);
        match self.location {
            Some(location) => line.at_location(location),
            None => line,
        }
    }
}

/// Cash through a location posts to that location's account and its open
/// session; cash without a location uses the mapped cash account; everything
/// else settles through card clearing.
async fn tender_leg<S, B>(
    ledger: &LedgerServices<S, B>,
    tender: Tender,
    location: Option<MoneyLocationId>,
) -> LedgerResult<TenderLeg>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    match (tender, location) {
        (Tender::Cash, Some(location)) => located_leg(ledger, location).await,
        (Tender::Cash, None) => Ok(TenderLeg {
            account_code: ledger.mapping.cash.clone(),
            location: None,
            session: None,
        }),
        (Tender::Card | Tender::Other, _) => Ok(TenderLeg {
            account_code: ledger.mapping.card_clearing.clone(),
            location: None,
            session: None,
        }),
    }
}

async fn located_leg<S, B>(ledger: &LedgerServices<S, B>, location: MoneyLocationId) -> LedgerResult<TenderLeg>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    let account = ledger.locations.bound_account(location).await?;
    let session = ledger.sessions.get_active_session(location).await?;
    Ok(TenderLeg {
        account_code: account.code.to_string(),
        location: Some(location),
        session: session.map(|s| s.id),
    })
}
