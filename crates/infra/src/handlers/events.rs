//! Business events raised by the surrounding application.
//!
//! One typed payload per event; the handler registry routes on
//! `Event::event_type()`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashbook_accounting::{LedgerError, LedgerResult};
use cashbook_core::{MoneyLocationId, UserId};
use cashbook_events::Event;

/// How the customer (or we) paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tender {
    Cash,
    Card,
    /// Bank transfer, wallet, voucher: anything settled through clearing.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCompleted {
    pub sale_id: String,
    pub net_amount: Decimal,
    pub tax_amount: Decimal,
    pub tender: Tender,
    /// Drawer that took the cash. Required for cash tender to touch a session.
    pub money_location_id: Option<MoneyLocationId>,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

impl SaleCompleted {
    /// Net plus tax. Net must be positive and tax non-negative.
    pub fn gross(&self) -> LedgerResult<Decimal> {
        gross("sale", self.net_amount, self.tax_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRefunded {
    pub refund_id: String,
    pub sale_id: String,
    pub net_amount: Decimal,
    pub tax_amount: Decimal,
    pub tender: Tender,
    pub money_location_id: Option<MoneyLocationId>,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

impl SaleRefunded {
    pub fn gross(&self) -> LedgerResult<Decimal> {
        gross("refund", self.net_amount, self.tax_amount)
    }
}

fn gross(what: &str, net: Decimal, tax: Decimal) -> LedgerResult<Decimal> {
    if net <= Decimal::ZERO {
        return Err(LedgerError::validation(format!("{what} net amount must be positive")));
    }
    if tax < Decimal::ZERO {
        return Err(LedgerError::validation(format!("{what} tax amount must not be negative")));
    }
    net.checked_add(tax)
        .ok_or_else(|| LedgerError::validation(format!("{what} total overflow")))
}

/// Customer settled an open receivable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub payment_id: String,
    pub amount: Decimal,
    pub payment_method: Tender,
    pub money_location_id: Option<MoneyLocationId>,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceived {
    pub purchase_id: String,
    pub amount: Decimal,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

/// A supplier was paid out of a money location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPaid {
    pub payment_id: String,
    pub purchase_id: Option<String>,
    pub amount: Decimal,
    pub money_location_id: MoneyLocationId,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

/// Cash moved from a drawer to a safe (or any other location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashDropped {
    pub drop_id: String,
    pub from_location_id: MoneyLocationId,
    pub to_location_id: MoneyLocationId,
    pub amount: Decimal,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BusinessEvent {
    SaleCompleted(SaleCompleted),
    SaleRefunded(SaleRefunded),
    PaymentCompleted(PaymentCompleted),
    PurchaseReceived(PurchaseReceived),
    SupplierPaid(SupplierPaid),
    CashDropped(CashDropped),
}

impl BusinessEvent {
    pub const SALE_COMPLETED: &'static str = "sales.sale_completed";
    pub const SALE_REFUNDED: &'static str = "sales.sale_refunded";
    pub const PAYMENT_COMPLETED: &'static str = "payments.payment_completed";
    pub const PURCHASE_RECEIVED: &'static str = "procurement.purchase_received";
    pub const SUPPLIER_PAID: &'static str = "procurement.supplier_paid";
    pub const CASH_DROPPED: &'static str = "cash.cash_dropped";

    pub fn acting_user(&self) -> UserId {
        match self {
            BusinessEvent::SaleCompleted(e) => e.acting_user,
            BusinessEvent::SaleRefunded(e) => e.acting_user,
            BusinessEvent::PaymentCompleted(e) => e.acting_user,
            BusinessEvent::PurchaseReceived(e) => e.acting_user,
            BusinessEvent::SupplierPaid(e) => e.acting_user,
            BusinessEvent::CashDropped(e) => e.acting_user,
        }
    }

    /// Attribute the event to `user`, whatever the payload claimed.
    pub fn with_acting_user(mut self, user: UserId) -> Self {
        let slot = match &mut self {
            BusinessEvent::SaleCompleted(e) => &mut e.acting_user,
            BusinessEvent::SaleRefunded(e) => &mut e.acting_user,
            BusinessEvent::PaymentCompleted(e) => &mut e.acting_user,
            BusinessEvent::PurchaseReceived(e) => &mut e.acting_user,
            BusinessEvent::SupplierPaid(e) => &mut e.acting_user,
            BusinessEvent::CashDropped(e) => &mut e.acting_user,
        };
        *slot = user;
        self
    }
}

impl Event for BusinessEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BusinessEvent::SaleCompleted(_) => Self::SALE_COMPLETED,
            BusinessEvent::SaleRefunded(_) => Self::SALE_REFUNDED,
            BusinessEvent::PaymentCompleted(_) => Self::PAYMENT_COMPLETED,
            BusinessEvent::PurchaseReceived(_) => Self::PURCHASE_RECEIVED,
            BusinessEvent::SupplierPaid(_) => Self::SUPPLIER_PAID,
            BusinessEvent::CashDropped(_) => Self::CASH_DROPPED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BusinessEvent::SaleCompleted(e) => e.timestamp,
            BusinessEvent::SaleRefunded(e) => e.timestamp,
            BusinessEvent::PaymentCompleted(e) => e.timestamp,
            BusinessEvent::PurchaseReceived(e) => e.timestamp,
            BusinessEvent::SupplierPaid(e) => e.timestamp,
            BusinessEvent::CashDropped(e) => e.timestamp,
        }
    }
}
