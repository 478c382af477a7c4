//! Outbound ledger notifications.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashbook_core::{CashSessionId, JournalEntryId, MoneyLocationId, UserId};
use cashbook_events::Event;

use crate::cash_session::{CashSession, SessionStatus};
use crate::journal::{EntryNumber, EntryType, JournalEntry};

/// Event: JournalEntryCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryCreated {
    pub entry_id: JournalEntryId,
    pub entry_number: EntryNumber,
    pub entry_type: EntryType,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub cash_session_id: Option<CashSessionId>,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

impl JournalEntryCreated {
    pub fn from_entry(entry: &JournalEntry, acting_user: UserId, timestamp: DateTime<Utc>) -> Self {
        Self {
            entry_id: entry.id,
            entry_number: entry.entry_number.clone(),
            entry_type: entry.entry_type,
            reference_id: entry.reference_id.clone(),
            reference_type: entry.reference_type.clone(),
            cash_session_id: entry.cash_session_id,
            acting_user,
            timestamp,
        }
    }
}

/// Event: CashSessionOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSessionOpened {
    pub session_id: CashSessionId,
    pub money_location_id: MoneyLocationId,
    pub starting_cash: Decimal,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

impl CashSessionOpened {
    pub fn from_session(session: &CashSession) -> Self {
        Self {
            session_id: session.id,
            money_location_id: session.money_location_id,
            starting_cash: session.starting_cash,
            acting_user: session.opened_by,
            timestamp: session.opened_at,
        }
    }
}

/// Event: CashSessionClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSessionClosed {
    pub session_id: CashSessionId,
    pub money_location_id: MoneyLocationId,
    pub status: SessionStatus,
    pub expected_cash: Decimal,
    pub actual_cash: Decimal,
    pub variance: Decimal,
    pub forced: bool,
    pub acting_user: UserId,
    pub timestamp: DateTime<Utc>,
}

impl CashSessionClosed {
    /// `None` while the session is still open or its totals do not add up.
    pub fn from_session(session: &CashSession) -> Option<Self> {
        Some(Self {
            session_id: session.id,
            money_location_id: session.money_location_id,
            status: session.status,
            expected_cash: session.cash_in_drawer().ok()?,
            actual_cash: session.actual_cash?,
            variance: session.variance?,
            forced: session.forced,
            acting_user: session.closed_by?,
            timestamp: session.closed_at?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LedgerEvent {
    JournalEntryCreated(JournalEntryCreated),
    CashSessionOpened(CashSessionOpened),
    CashSessionClosed(CashSessionClosed),
}

impl LedgerEvent {
    pub const JOURNAL_ENTRY_CREATED: &'static str = "ledger.journal_entry.created";
    pub const CASH_SESSION_OPENED: &'static str = "ledger.cash_session.opened";
    pub const CASH_SESSION_CLOSED: &'static str = "ledger.cash_session.closed";
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::JournalEntryCreated(_) => Self::JOURNAL_ENTRY_CREATED,
            LedgerEvent::CashSessionOpened(_) => Self::CASH_SESSION_OPENED,
            LedgerEvent::CashSessionClosed(_) => Self::CASH_SESSION_CLOSED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::JournalEntryCreated(e) => e.timestamp,
            LedgerEvent::CashSessionOpened(e) => e.timestamp,
            LedgerEvent::CashSessionClosed(e) => e.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cash_session::SessionClosing;

    #[test]
    fn closed_event_requires_a_closed_session() {
        let mut session = CashSession::open(
            CashSessionId::new(),
            MoneyLocationId::new(),
            Decimal::new(100, 0),
            UserId::new(),
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(CashSessionClosed::from_session(&session).is_none());

        let closer = UserId::new();
        session
            .close(SessionClosing {
                actual_cash: Decimal::new(95, 0),
                closed_by: closer,
                notes: None,
                closed_at: Utc::now(),
                forced: false,
            })
            .unwrap();

        let event = CashSessionClosed::from_session(&session).unwrap();
        assert_eq!(event.variance, Decimal::new(-5, 0));
        assert_eq!(event.expected_cash, Decimal::new(100, 0));
        assert_eq!(event.acting_user, closer);
        assert_eq!(
            LedgerEvent::CashSessionClosed(event).event_type(),
            LedgerEvent::CASH_SESSION_CLOSED
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let session = CashSession::open(
            CashSessionId::new(),
            MoneyLocationId::new(),
            Decimal::new(20, 0),
            UserId::new(),
            None,
            Utc::now(),
        )
        .unwrap();
        let event = LedgerEvent::CashSessionOpened(CashSessionOpened::from_session(&session));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CashSessionOpened");
        assert_eq!(json["data"]["starting_cash"], "20");
    }
}
