//! Cash-drawer session state machine.
//!
//! `NONE -> OPEN -> {CLOSED | DISCREPANCY}`. Both closed states are terminal;
//! a new session starts a fresh cycle. At most one session per location may be
//! open at a time; that rule is enforced by the store, not here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashbook_core::{CashSessionId, DomainError, Entity, MoneyLocationId, UserId};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Closed,
    /// Counted cash differed from the expected amount. Informational, not an error.
    Discrepancy,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Open => "OPEN",
            SessionStatus::Closed => "CLOSED",
            SessionStatus::Discrepancy => "DISCREPANCY",
        }
    }
}

impl core::str::FromStr for SessionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(SessionStatus::Open),
            "CLOSED" => Ok(SessionStatus::Closed),
            "DISCREPANCY" => Ok(SessionStatus::Discrepancy),
            other => Err(DomainError::validation(format!("unknown session status '{other}'"))),
        }
    }
}

/// Running total touched by `record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCounter {
    Sales,
    Refunds,
    Drops,
}

impl SessionCounter {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionCounter::Sales => "cash_sales",
            SessionCounter::Refunds => "cash_refunds",
            SessionCounter::Drops => "cash_drops",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSession {
    pub id: CashSessionId,
    pub money_location_id: MoneyLocationId,
    pub opened_at: DateTime<Utc>,
    pub opened_by: UserId,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
    pub starting_cash: Decimal,
    pub cash_sales: Decimal,
    pub cash_refunds: Decimal,
    pub cash_drops: Decimal,
    pub status: SessionStatus,
    pub opening_notes: Option<String>,
    pub closing_notes: Option<String>,
    pub actual_cash: Option<Decimal>,
    pub variance: Option<Decimal>,
    /// Closed through the administrative path that skips pending-activity checks.
    pub forced: bool,
}

impl Entity for CashSession {
    type Id = CashSessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Close request: the physical count plus who closed and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClosing {
    pub actual_cash: Decimal,
    pub closed_by: UserId,
    pub notes: Option<String>,
    pub closed_at: DateTime<Utc>,
    pub forced: bool,
}

impl CashSession {
    pub fn open(
        id: CashSessionId,
        money_location_id: MoneyLocationId,
        starting_cash: Decimal,
        opened_by: UserId,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if starting_cash < Decimal::ZERO {
            return Err(LedgerError::validation("starting cash must not be negative"));
        }
        Ok(Self {
            id,
            money_location_id,
            opened_at: now,
            opened_by,
            closed_at: None,
            closed_by: None,
            starting_cash,
            cash_sales: Decimal::ZERO,
            cash_refunds: Decimal::ZERO,
            cash_drops: Decimal::ZERO,
            status: SessionStatus::Open,
            opening_notes: notes,
            closing_notes: None,
            actual_cash: None,
            variance: None,
            forced: false,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    /// `starting_cash + cash_sales - cash_refunds - cash_drops`.
    pub fn cash_in_drawer(&self) -> LedgerResult<Decimal> {
        drawer_total(self.starting_cash, self.cash_sales, self.cash_refunds, self.cash_drops)
    }

    pub fn record(&mut self, counter: SessionCounter, amount: Decimal) -> LedgerResult<()> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "{} amount must not be negative",
                counter.as_str()
            )));
        }
        if !self.is_open() {
            return Err(LedgerError::SessionNotOpen(self.id));
        }
        let mut next = self.clone();
        let total = match counter {
            SessionCounter::Sales => &mut next.cash_sales,
            SessionCounter::Refunds => &mut next.cash_refunds,
            SessionCounter::Drops => &mut next.cash_drops,
        };
        *total = total.checked_add(amount).ok_or_else(overflow)?;
        // The drawer total must stay representable so close can always run.
        next.cash_in_drawer()?;
        *self = next;
        Ok(())
    }

    /// Compute variance and move to CLOSED (zero variance) or DISCREPANCY.
    pub fn close(&mut self, closing: SessionClosing) -> LedgerResult<()> {
        if !self.is_open() {
            return Err(LedgerError::SessionNotOpen(self.id));
        }
        if closing.actual_cash < Decimal::ZERO {
            return Err(LedgerError::validation("counted cash must not be negative"));
        }

        let variance = closing
            .actual_cash
            .checked_sub(self.cash_in_drawer()?)
            .ok_or_else(overflow)?;
        self.status = if variance.is_zero() {
            SessionStatus::Closed
        } else {
            SessionStatus::Discrepancy
        };
        self.actual_cash = Some(closing.actual_cash);
        self.variance = Some(variance);
        self.closed_at = Some(closing.closed_at);
        self.closed_by = Some(closing.closed_by);
        self.closing_notes = closing.notes;
        self.forced = closing.forced;
        Ok(())
    }
}

fn overflow() -> LedgerError {
    LedgerError::validation("session total overflow")
}

fn drawer_total(starting: Decimal, sales: Decimal, refunds: Decimal, drops: Decimal) -> LedgerResult<Decimal> {
    let outflow = refunds.checked_add(drops).ok_or_else(overflow)?;
    starting
        .checked_add(sales)
        .and_then(|inflow| inflow.checked_sub(outflow))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn session(starting: i64) -> CashSession {
        CashSession::open(
            CashSessionId::new(),
            MoneyLocationId::new(),
            Decimal::new(starting, 0),
            UserId::new(),
            None,
            Utc::now(),
        )
        .unwrap()
    }

    fn closing(actual: Decimal) -> SessionClosing {
        SessionClosing {
            actual_cash: actual,
            closed_by: UserId::new(),
            notes: Some("end of shift".into()),
            closed_at: Utc::now(),
            forced: false,
        }
    }

    fn with_three_sales() -> CashSession {
        let mut s = session(200);
        for amount in [50, 75, 25] {
            s.record(SessionCounter::Sales, Decimal::new(amount, 0)).unwrap();
        }
        s
    }

    #[test]
    fn exact_count_closes_cleanly() {
        let mut s = with_three_sales();
        assert_eq!(s.cash_in_drawer().unwrap(), Decimal::new(350, 0));

        s.close(closing(Decimal::new(350, 0))).unwrap();

        assert_eq!(s.status, SessionStatus::Closed);
        assert_eq!(s.variance, Some(Decimal::ZERO));
        assert_eq!(s.closing_notes.as_deref(), Some("end of shift"));
    }

    #[test]
    fn short_count_is_a_discrepancy() {
        let mut s = with_three_sales();
        s.close(closing(Decimal::new(340, 0))).unwrap();

        assert_eq!(s.status, SessionStatus::Discrepancy);
        assert_eq!(s.variance, Some(Decimal::new(-10, 0)));
        assert_eq!(s.actual_cash, Some(Decimal::new(340, 0)));
    }

    #[test]
    fn refunds_and_drops_reduce_expected_cash() {
        let mut s = session(100);
        s.record(SessionCounter::Sales, Decimal::new(80, 0)).unwrap();
        s.record(SessionCounter::Refunds, Decimal::new(15, 0)).unwrap();
        s.record(SessionCounter::Drops, Decimal::new(50, 0)).unwrap();
        assert_eq!(s.cash_in_drawer().unwrap(), Decimal::new(115, 0));
    }

    #[test]
    fn drawer_total_overflow_is_rejected_not_panicking() {
        let mut s = CashSession::open(
            CashSessionId::new(),
            MoneyLocationId::new(),
            Decimal::MAX,
            UserId::new(),
            None,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(
            s.record(SessionCounter::Sales, Decimal::ONE),
            Err(LedgerError::validation("session total overflow"))
        );
        assert_eq!(s.cash_sales, Decimal::ZERO);

        s.record(SessionCounter::Drops, Decimal::ONE).unwrap();
        s.record(SessionCounter::Sales, Decimal::ONE).unwrap();
        assert_eq!(s.cash_in_drawer().unwrap(), Decimal::MAX);
    }

    #[test]
    fn unrepresentable_variance_keeps_the_session_open() {
        let mut s = session(0);
        s.record(SessionCounter::Refunds, Decimal::ONE).unwrap();

        assert!(matches!(s.close(closing(Decimal::MAX)), Err(LedgerError::Validation(_))));
        assert!(s.is_open());
        s.close(closing(Decimal::ZERO)).unwrap();
        assert_eq!(s.variance, Some(Decimal::ONE));
    }

    #[test]
    fn closed_session_rejects_further_activity() {
        let mut s = session(0);
        s.close(closing(Decimal::ZERO)).unwrap();

        assert_eq!(s.close(closing(Decimal::ZERO)), Err(LedgerError::SessionNotOpen(s.id)));
        assert_eq!(
            s.record(SessionCounter::Sales, Decimal::ONE),
            Err(LedgerError::SessionNotOpen(s.id))
        );
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let mut s = session(10);
        assert!(matches!(
            s.record(SessionCounter::Sales, Decimal::new(-1, 0)),
            Err(LedgerError::Validation(_))
        ));
        assert!(CashSession::open(
            CashSessionId::new(),
            MoneyLocationId::new(),
            Decimal::new(-1, 0),
            UserId::new(),
            None,
            Utc::now(),
        )
        .is_err());
    }

    #[test]
    fn forced_close_computes_variance_the_same_way() {
        let mut s = with_three_sales();
        s.close(SessionClosing {
            forced: true,
            ..closing(Decimal::new(360, 0))
        })
        .unwrap();
        assert!(s.forced);
        assert_eq!(s.variance, Some(Decimal::new(10, 0)));
        assert_eq!(s.status, SessionStatus::Discrepancy);
    }

    fn cents() -> impl Strategy<Value = Decimal> {
        (0i64..5_000_000i64).prop_map(|c| Decimal::new(c, 2))
    }

    proptest! {
        /// Property: CLOSED iff the count equals the expected drawer cash, and
        /// variance is always `actual - expected`.
        #[test]
        fn reconciliation_matches_formula(
            starting in cents(),
            sales in prop::collection::vec(cents(), 0..10),
            refunds in prop::collection::vec(cents(), 0..5),
            drops in prop::collection::vec(cents(), 0..5),
            actual in cents(),
        ) {
            let mut s = CashSession::open(
                CashSessionId::new(),
                MoneyLocationId::new(),
                starting,
                UserId::new(),
                None,
                Utc::now(),
            ).unwrap();
            for a in &sales { s.record(SessionCounter::Sales, *a).unwrap(); }
            for a in &refunds { s.record(SessionCounter::Refunds, *a).unwrap(); }
            for a in &drops { s.record(SessionCounter::Drops, *a).unwrap(); }

            let expected = starting + sales.iter().copied().sum::<Decimal>()
                - refunds.iter().copied().sum::<Decimal>()
                - drops.iter().copied().sum::<Decimal>();
            prop_assume!(actual >= Decimal::ZERO);

            s.close(closing(actual)).unwrap();

            prop_assert_eq!(s.variance, Some(actual - expected));
            if actual == expected {
                prop_assert_eq!(s.status, SessionStatus::Closed);
            } else {
                prop_assert_eq!(s.status, SessionStatus::Discrepancy);
            }
        }

        /// Property: recording the exact expected amount always closes cleanly.
        #[test]
        fn exact_count_is_never_a_discrepancy(
            starting in cents(),
            sales in prop::collection::vec(cents(), 0..10),
        ) {
            let mut s = CashSession::open(
                CashSessionId::new(),
                MoneyLocationId::new(),
                starting,
                UserId::new(),
                None,
                Utc::now(),
            ).unwrap();
            for a in &sales { s.record(SessionCounter::Sales, *a).unwrap(); }
            let expected = s.cash_in_drawer().unwrap();
            s.close(closing(expected)).unwrap();
            prop_assert_eq!(s.status, SessionStatus::Closed);
        }
    }
}
