//! Integration tests for the full ledger pipeline.
//!
//! Tests: handlers / services → LedgerStore → notifications
//!
//! Verifies:
//! - Entries balance exactly and rejected entries leave no trace
//! - Balances follow posted lines, bounded by `as_of`
//! - Session exclusivity and reconciliation
//! - Timeouts and movement failures behave as documented

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use cashbook_accounting::{
        AccountPatch, EntryFilter, EntryType, LedgerError, LedgerEvent, NewJournalEntry, NewJournalLine,
        SessionStatus,
    };
    use cashbook_core::UserId;
    use cashbook_events::{EventBus, HandlerRegistry};

    use crate::config::LedgerConfig;
    use crate::handlers::{BusinessEvent, SaleCompleted, Tender, register_default_handlers};
    use crate::store::{FailPoint, InMemoryLedgerStore, LedgerStore};
    use crate::testing::{fixture, fixture_with};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn user() -> UserId {
        UserId::new()
    }

    #[tokio::test]
    async fn scenario_a_sale_with_tax_posts_exact_balances() {
        let fx = fixture().await;
        let entry = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Sale)
                    .line(NewJournalLine::new("1.1.01", dec("-1000")))
                    .line(NewJournalLine::new("4.1.01", dec("826.45")))
                    .line(NewJournalLine::new("2.1.02", dec("173.55"))),
                user(),
            )
            .await
            .unwrap();

        assert_eq!(entry.total().unwrap(), Decimal::ZERO);
        assert_eq!(fx.balance("1.1.01").await, dec("-1000"));
        assert_eq!(fx.balance("4.1.01").await, dec("826.45"));
        assert_eq!(fx.balance("2.1.02").await, dec("173.55"));
    }

    #[tokio::test]
    async fn scenario_b_and_c_session_reconciliation() {
        let fx = fixture().await;
        let sessions = &fx.ledger.sessions;

        for (actual, status, variance) in [
            ("350", SessionStatus::Closed, "0"),
            ("340", SessionStatus::Discrepancy, "-10"),
        ] {
            let session = sessions
                .open_session(fx.drawer.id, dec("200"), user(), None)
                .await
                .unwrap();
            for amount in ["50", "75", "25"] {
                sessions.record_sale(fx.drawer.id, dec(amount)).await.unwrap();
            }
            let closed = sessions
                .close_session(session.id, dec(actual), user(), None)
                .await
                .unwrap();
            assert_eq!(closed.status, status);
            assert_eq!(closed.variance, Some(dec(variance)));
        }
    }

    #[tokio::test]
    async fn scenario_d_rounding_drift_is_rejected() {
        let fx = fixture().await;
        let err = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Sale)
                    .line(NewJournalLine::new("1.1.01", dec("-100.00")))
                    .line(NewJournalLine::new("4.1.01", dec("86.96")))
                    .line(NewJournalLine::new("2.1.02", dec("13.05"))),
                user(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ImbalancedEntry { sum: dec("0.01") });
        assert_eq!(fx.store.entry_count(), 0);
    }

    #[tokio::test]
    async fn rejected_entries_leave_no_trace() {
        let fx = fixture().await;
        let notifications = fx.bus.subscribe();
        let journal = &fx.ledger.journal;

        let cases = [
            NewJournalEntry::new(EntryType::Adjustment),
            NewJournalEntry::new(EntryType::Adjustment).line(NewJournalLine::new("1.1.01", dec("0"))),
            NewJournalEntry::new(EntryType::Adjustment)
                .line(NewJournalLine::new("1.1.01", dec("-5")))
                .line(NewJournalLine::new("4.1.01", dec("4"))),
            // group account
            NewJournalEntry::new(EntryType::Adjustment)
                .line(NewJournalLine::new("1.1", dec("-5")))
                .line(NewJournalLine::new("4.1.01", dec("5"))),
        ];
        for input in cases {
            let err = journal.create_entry(input, user()).await.unwrap_err();
            assert!(err.is_validation(), "{err:?}");
        }

        assert_eq!(fx.store.entry_count(), 0);
        assert_eq!(fx.store.line_count(), 0);
        assert!(journal.list_entries(&EntryFilter::default()).await.unwrap().is_empty());
        assert!(notifications.drain().is_empty());
    }

    #[tokio::test]
    async fn group_account_is_refused_with_group_account_error() {
        let fx = fixture().await;
        let err = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Expense)
                    .line(NewJournalLine::new("4.1.01", dec("-5")))
                    .line(NewJournalLine::new("2", dec("5"))),
                user(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::GroupAccount("2".into()));
        assert_eq!(fx.store.entry_count(), 0);
    }

    #[tokio::test]
    async fn parent_group_cannot_be_demoted_into_a_postable_leaf() {
        let fx = fixture().await;
        let liabilities = fx.ledger.accounts.get_account("2").await.unwrap();
        let err = fx
            .ledger
            .accounts
            .update_account(
                liabilities.id,
                AccountPatch {
                    is_group: Some(false),
                    allow_transactions: Some(true),
                    ..AccountPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{err:?}");

        let still_group = fx.ledger.accounts.get_account("2").await.unwrap();
        assert!(still_group.is_group);
        assert!(!still_group.allow_transactions);

        let err = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Expense)
                    .line(NewJournalLine::new("4.1.01", dec("-5")))
                    .line(NewJournalLine::new("2", dec("5"))),
                user(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::GroupAccount("2".into()));
        assert_eq!(fx.store.entry_count(), 0);
    }

    #[tokio::test]
    async fn deactivated_account_is_treated_as_missing() {
        let fx = fixture().await;
        let tax = fx.ledger.accounts.get_account("2.1.02").await.unwrap();
        fx.ledger.accounts.deactivate_account(tax.id).await.unwrap();

        let err = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Sale)
                    .line(NewJournalLine::new("1.1.01", dec("-1")))
                    .line(NewJournalLine::new("2.1.02", dec("1"))),
                user(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound("2.1.02".into()));
    }

    #[tokio::test]
    async fn round_trip_returns_the_requested_lines() {
        let fx = fixture().await;
        let input = NewJournalEntry::new(EntryType::Transfer)
            .line(NewJournalLine::new("1.1.02", dec("-30.10")).described("to safe"))
            .line(NewJournalLine::new("1.1.01", dec("12.05")))
            .line(NewJournalLine::new("1.1.04", dec("18.05")))
            .reference("transfer", "T-9")
            .notes("end of day");
        let created = fx.ledger.journal.create_entry(input.clone(), user()).await.unwrap();
        let fetched = fx.ledger.journal.get_entry(created.entry.id).await.unwrap();

        let want: HashSet<(String, Decimal, Option<String>)> = input
            .lines
            .iter()
            .map(|l| (l.account_code.clone(), l.amount, l.description.clone()))
            .collect();
        let got: HashSet<(String, Decimal, Option<String>)> = fetched
            .lines
            .iter()
            .map(|l| (l.account_code.to_string(), l.amount, l.description.clone()))
            .collect();
        assert_eq!(got, want);
        assert_eq!(fetched.entry.reference_id.as_deref(), Some("T-9"));
        assert_eq!(fetched.entry.notes.as_deref(), Some("end of day"));
    }

    #[tokio::test]
    async fn balance_as_of_excludes_later_entries() {
        let fx = fixture().await;
        let journal = &fx.ledger.journal;
        let jan = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();

        for (when, amount) in [(jan, "100"), (mar, "40")] {
            journal
                .create_entry(
                    NewJournalEntry::new(EntryType::Sale)
                        .dated(when)
                        .line(NewJournalLine::debit("1.1.01", dec(amount)))
                        .line(NewJournalLine::credit("4.1.01", dec(amount))),
                    user(),
                )
                .await
                .unwrap();
        }

        let cash = fx.ledger.accounts.get_account("1.1.01").await.unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(journal.get_account_balance(cash.id, None).await.unwrap(), dec("-140"));
        assert_eq!(journal.get_account_balance(cash.id, Some(feb)).await.unwrap(), dec("-100"));
        assert_eq!(journal.get_account_balance(cash.id, Some(mar)).await.unwrap(), dec("-140"));
        assert_eq!(cash.natural_balance(dec("-140")), dec("140"));

        let filtered = journal
            .list_entries(&EntryFilter {
                to: Some(feb),
                ..EntryFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].transaction_date, jan);

        let fresh = fx.ledger.accounts.get_account("1.1.05").await.unwrap();
        assert_eq!(journal.get_account_balance(fresh.id, None).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn session_exclusivity_and_deactivation_guard() {
        let fx = fixture().await;
        let sessions = &fx.ledger.sessions;
        let first = sessions
            .open_session(fx.drawer.id, dec("100"), user(), None)
            .await
            .unwrap();

        let err = sessions
            .open_session(fx.drawer.id, dec("1"), user(), None)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SessionAlreadyOpen(fx.drawer.id));
        assert_eq!(sessions.get_active_session(fx.drawer.id).await.unwrap(), Some(first.clone()));

        let err = fx.ledger.locations.deactivate(fx.drawer.id).await.unwrap_err();
        assert_eq!(err, LedgerError::SessionStillOpen(fx.drawer.id));

        sessions
            .close_session(first.id, dec("100"), user(), None)
            .await
            .unwrap();
        let gone = fx.ledger.locations.deactivate(fx.drawer.id).await.unwrap();
        assert!(!gone.is_active);
        assert!(matches!(
            sessions.open_session(fx.drawer.id, dec("1"), user(), None).await,
            Err(LedgerError::MoneyLocationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_opens_yield_exactly_one_session() {
        let fx = fixture().await;
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ledger = fx.ledger.clone();
            let drawer = fx.drawer.id;
            tasks.push(tokio::spawn(async move {
                ledger.sessions.open_session(drawer, dec("10"), UserId::new(), None).await
            }));
        }

        let mut opened = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => opened += 1,
                Err(err) => assert_eq!(err, LedgerError::SessionAlreadyOpen(fx.drawer.id)),
            }
        }
        assert_eq!(opened, 1);
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_sequential_numbers() {
        let fx = fixture().await;
        let mut tasks = Vec::new();
        for i in 1..=20 {
            let ledger = fx.ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .journal
                    .create_entry(
                        NewJournalEntry::new(EntryType::Sale)
                            .line(NewJournalLine::debit("1.1.01", Decimal::new(i, 0)))
                            .line(NewJournalLine::credit("4.1.01", Decimal::new(i, 0))),
                        UserId::new(),
                    )
                    .await
            }));
        }

        let mut seqs = Vec::new();
        for task in tasks {
            seqs.push(task.await.unwrap().unwrap().entry.entry_number.seq());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=20).collect::<Vec<u32>>());
        assert_eq!(fx.balance("1.1.01").await, dec("-210"));
    }

    #[tokio::test]
    async fn storage_timeout_leaves_no_trace() {
        let fx = fixture().await;
        let slow = Arc::new(InMemoryLedgerStore::new().with_latency(Duration::from_millis(100)));
        // Same chart, but every call now waits longer than the timeout.
        for account in fx.store.list_accounts().await.unwrap() {
            slow.insert_account(&account).await.unwrap();
        }
        let config = LedgerConfig {
            storage_timeout: Duration::from_millis(20),
            ..LedgerConfig::default()
        };
        let ledger = crate::services::LedgerServices::new(slow.clone(), fx.bus.clone(), &config);

        let err = ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Sale)
                    .line(NewJournalLine::debit("1.1.01", dec("1")))
                    .line(NewJournalLine::credit("4.1.01", dec("1"))),
                user(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Timeout(_)));
        assert!(err.is_retryable());
        assert_eq!(slow.entry_count(), 0);
        assert_eq!(slow.line_count(), 0);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_and_rolled_back() {
        let fx = fixture().await;
        fx.store.fail_on(FailPoint::InsertLines);

        let err = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Sale)
                    .line(NewJournalLine::debit("1.1.01", dec("3")))
                    .line(NewJournalLine::credit("4.1.01", dec("3"))),
                user(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));
        assert_eq!(fx.store.entry_count(), 0);

        fx.store.clear_faults();
        let entry = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Sale)
                    .line(NewJournalLine::debit("1.1.01", dec("3")))
                    .line(NewJournalLine::credit("4.1.01", dec("3"))),
                user(),
            )
            .await
            .unwrap();
        assert_eq!(entry.entry.entry_number.seq(), 1);
    }

    #[tokio::test]
    async fn movement_failure_does_not_fail_the_entry() {
        let fx = fixture().await;
        fx.store.fail_on(FailPoint::InsertMovements);

        let entry = fx
            .ledger
            .journal
            .create_entry(
                NewJournalEntry::new(EntryType::Sale)
                    .line(NewJournalLine::debit("1.1.01", dec("8")).at_location(fx.drawer.id))
                    .line(NewJournalLine::credit("4.1.01", dec("8"))),
                user(),
            )
            .await
            .unwrap();

        assert!(entry.entry.is_posted);
        assert!(fx.ledger.journal.list_movements(fx.drawer.id, 10).await.unwrap().is_empty());

        // The location balance is derived from lines, so reconciliation still sees it.
        let rec = fx.ledger.locations.reconcile_balance(fx.drawer.id).await.unwrap();
        assert_eq!(rec.ledger_balance, dec("8"));
    }

    #[tokio::test]
    async fn registry_routes_business_events_into_the_ledger() {
        let fx = fixture().await;
        let notifications = fx.bus.subscribe();
        let mut registry = HandlerRegistry::new();
        register_default_handlers(&mut registry, fx.ledger.clone());

        fx.ledger
            .sessions
            .open_session(fx.drawer.id, dec("200"), user(), None)
            .await
            .unwrap();

        let report = registry
            .dispatch(&BusinessEvent::SaleCompleted(SaleCompleted {
                sale_id: "S-1".into(),
                net_amount: dec("41.32"),
                tax_amount: dec("8.68"),
                tender: Tender::Cash,
                money_location_id: Some(fx.drawer.id),
                acting_user: user(),
                timestamp: Utc::now(),
            }))
            .await;
        assert_eq!(report.delivered, vec!["sales"]);
        assert!(report.is_clean());

        let session = fx
            .ledger
            .sessions
            .get_active_session(fx.drawer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.cash_in_drawer().unwrap(), dec("250"));

        let types: Vec<String> = notifications
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(
            types,
            vec![LedgerEvent::CASH_SESSION_OPENED, LedgerEvent::JOURNAL_ENTRY_CREATED]
        );
    }

    #[tokio::test]
    async fn failing_handler_is_reported_not_raised() {
        let fx = fixture().await;
        let mut registry = HandlerRegistry::new();
        register_default_handlers(&mut registry, fx.ledger.clone());

        // Revenue mapped to an account missing from the chart.
        let mut broken = LedgerConfig {
            storage_timeout: Duration::from_secs(1),
            ..LedgerConfig::default()
        };
        broken.accounts.revenue = "4.9.99".into();
        let other = fixture_with(Arc::new(InMemoryLedgerStore::new()), broken).await;
        let mut broken_registry = HandlerRegistry::new();
        register_default_handlers(&mut broken_registry, other.ledger.clone());

        let event = BusinessEvent::SaleCompleted(SaleCompleted {
            sale_id: "S-2".into(),
            net_amount: dec("10"),
            tax_amount: Decimal::ZERO,
            tender: Tender::Card,
            money_location_id: None,
            acting_user: user(),
            timestamp: Utc::now(),
        });

        assert!(registry.dispatch(&event).await.is_clean());
        let report = broken_registry.dispatch(&event).await;
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("4.9.99"));
        assert_eq!(other.store.entry_count(), 0);
    }
}
