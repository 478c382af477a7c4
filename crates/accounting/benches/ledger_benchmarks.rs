use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use rust_decimal::Decimal;

use cashbook_accounting::{
    Account, AccountCode, AccountType, BalanceSide, CashSession, SessionCounter, build_tree,
    validate_lines,
};
use cashbook_core::{AccountId, CashSessionId, MoneyLocationId, UserId};

/// Balanced line set: `n - 1` credits of 1.23 offset by one debit.
fn balanced_amounts(n: usize) -> Vec<Decimal> {
    let mut amounts = vec![Decimal::new(123, 2); n - 1];
    amounts.push(-Decimal::new(123, 2) * Decimal::from(n as u64 - 1));
    amounts
}

/// Three-level chart: `groups` groups with `leaves` leaves each.
fn chart(groups: usize, leaves: usize) -> Vec<Account> {
    let now = Utc::now();
    let mut accounts = Vec::with_capacity(groups * (leaves + 1) + 1);
    let root = Account {
        id: AccountId::new(),
        code: AccountCode::parse("1").unwrap(),
        name: "Assets".into(),
        account_type: AccountType::Asset,
        normal_side: BalanceSide::Debit,
        is_group: true,
        allow_transactions: false,
        parent_id: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let root_id = root.id;
    let template = root.clone();
    accounts.push(root);

    for g in 0..groups {
        let group_id = AccountId::new();
        accounts.push(Account {
            id: group_id,
            code: AccountCode::parse(&format!("1.{g}")).unwrap(),
            name: format!("Group {g}"),
            parent_id: Some(root_id),
            ..template.clone()
        });
        for l in 0..leaves {
            accounts.push(Account {
                id: AccountId::new(),
                code: AccountCode::parse(&format!("1.{g}.{l:02}")).unwrap(),
                name: format!("Leaf {g}.{l}"),
                is_group: false,
                allow_transactions: true,
                parent_id: Some(group_id),
                ..template.clone()
            });
        }
    }
    accounts.reverse();
    accounts
}

fn bench_entry_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_validation");

    for line_count in [2usize, 10, 100, 1000] {
        let amounts = balanced_amounts(line_count);
        group.throughput(Throughput::Elements(line_count as u64));
        group.bench_with_input(
            BenchmarkId::new("validate_lines", line_count),
            &amounts,
            |b, amounts| b.iter(|| validate_lines(black_box(amounts.iter().copied()))),
        );
    }

    group.finish();
}

fn bench_tree_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("account_tree");

    for (groups, leaves) in [(5usize, 10usize), (20, 50), (100, 100)] {
        let accounts = chart(groups, leaves);
        group.throughput(Throughput::Elements(accounts.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("build_tree", accounts.len()),
            &accounts,
            |b, accounts| b.iter(|| build_tree(black_box(accounts))),
        );
    }

    group.finish();
}

fn bench_session_reconciliation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cash_session");
    group.sample_size(1000);

    group.bench_function("record_200_sales_and_reconcile", |b| {
        b.iter(|| {
            let mut session = CashSession::open(
                CashSessionId::new(),
                MoneyLocationId::new(),
                Decimal::new(200, 0),
                UserId::new(),
                None,
                Utc::now(),
            )
            .unwrap();
            for _ in 0..200 {
                session
                    .record(SessionCounter::Sales, Decimal::new(1250, 2))
                    .unwrap();
            }
            black_box(session.cash_in_drawer().unwrap())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_entry_validation,
    bench_tree_building,
    bench_session_reconciliation
);
criterion_main!(benches);
