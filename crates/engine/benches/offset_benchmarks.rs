use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{DateTime, NaiveDate, Utc};
use payflow_core::{ContractorId, DocumentId, OrganizationId, Party, UserId};
use payflow_documents::{
    Direction, DocumentStatus, DocumentType, Lifecycle, NewDocument, PaymentDocument, PaymentKind,
    Timestamps,
};
use payflow_engine::plan_offsets;
use payflow_ledger::CounterpartyAccount;

fn at() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-15T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// `n` approved documents alternating direction, with spread due dates and
/// amounts so the planner has to walk both sides.
fn portfolio(n: usize) -> (OrganizationId, Party, Vec<PaymentDocument>) {
    let org = OrganizationId::new();
    let contractor = ContractorId::new();
    let counterparty = Party::Contractor(contractor);
    let base = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

    let docs = (0..n)
        .map(|i| {
            let direction = if i % 2 == 0 {
                Direction::Incoming
            } else {
                Direction::Outgoing
            };
            let (payer, payee) = match direction {
                Direction::Incoming => (counterparty, Party::Organization(org)),
                Direction::Outgoing => (Party::Organization(org), counterparty),
            };
            let amount = 100.0 + (i * 37 % 900) as f64;
            let input = NewDocument {
                organization_id: org,
                direction,
                document_type: DocumentType::Invoice,
                payment_kind: PaymentKind::Regular,
                number: None,
                document_date: base,
                due_date: base.checked_add_days(chrono::Days::new((i * 7 % 180) as u64)),
                purpose: "bench".into(),
                amount,
                vat_rate: None,
                currency: "RUB".into(),
                payer: Some(payer),
                payee: Some(payee),
                payee_bank: None,
                source: None,
            };
            let number = format!("INV-{i:06}");
            PaymentDocument::draft(DocumentId::new(), input, number, UserId::new(), at())
                .with_lifecycle(
                    amount,
                    Lifecycle {
                        status: DocumentStatus::Approved,
                        paid_amount: 0.0,
                        timestamps: Timestamps::default(),
                        status_reason: None,
                    },
                )
        })
        .collect();
    (org, counterparty, docs)
}

fn bench_offset_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("offset_planning");
    for size in [10usize, 100, 1_000] {
        let (_, _, docs) = portfolio(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &docs, |b, docs| {
            b.iter(|| plan_offsets(black_box(docs.clone())))
        });
    }
    group.finish();
}

fn bench_ledger_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_recompute");
    for size in [10usize, 100, 1_000] {
        let (org, counterparty, docs) = portfolio(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &docs, |b, docs| {
            b.iter(|| {
                let mut account = CounterpartyAccount::new(org, counterparty);
                account.recompute(black_box(docs.iter()), at());
                account
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_offset_planning, bench_ledger_recompute);
criterion_main!(benches);
