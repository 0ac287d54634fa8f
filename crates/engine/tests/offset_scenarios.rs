mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{Harness, date};
use payflow_core::{DomainError, money};
use payflow_documents::DocumentStatus;
use payflow_infra::{InMemoryPaymentStore, PaymentStore, UnitOfWork};
use payflow_ledger::PaymentMethod;

fn codes(err: DomainError) -> Vec<String> {
    match err {
        DomainError::Validation(errors) => errors.codes().into_iter().map(String::from).collect(),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn offset_settles_both_sides_with_linked_transactions() {
    let h = Harness::new();
    let a = h.approved(h.new_receivable(100.0));
    let b = h.approved(h.new_payable(60.0));

    let result = h
        .engine
        .offsets
        .perform_offset(&h.clerk(), a.id, b.id, 60.0, Some("june netting".into()))
        .unwrap();

    assert_eq!(result.receivable.status(), DocumentStatus::PartiallyPaid);
    assert!(money::approx_eq(result.receivable.remaining_amount(), 40.0));
    assert_eq!(result.payable.status(), DocumentStatus::Paid);
    assert_eq!(result.payable.remaining_amount(), 0.0);

    assert!(result.reference.starts_with("OFS-20260615-"));
    assert_eq!(result.reference.len(), "OFS-20260615-".len() + 8);
    let [recv_row, pay_row] = &result.transactions;
    assert_eq!(recv_row.document_id, a.id);
    assert_eq!(recv_row.paired_document_id, Some(b.id));
    assert_eq!(pay_row.document_id, b.id);
    assert_eq!(pay_row.paired_document_id, Some(a.id));
    assert!(result.transactions.iter().all(|t| t.method == PaymentMethod::Offset));
    assert!(result.transactions.iter().all(|t| t.reference == result.reference));

    assert_eq!(h.engine.offsets.offset_history(a.id).unwrap().len(), 1);
    assert_eq!(h.engine.offsets.offset_history(b.id).unwrap().len(), 1);

    let account = h.engine.ledger.account(h.org, h.counterparty()).unwrap().unwrap();
    assert!(money::approx_eq(account.receivable_balance, 40.0));
    assert!(money::approx_eq(account.payable_balance, 0.0));
    assert!(h.audit.actions().contains(&"offset.performed".to_string()));
}

#[test]
fn failed_validation_after_locking_changes_nothing() {
    let h = Harness::new();
    let a = h.approved(h.new_receivable(100.0));
    let b = h.approved(h.new_payable(60.0));

    let err = h
        .engine
        .offsets
        .perform_offset(&h.clerk(), a.id, b.id, 70.0, None)
        .unwrap_err();
    assert_eq!(codes(err), vec!["offset.amount_exceeds_remaining"]);

    assert_eq!(h.reload(a.id), a);
    assert_eq!(h.reload(b.id), b);
    assert!(h.store.transactions(a.id).unwrap().is_empty());
    assert!(h.store.transactions(b.id).unwrap().is_empty());
}

#[test]
fn pair_rules_are_reported_together() {
    let h = Harness::new();
    let a = h.approved(h.new_receivable(100.0));
    let mut usd = h.new_payable(100.0);
    usd.currency = "USD".into();
    let b = h.approved(usd);
    let draft = h.create(h.new_payable(10.0));

    let found = codes(
        h.engine
            .offsets
            .perform_offset(&h.clerk(), a.id, b.id, 50.0, None)
            .unwrap_err(),
    );
    assert_eq!(found, vec!["offset.currency_mismatch"]);

    let found = codes(
        h.engine
            .offsets
            .perform_offset(&h.clerk(), a.id, draft.id, 5.0, None)
            .unwrap_err(),
    );
    assert_eq!(found, vec!["offset.status"]);

    let found = codes(
        h.engine
            .offsets
            .perform_offset(&h.clerk(), a.id, a.id, 5.0, None)
            .unwrap_err(),
    );
    assert_eq!(found, vec!["offset.same_document"]);

    let found = codes(
        h.engine
            .offsets
            .perform_offset(&h.clerk(), a.id, b.id, 0.005, None)
            .unwrap_err(),
    );
    assert_eq!(found, vec!["offset.amount_min"]);
}

#[test]
fn two_receivables_cannot_be_netted() {
    let h = Harness::new();
    let a = h.approved(h.new_receivable(100.0));
    let b = h.approved(h.new_receivable(80.0));

    let found = codes(
        h.engine
            .offsets
            .perform_offset(&h.clerk(), a.id, b.id, 10.0, None)
            .unwrap_err(),
    );
    assert!(found.contains(&"offset.payable_direction".to_string()));
}

#[test]
fn concurrent_offsets_in_opposite_order_both_complete() {
    let h = Harness::new();
    let a = h.approved(h.new_receivable(100.0));
    let b = h.approved(h.new_payable(100.0));

    thread::scope(|scope| {
        let forward = scope.spawn(|| {
            h.engine
                .offsets
                .perform_offset(&h.clerk(), a.id, b.id, 30.0, None)
        });
        let backward = scope.spawn(|| {
            h.engine
                .offsets
                .perform_offset(&h.clerk(), b.id, a.id, 20.0, None)
        });
        forward.join().unwrap().unwrap();
        backward.join().unwrap().unwrap();
    });

    let a = h.reload(a.id);
    let b = h.reload(b.id);
    assert!(money::approx_eq(a.remaining_amount(), 50.0));
    assert!(money::approx_eq(b.remaining_amount(), 50.0));
    assert_eq!(h.engine.offsets.offset_history(a.id).unwrap().len(), 2);
}

#[test]
fn automatic_offset_pairs_oldest_due_dates_first() {
    let h = Harness::new();
    let mut first = h.new_receivable(100.0);
    first.due_date = Some(date(6, 20));
    let mut second = h.new_receivable(50.0);
    second.due_date = Some(date(6, 25));
    let mut payable = h.new_payable(120.0);
    payable.due_date = Some(date(6, 22));
    let first = h.approved(first);
    let second = h.approved(second);
    let payable = h.approved(payable);

    let preview = h
        .engine
        .offsets
        .offset_candidates(h.org, h.counterparty())
        .unwrap();
    assert_eq!(preview.len(), 2);
    assert_eq!(h.reload(payable.id), payable);

    let report = h
        .engine
        .offsets
        .auto_offset_for_contractor(&h.clerk(), h.org, h.contractor)
        .unwrap();
    assert_eq!(report.offsets.len(), 2);
    assert!(report.skipped.is_empty());
    assert!(money::approx_eq(report.total_amount, 120.0));

    assert_eq!(h.reload(first.id).status(), DocumentStatus::Paid);
    assert_eq!(h.reload(payable.id).status(), DocumentStatus::Paid);
    let second = h.reload(second.id);
    assert_eq!(second.status(), DocumentStatus::PartiallyPaid);
    assert!(money::approx_eq(second.remaining_amount(), 30.0));

    let again = h
        .engine
        .offsets
        .auto_offset_for_contractor(&h.clerk(), h.org, h.contractor)
        .unwrap();
    assert!(again.offsets.is_empty());
    assert_eq!(again.total_amount, 0.0);
}

#[test]
fn automatic_offset_skips_a_locked_pair_and_settles_the_rest() {
    let store = InMemoryPaymentStore::with_lock_timeout(Duration::from_millis(100));
    let h = Harness::with_store(store);
    let mut receivable = h.new_receivable(100.0);
    receivable.due_date = Some(date(6, 20));
    let receivable = h.approved(receivable);
    let payables: Vec<_> = [(60.0, 21), (30.0, 22), (40.0, 23)]
        .into_iter()
        .map(|(amount, day)| {
            let mut input = h.new_payable(amount);
            input.due_date = Some(date(6, day));
            h.approved(input)
        })
        .collect();
    let busy = payables[1].id;

    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let store = &h.store;
    let report = thread::scope(|scope| {
        let holder = scope.spawn(move || {
            store.transaction(|uow: &mut dyn UnitOfWork| {
                uow.lock_document(busy)?;
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
        });
        locked_rx.recv().unwrap();
        let report = h
            .engine
            .offsets
            .auto_offset_for_contractor(&h.clerk(), h.org, h.contractor);
        release_tx.send(()).unwrap();
        holder.join().unwrap().unwrap();
        report.unwrap()
    });

    assert_eq!(report.offsets.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].receivable_id, receivable.id);
    assert_eq!(report.skipped[0].payable_id, busy);
    assert!(report.skipped[0].reason.contains("lock wait timeout"));
    assert!(money::approx_eq(report.total_amount, 100.0));

    assert_eq!(h.reload(receivable.id).status(), DocumentStatus::Paid);
    assert_eq!(h.reload(payables[0].id).status(), DocumentStatus::Paid);
    assert_eq!(h.reload(payables[2].id).status(), DocumentStatus::Paid);
    let untouched = h.reload(busy);
    assert_eq!(untouched.status(), DocumentStatus::Approved);
    assert!(h.engine.offsets.offset_history(busy).unwrap().is_empty());
}
