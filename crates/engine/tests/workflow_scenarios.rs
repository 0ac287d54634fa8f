mod common;

use common::{Harness, date};
use payflow_core::{ContractorId, DocumentId, DomainError, Party, money};
use payflow_documents::{DocumentEvent, DocumentPatch, DocumentStatus};
use payflow_ledger::{NewPayment, PaymentMethod};
use proptest::prelude::*;

#[test]
fn generated_numbers_are_sequential_per_type_and_year() {
    let h = Harness::new();
    let first = h.create(h.new_payable(1_000.0));
    let second = h.create(h.new_payable(2_000.0));

    assert_eq!(first.number, "INV-2026-000001");
    assert_eq!(second.number, "INV-2026-000002");
    assert_eq!(first.status(), DocumentStatus::Draft);
    assert!(h.audit.actions().iter().all(|a| a == "document.created"));
}

#[test]
fn explicit_number_must_be_unique_in_the_organization() {
    let h = Harness::new();
    let mut input = h.new_payable(1_000.0);
    input.number = Some("MANUAL-1".into());
    h.create(input.clone());

    let err = h.engine.workflow.create(&h.clerk(), input).unwrap_err();
    match err {
        DomainError::Validation(errors) => assert!(errors.contains_code("number.duplicate")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn create_rejects_a_document_failing_fast_checks() {
    let h = Harness::new();
    let mut input = h.new_payable(1_000.0);
    input.due_date = Some(date(6, 1));

    let err = h.engine.workflow.create(&h.clerk(), input).unwrap_err();
    match err {
        DomainError::Validation(errors) => {
            assert_eq!(errors.len(), 1);
            assert!(errors.contains_code("date.due_before_document"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(h.store.documents().unwrap().is_empty());
}

#[test]
fn drafts_can_be_edited_and_submitted_documents_cannot() {
    let h = Harness::new();
    let doc = h.create(h.new_payable(1_000.0));
    let patch = DocumentPatch {
        amount: Some(1_500.0),
        purpose: Some("revised scope".into()),
        ..DocumentPatch::default()
    };
    let updated = h.engine.workflow.update(&h.clerk(), doc.id, patch.clone()).unwrap();
    assert!(money::approx_eq(updated.amount(), 1_500.0));
    assert_eq!(updated.purpose, "revised scope");

    h.engine.workflow.submit(&h.clerk(), doc.id, false).unwrap();
    assert!(h.engine.workflow.update(&h.clerk(), doc.id, patch).is_err());
    assert!(matches!(
        h.engine.workflow.submit(&h.clerk(), doc.id, true),
        Err(DomainError::InvalidTransition { from: "submitted", to: "submitted" })
    ));
}

#[test]
fn direct_approval_is_reserved_for_approval_admins() {
    let h = Harness::new();
    let doc = h.submitted(h.new_payable(2_000.0));
    assert!(matches!(
        h.engine.workflow.approve(&h.clerk(), doc.id),
        Err(DomainError::Forbidden(_))
    ));
    assert!(matches!(
        h.engine.workflow.approve(&h.ctx(h.chief_accountant), doc.id),
        Err(DomainError::Forbidden(_))
    ));
    assert_eq!(h.reload(doc.id).status(), DocumentStatus::Submitted);

    let approved = h.engine.workflow.approve(&h.ctx(h.admin), doc.id).unwrap();
    assert_eq!(approved.status(), DocumentStatus::Approved);
}

#[test]
fn moving_a_draft_to_another_contractor_moves_its_balance() -> anyhow::Result<()> {
    let h = Harness::new();
    let other = ContractorId::new();
    h.store.add_contractor(other)?;
    let doc = h.create(h.new_payable(250.0));

    let patch = DocumentPatch {
        payee: Some(Some(Party::Contractor(other))),
        ..DocumentPatch::default()
    };
    h.engine.workflow.update(&h.clerk(), doc.id, patch)?;

    let old = h.engine.ledger.account(h.org, h.counterparty())?.unwrap();
    assert!(money::approx_eq(old.payable_balance, 0.0));
    assert_eq!(old.open_payables, 0);
    let new = h.engine.ledger.account(h.org, Party::Contractor(other))?.unwrap();
    assert!(money::approx_eq(new.payable_balance, 250.0));
    Ok(())
}

#[test]
fn submit_reports_duplicates_unless_acknowledged() {
    let h = Harness::new();
    h.submitted(h.new_payable(7_000.0));
    let twin = h.create(h.new_payable(7_000.0));

    let err = h.engine.workflow.submit(&h.clerk(), twin.id, false).unwrap_err();
    match err {
        DomainError::Validation(errors) => {
            assert!(errors.contains_code("duplicate.suspected"));
            assert!(!errors.has_blocking());
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(h.reload(twin.id).status(), DocumentStatus::Draft);

    let submitted = h.engine.workflow.submit(&h.clerk(), twin.id, true).unwrap();
    assert_eq!(submitted.status(), DocumentStatus::Submitted);
}

#[test]
fn blocked_counterparty_fails_submission() {
    let h = Harness::new();
    h.engine
        .ledger
        .block(&h.clerk(), h.org, h.counterparty(), "disputed deliveries")
        .unwrap();
    let doc = h.create(h.new_payable(1_000.0));

    let err = h.engine.workflow.submit(&h.clerk(), doc.id, true).unwrap_err();
    match err {
        DomainError::Validation(errors) => assert!(errors.contains_code("counterparty.blocked")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn cancel_and_reject_need_a_reason() {
    let h = Harness::new();
    let doc = h.submitted(h.new_payable(1_000.0));

    assert!(matches!(
        h.engine.workflow.cancel(&h.clerk(), doc.id, Some("  ".into())),
        Err(DomainError::Rule(_))
    ));
    assert!(matches!(
        h.engine.workflow.reject(&h.clerk(), doc.id, None),
        Err(DomainError::Rule(_))
    ));

    let rejected = h
        .engine
        .workflow
        .reject(&h.clerk(), doc.id, Some("wrong bank account".into()))
        .unwrap();
    assert_eq!(rejected.status(), DocumentStatus::Rejected);
    assert_eq!(rejected.status_reason(), Some("wrong bank account"));
    assert!(rejected.timestamps().rejected_at.is_some());

    let reopened = h
        .engine
        .workflow
        .transition(&h.clerk(), doc.id, DocumentStatus::Draft, None)
        .unwrap();
    assert_eq!(reopened.status(), DocumentStatus::Draft);
    assert_eq!(reopened.status_reason(), None);
}

#[test]
fn partial_payment_from_approved_walks_through_scheduled() {
    let h = Harness::new();
    let events = h.events();
    let doc = h.approved(h.new_payable(1_000.0));
    events.drain();

    let doc = h
        .engine
        .workflow
        .register_partial_payment(&h.clerk(), doc.id, 400.0)
        .unwrap();
    assert_eq!(doc.status(), DocumentStatus::PartiallyPaid);
    assert!(money::approx_eq(doc.paid_amount(), 400.0));
    assert!(money::approx_eq(doc.remaining_amount(), 600.0));
    assert!(doc.timestamps().scheduled_at.is_some());

    let published: Vec<_> = events.drain().into_iter().map(|e| e.into_payload()).collect();
    assert!(matches!(published[0], DocumentEvent::Scheduled(_)));
    assert!(matches!(
        published[1],
        DocumentEvent::PartiallyPaid { remaining_amount, .. }
            if money::approx_eq(remaining_amount, 600.0)
    ));

    let rows = h.engine.workflow.transactions(doc.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].method, PaymentMethod::BankTransfer);
}

#[test]
fn closing_payment_within_tolerance_lands_in_paid() {
    let h = Harness::new();
    let doc = h.approved(h.new_payable(1_000.0));
    h.engine
        .workflow
        .register_partial_payment(&h.clerk(), doc.id, 250.0)
        .unwrap();

    let doc = h
        .engine
        .workflow
        .register_partial_payment(&h.clerk(), doc.id, 750.0005)
        .unwrap();
    assert_eq!(doc.status(), DocumentStatus::Paid);
    assert_eq!(doc.remaining_amount(), 0.0);
    assert_eq!(doc.paid_amount(), doc.amount());
}

#[test]
fn overpayment_is_refused_without_side_effects() {
    let h = Harness::new();
    let doc = h.approved(h.new_payable(100.0));

    let err = h
        .engine
        .workflow
        .register_partial_payment(&h.clerk(), doc.id, 100.5)
        .unwrap_err();
    assert!(matches!(err, DomainError::Rule(_)));
    assert_eq!(h.reload(doc.id), doc);
    assert!(h.engine.workflow.transactions(doc.id).unwrap().is_empty());

    let err = h
        .engine
        .workflow
        .register_partial_payment(&h.clerk(), doc.id, 0.0)
        .unwrap_err();
    match err {
        DomainError::Validation(errors) => assert!(errors.contains_code("payment.amount_positive")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn offsets_cannot_be_registered_as_plain_payments() {
    let h = Harness::new();
    let doc = h.approved(h.new_payable(100.0));
    let payment = NewPayment {
        amount: 10.0,
        method: PaymentMethod::Offset,
        reference: None,
        notes: None,
    };
    assert!(h.engine.workflow.register_payment(&h.clerk(), doc.id, payment).is_err());
}

#[test]
fn mark_paid_books_the_remaining_balance() {
    let h = Harness::new();
    let doc = h.approved(h.new_payable(900.0));
    h.engine
        .workflow
        .register_partial_payment(&h.clerk(), doc.id, 300.0)
        .unwrap();

    let doc = h.engine.workflow.mark_paid(&h.clerk(), doc.id).unwrap();
    assert_eq!(doc.status(), DocumentStatus::Paid);
    assert_eq!(doc.remaining_amount(), 0.0);

    let rows = h.engine.workflow.transactions(doc.id).unwrap();
    let booked: f64 = rows.iter().map(|t| t.amount).sum();
    assert_eq!(rows.len(), 2);
    assert!(money::approx_eq(booked, 900.0));
}

#[test]
fn generic_transition_routes_and_refuses_illegal_edges() {
    let h = Harness::new();
    let doc = h.create(h.new_payable(100.0));

    let err = h
        .engine
        .workflow
        .transition(&h.clerk(), doc.id, DocumentStatus::Paid, None)
        .unwrap_err();
    assert_eq!(
        err,
        DomainError::InvalidTransition {
            from: "draft",
            to: "paid"
        }
    );
    assert!(matches!(
        h.engine
            .workflow
            .transition(&h.clerk(), doc.id, DocumentStatus::PartiallyPaid, None),
        Err(DomainError::Rule(_))
    ));
    assert!(matches!(
        h.engine
            .workflow
            .transition(&h.clerk(), DocumentId::new(), DocumentStatus::Submitted, None),
        Err(DomainError::NotFound { .. })
    ));

    let submitted = h
        .engine
        .workflow
        .transition(&h.clerk(), doc.id, DocumentStatus::Submitted, None)
        .unwrap();
    assert_eq!(submitted.status(), DocumentStatus::Submitted);
    assert!(h.engine.workflow.can_transition(doc.id, DocumentStatus::Approved).unwrap());
    assert!(!h.engine.workflow.can_transition(doc.id, DocumentStatus::Paid).unwrap());
}

#[test]
fn available_actions_follow_the_status_graph() {
    let h = Harness::new();
    let doc = h.create(h.new_payable(100.0));
    let targets: Vec<_> = h
        .engine
        .workflow
        .get_available_actions(doc.id)
        .unwrap()
        .into_iter()
        .map(|a| a.target)
        .collect();
    assert_eq!(targets, vec![DocumentStatus::Submitted, DocumentStatus::Cancelled]);
}

#[test]
fn ledger_follows_every_commit() {
    let h = Harness::new();
    let payable = h.approved(h.new_payable(1_000.0));
    h.approved(h.new_receivable(300.0));

    let account = h.engine.ledger.account(h.org, h.counterparty()).unwrap().unwrap();
    assert!(money::approx_eq(account.payable_balance, 1_000.0));
    assert!(money::approx_eq(account.receivable_balance, 300.0));
    assert!(money::approx_eq(account.net_balance, -700.0));

    h.engine
        .workflow
        .register_partial_payment(&h.clerk(), payable.id, 400.0)
        .unwrap();
    let account = h.engine.ledger.account(h.org, h.counterparty()).unwrap().unwrap();
    assert!(money::approx_eq(account.payable_balance, 600.0));
    assert_eq!(account.open_payables, 1);

    h.engine
        .workflow
        .cancel(&h.clerk(), payable.id, Some("duplicate".into()))
        .unwrap_err();
    h.engine.workflow.mark_paid(&h.clerk(), payable.id).unwrap();
    let account = h.engine.ledger.account(h.org, h.counterparty()).unwrap().unwrap();
    assert_eq!(account.open_payables, 0);
    assert!(money::approx_eq(account.payable_balance, 0.0));
}

#[test]
fn audit_and_events_are_dropped_on_rollback() {
    let h = Harness::new();
    let events = h.events();
    let doc = h.approved(h.new_payable(100.0));
    events.drain();
    let audit_before = h.audit.entries().len();

    h.engine
        .workflow
        .register_partial_payment(&h.clerk(), doc.id, 500.0)
        .unwrap_err();

    assert_eq!(h.audit.entries().len(), audit_before);
    assert!(events.drain().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn remaining_tracks_paid_after_every_commit(
        payments in proptest::collection::vec(1.0f64..400.0, 1..6)
    ) {
        let h = Harness::new();
        let doc = h.approved(h.new_payable(1_000.0));

        for amount in payments {
            let _ = h.engine.workflow.register_partial_payment(&h.clerk(), doc.id, amount);
            let current = h.reload(doc.id);
            let expected = money::remaining(current.amount(), current.paid_amount());
            prop_assert!((current.remaining_amount() - expected).abs() <= money::EPSILON);
            prop_assert!(current.paid_amount() <= current.amount() + money::EPSILON);
            let paid = current.status() == DocumentStatus::Paid;
            prop_assert_eq!(paid, money::is_settled(current.remaining_amount()));
        }
    }
}
