mod common;

use std::thread;

use common::{Harness, now};
use payflow_approvals::{ApprovalRuleDef, ApprovalStatus, ChainStep, Conditions};
use payflow_auth::Role;
use payflow_core::{DomainError, RuleId, UserId};
use payflow_documents::{DocumentEvent, DocumentStatus, PaymentDocument};

fn pending(h: &Harness, amount: f64) -> PaymentDocument {
    let doc = h.submitted(h.new_payable(amount));
    h.engine.workflow.send_for_approval(&h.clerk(), doc.id).unwrap()
}

fn rule(h: &Harness, approval_required: bool, chain: Vec<ChainStep>) -> ApprovalRuleDef {
    ApprovalRuleDef {
        id: RuleId::new(),
        organization_id: h.org,
        name: "services".into(),
        priority: 10,
        active: true,
        approval_required,
        conditions: Conditions::default(),
        chain,
        created_at: now(),
    }
}

#[test]
fn small_amount_needs_one_chief_accountant() {
    let h = Harness::new();
    let doc = pending(&h, 30_000.0);
    assert_eq!(doc.status(), DocumentStatus::PendingApproval);

    let rows = h.store.approvals(doc.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].approval_role, Role::CHIEF_ACCOUNTANT);
    assert_eq!(rows[0].approver_user_id, Some(h.chief_accountant));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].level, 1);
    assert_eq!(sent[0].approvers, vec![h.chief_accountant]);

    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.chief_accountant), doc.id, Some("ok".into()))
        .unwrap();
    assert!(decision.document_completed);
    assert!(!decision.admin_override);
    assert_eq!(decision.document.status(), DocumentStatus::Approved);

    let status = h.engine.approvals.get_approval_status(doc.id).unwrap();
    assert_eq!(status.pending, 0);
    assert!(status.is_complete);
    assert_eq!(status.progress_percent, 100.0);
}

#[test]
fn large_amount_walks_three_levels_in_order() {
    let h = Harness::new();
    let doc = pending(&h, 600_000.0);
    let status = h.engine.approvals.get_approval_status(doc.id).unwrap();
    assert_eq!(status.total_levels, 3);
    assert_eq!(status.current_level, Some(1));

    let err = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.general_director), doc.id, None)
        .unwrap_err();
    assert!(matches!(err, DomainError::Rule(_)));

    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.chief_accountant), doc.id, None)
        .unwrap();
    assert!(!decision.document_completed);
    assert_eq!(decision.document.status(), DocumentStatus::PendingApproval);

    let sent = h.notifier.sent();
    let last = sent.last().unwrap();
    assert_eq!(last.level, 2);
    assert_eq!(last.approvers, vec![h.financial_director]);

    h.engine
        .approvals
        .approve_by_user(&h.ctx(h.financial_director), doc.id, None)
        .unwrap();
    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.general_director), doc.id, None)
        .unwrap();
    assert!(decision.document_completed);
    assert_eq!(h.reload(doc.id).status(), DocumentStatus::Approved);
    assert!(
        h.store
            .approvals(doc.id)
            .unwrap()
            .iter()
            .all(|r| r.status == ApprovalStatus::Approved)
    );
}

#[test]
fn outsiders_have_no_rights() {
    let h = Harness::new();
    let doc = pending(&h, 10_000.0);
    let err = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(UserId::new()), doc.id, None)
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
    assert!(!h.engine.approvals.can_user_approve(doc.id, UserId::new()).unwrap());
    assert!(h.engine.approvals.can_user_approve(doc.id, h.chief_accountant).unwrap());
}

#[test]
fn one_rejection_ends_the_chain() {
    let h = Harness::new();
    let doc = pending(&h, 600_000.0);
    h.engine
        .approvals
        .approve_by_user(&h.ctx(h.chief_accountant), doc.id, None)
        .unwrap();

    assert!(matches!(
        h.engine
            .approvals
            .reject_by_user(&h.ctx(h.financial_director), doc.id, " "),
        Err(DomainError::Rule(_))
    ));
    let decision = h
        .engine
        .approvals
        .reject_by_user(&h.ctx(h.financial_director), doc.id, "budget frozen")
        .unwrap();
    assert_eq!(decision.document.status(), DocumentStatus::Rejected);
    assert_eq!(decision.document.status_reason(), Some("budget frozen"));

    let statuses: Vec<_> = h
        .store
        .approvals(doc.id)
        .unwrap()
        .into_iter()
        .map(|r| (r.approval_level, r.status))
        .collect();
    assert!(statuses.contains(&(1, ApprovalStatus::Approved)));
    assert!(statuses.contains(&(2, ApprovalStatus::Rejected)));
    assert!(statuses.contains(&(3, ApprovalStatus::Skipped)));
}

#[test]
fn admin_force_approves_a_submitted_document() {
    let h = Harness::new();
    let doc = h.submitted(h.new_payable(80_000.0));

    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.admin), doc.id, None)
        .unwrap();
    assert!(decision.admin_override);
    assert_eq!(decision.document.status(), DocumentStatus::Approved);

    let rows = h.store.approvals(doc.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].approval_role, Role::ADMIN);
    assert_eq!(rows[0].status, ApprovalStatus::Approved);
    assert_eq!(rows[0].decided_by, Some(h.admin));
}

#[test]
fn admin_cannot_force_a_document_outside_approval() {
    let h = Harness::new();
    let doc = h.approved(h.new_payable(5_000.0));
    let err = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.admin), doc.id, None)
        .unwrap_err();
    assert!(matches!(err, DomainError::Rule(_)));
    assert!(h.store.approvals(doc.id).unwrap().is_empty());
}

#[test]
fn admin_proxies_the_earliest_pending_row() {
    let h = Harness::new();
    let doc = pending(&h, 600_000.0);

    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.admin), doc.id, Some("urgent".into()))
        .unwrap();
    assert!(decision.admin_override);
    assert_eq!(decision.approval.approval_level, 1);
    assert!(decision.approval.comment.as_deref().unwrap().contains("override"));
    assert_eq!(decision.document.status(), DocumentStatus::PendingApproval);
    assert_eq!(
        h.engine.approvals.get_approval_status(doc.id).unwrap().current_level,
        Some(2)
    );
}

#[test]
fn admin_decision_covers_sibling_rows_at_the_same_level() {
    let h = Harness::new();
    h.store
        .add_rule(rule(
            &h,
            true,
            vec![
                ChainStep::new(Role::CHIEF_ACCOUNTANT, 1, 1),
                ChainStep::new(Role::FINANCIAL_DIRECTOR, 1, 2),
            ],
        ))
        .unwrap();
    let doc = pending(&h, 1_000.0);

    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.admin), doc.id, None)
        .unwrap();
    assert!(decision.document_completed);
    assert_eq!(decision.document.status(), DocumentStatus::Approved);
    assert_eq!(h.store.approvals(doc.id).unwrap().len(), 2);
}

#[test]
fn concurrent_signers_on_one_level_approve_the_document_once() {
    let h = Harness::new();
    h.store
        .add_rule(rule(
            &h,
            true,
            vec![
                ChainStep::new(Role::CHIEF_ACCOUNTANT, 1, 1),
                ChainStep::new(Role::FINANCIAL_DIRECTOR, 1, 2),
            ],
        ))
        .unwrap();
    let id = pending(&h, 1_000.0).id;
    let events = h.events();

    let decisions = thread::scope(|scope| {
        let signers = [h.chief_accountant, h.financial_director].map(|user| {
            let h = &h;
            scope.spawn(move || {
                h.engine
                    .approvals
                    .approve_by_user(&h.ctx(user), id, None)
            })
        });
        signers.map(|signer| signer.join().unwrap().unwrap())
    });

    assert_eq!(decisions.iter().filter(|d| d.document_completed).count(), 1);
    assert_eq!(h.reload(id).status(), DocumentStatus::Approved);
    let approved_events = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e.payload(), DocumentEvent::Approved(_)))
        .count();
    assert_eq!(approved_events, 1);
    let audit = h.audit.actions();
    assert_eq!(audit.iter().filter(|a| *a == "document.approved").count(), 1);
    assert_eq!(audit.iter().filter(|a| *a == "approval.approved").count(), 2);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[test]
fn optional_signer_neither_blocks_nor_loses_the_chance_to_sign() {
    let h = Harness::new();
    h.store
        .add_rule(rule(
            &h,
            true,
            vec![
                ChainStep::new(Role::CHIEF_ACCOUNTANT, 1, 1),
                ChainStep::new(Role::FINANCIAL_DIRECTOR, 1, 2).optional(),
                ChainStep::new(Role::GENERAL_DIRECTOR, 2, 1),
            ],
        ))
        .unwrap();
    let doc = pending(&h, 1_000.0);

    h.engine
        .approvals
        .approve_by_user(&h.ctx(h.chief_accountant), doc.id, None)
        .unwrap();
    let status = h.engine.approvals.get_approval_status(doc.id).unwrap();
    assert_eq!(status.current_level, Some(2));
    assert_eq!(h.notifier.sent().last().map(|n| n.level), Some(2));

    let late = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.financial_director), doc.id, None)
        .unwrap();
    assert!(!late.document_completed);
    assert_eq!(h.notifier.sent().len(), 2);

    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.general_director), doc.id, None)
        .unwrap();
    assert!(decision.document_completed);
    assert_eq!(decision.document.status(), DocumentStatus::Approved);
}

#[test]
fn signer_threshold_is_enforced_for_non_admins() {
    let h = Harness::new();
    h.store
        .add_rule(rule(
            &h,
            true,
            vec![ChainStep::new(Role::CHIEF_ACCOUNTANT, 1, 1).with_threshold(5_000.0)],
        ))
        .unwrap();
    let doc = pending(&h, 8_000.0);

    let err = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.chief_accountant), doc.id, None)
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
    assert!(!h.engine.approvals.can_user_approve(doc.id, h.chief_accountant).unwrap());
    assert!(h.engine.approvals.can_user_approve(doc.id, h.admin).unwrap());
}

#[test]
fn rule_without_approval_approves_immediately() {
    let h = Harness::new();
    h.store.add_rule(rule(&h, false, Vec::new())).unwrap();
    let doc = pending(&h, 900_000.0);

    assert_eq!(doc.status(), DocumentStatus::Approved);
    assert!(h.store.approvals(doc.id).unwrap().is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn missing_role_holder_leaves_the_row_unassigned() {
    let h = Harness::new();
    h.store
        .add_rule(rule(&h, true, vec![ChainStep::new(Role::new("treasurer"), 1, 1)]))
        .unwrap();
    let doc = pending(&h, 1_000.0);

    let rows = h.store.approvals(doc.id).unwrap();
    assert_eq!(rows[0].approver_user_id, None);
    let decision = h
        .engine
        .approvals
        .approve_by_user(&h.ctx(h.admin), doc.id, None)
        .unwrap();
    assert_eq!(decision.document.status(), DocumentStatus::Approved);
}

#[test]
fn notification_outage_does_not_undo_approval_state() {
    let h = Harness::new();
    h.notifier.set_failing(true);
    let doc = pending(&h, 600_000.0);
    h.engine
        .approvals
        .approve_by_user(&h.ctx(h.chief_accountant), doc.id, None)
        .unwrap();

    assert!(h.notifier.sent().is_empty());
    let status = h.engine.approvals.get_approval_status(doc.id).unwrap();
    assert_eq!(status.approved, 1);
    assert_eq!(status.current_level, Some(2));
}

#[test]
fn recall_and_resend_starts_a_new_round() {
    let h = Harness::new();
    let doc = pending(&h, 60_000.0);
    h.engine
        .workflow
        .transition(&h.clerk(), doc.id, DocumentStatus::Submitted, None)
        .unwrap();
    assert!(
        h.store
            .approvals(doc.id)
            .unwrap()
            .iter()
            .all(|r| r.status == ApprovalStatus::Skipped)
    );

    h.engine.workflow.send_for_approval(&h.clerk(), doc.id).unwrap();
    let status = h.engine.approvals.get_approval_status(doc.id).unwrap();
    assert_eq!(status.round, 2);
    assert_eq!(status.pending, 2);
    assert_eq!(status.total, 2);
}

#[test]
fn regeneration_is_reserved_for_administrators() {
    let h = Harness::new();
    let doc = pending(&h, 600_000.0);
    h.engine
        .approvals
        .approve_by_user(&h.ctx(h.chief_accountant), doc.id, None)
        .unwrap();

    assert!(matches!(
        h.engine.approvals.regenerate_approvals(&h.clerk(), doc.id),
        Err(DomainError::Forbidden(_))
    ));

    let report = h
        .engine
        .approvals
        .regenerate_approvals(&h.ctx(h.admin), doc.id)
        .unwrap();
    assert_eq!(report.round, 2);
    assert_eq!(report.pending, 3);
    assert_eq!(report.current_level, Some(1));
    assert_eq!(h.reload(doc.id).status(), DocumentStatus::PendingApproval);

    let round_one_pending = h
        .store
        .approvals(doc.id)
        .unwrap()
        .into_iter()
        .filter(|r| r.round == 1 && r.is_pending())
        .count();
    assert_eq!(round_one_pending, 0);
}

#[test]
fn direct_approval_is_refused_while_rows_are_pending() {
    let h = Harness::new();
    let doc = pending(&h, 10_000.0);
    assert!(matches!(
        h.engine.workflow.approve(&h.clerk(), doc.id),
        Err(DomainError::Rule(_))
    ));
}
