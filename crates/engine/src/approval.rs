//! Approval workflow engine.
//!
//! Every decision runs in one transaction that locks the document first and
//! then the approval rows it touches. Rows belong to a numbered round; only
//! the latest round is live.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};

use payflow_approvals::{
    ApprovalRule, ApprovalStatus, ApprovalStatusReport, ChainState, PaymentApproval, select_rule,
};
use payflow_auth::is_approval_admin;
use payflow_core::{
    ApprovalId, DocumentId, DomainError, DomainResult, OperationContext, UserId,
};
use payflow_documents::{DocumentStatus, PaymentDocument};
use payflow_infra::{ApprovalNotice, AuditEntry, PaymentStore, UnitOfWork};

use crate::context::{Effects, Env, Shared};
use crate::workflow::apply_transition;

const OVERRIDE_NOTE: &str = "administrator override";

/// Outcome of [`ApprovalEngine::approve_by_user`] and
/// [`ApprovalEngine::reject_by_user`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    pub document: PaymentDocument,
    /// The row the caller's decision was recorded on.
    pub approval: PaymentApproval,
    /// The decision went through an admin proxy, sibling auto-approval or a
    /// synthetic admin row.
    pub admin_override: bool,
    /// The chain reached a final outcome and the document left
    /// `pending_approval`.
    pub document_completed: bool,
}

enum Resolution {
    Row { id: ApprovalId, proxy: bool },
    Force,
}

/// Pick the row `user` acts on: their own pending row, else (admins) the
/// earliest pending row, else (admins) a direct decision on the document.
fn resolve(chain: &ChainState<'_>, user: UserId, is_admin: bool) -> DomainResult<Resolution> {
    if let Some(row) = chain.assigned_pending(user) {
        return Ok(Resolution::Row { id: row.id, proxy: false });
    }
    if !is_admin {
        return Err(DomainError::forbidden(format!(
            "user {user} has no rights to decide on this document"
        )));
    }
    Ok(match chain.earliest_pending() {
        Some(row) => Resolution::Row { id: row.id, proxy: true },
        None => Resolution::Force,
    })
}

fn annotate(comment: Option<String>, note: &str) -> Option<String> {
    match comment {
        Some(c) if !c.trim().is_empty() => Some(format!("{} ({note})", c.trim())),
        _ => Some(note.to_string()),
    }
}

/// Non-admin signers must pass their row's threshold and conditions.
fn check_signer(row: &PaymentApproval, doc: &PaymentDocument) -> DomainResult<()> {
    if !row.can_approve_amount(doc.amount()) {
        return Err(DomainError::forbidden(format!(
            "amount {:.2} exceeds the approval threshold of role {}",
            doc.amount(),
            row.approval_role
        )));
    }
    if !row.check_conditions(doc) {
        return Err(DomainError::forbidden(format!(
            "document {} does not meet the conditions of role {}",
            doc.number, row.approval_role
        )));
    }
    Ok(())
}

/// Required rows sign at the current level only; optional rows stay open
/// once their level is reached.
fn check_level(row: &PaymentApproval, current: Option<u32>) -> DomainResult<()> {
    match current {
        Some(level) if level == row.approval_level => Ok(()),
        Some(level) if !row.required && row.approval_level < level => Ok(()),
        Some(level) => Err(DomainError::rule(format!(
            "approval level {} is not open yet; level {level} is still pending",
            row.approval_level
        ))),
        None => Err(DomainError::rule("no approval level is pending")),
    }
}

fn level_notice(
    doc: &PaymentDocument,
    chain: &ChainState<'_>,
    level: u32,
) -> Option<ApprovalNotice> {
    let pending = chain.pending_at_level(level);
    if pending.is_empty() {
        return None;
    }
    Some(ApprovalNotice {
        document_id: doc.id,
        organization_id: doc.organization_id,
        number: doc.number.clone(),
        amount: doc.amount(),
        currency: doc.currency.clone(),
        level,
        approvers: pending.iter().filter_map(|r| r.approver_user_id).collect(),
        roles: pending.iter().map(|r| r.approval_role.clone()).collect(),
    })
}

fn approval_audit(
    ctx: &OperationContext,
    doc: &PaymentDocument,
    action: &str,
    row: &PaymentApproval,
) -> AuditEntry {
    AuditEntry::new(
        doc.organization_id,
        action,
        "payment_approval",
        row.id,
        ctx.actor,
        ctx.now(),
    )
    .with_change(None, Some(row))
    .describe(format!(
        "{} level {} ({}) on {}",
        row.status.as_str(),
        row.approval_level,
        row.approval_role,
        doc.number
    ))
}

/// Mark every pending row of the document `skipped`.
pub(crate) fn retire_pending(
    uow: &mut dyn UnitOfWork,
    document_id: DocumentId,
    note: &str,
    at: chrono::DateTime<chrono::Utc>,
) -> DomainResult<usize> {
    let pending: Vec<ApprovalId> = uow
        .approvals_for_document(document_id)?
        .into_iter()
        .filter(PaymentApproval::is_pending)
        .map(|r| r.id)
        .collect();
    let mut retired = 0;
    for id in pending {
        let mut row = uow.lock_approval(id)?;
        if row.is_pending() {
            row.skip(note, at)?;
            uow.update_approval(&row)?;
            retired += 1;
        }
    }
    Ok(retired)
}

/// Create the next round for `rule` and queue the level-one notice.
fn start_round(
    env: &Env,
    uow: &mut dyn UnitOfWork,
    fx: &mut Effects,
    ctx: &OperationContext,
    doc: &PaymentDocument,
    rule: &ApprovalRule,
) -> DomainResult<Vec<PaymentApproval>> {
    let at = ctx.now();
    retire_pending(uow, doc.id, "superseded by a new approval round", at)?;
    let existing = uow.approvals_for_document(doc.id)?;
    let round = ChainState::new(&existing).next_round();

    let rows: Vec<PaymentApproval> = rule
        .ordered_steps()
        .into_iter()
        .map(|step| {
            let approver = env
                .authz()
                .first_active_user_with_role(doc.organization_id, &step.role);
            if approver.is_none() {
                warn!(
                    document_id = %doc.id,
                    role = %step.role,
                    level = step.level,
                    "no active approver holds role"
                );
            }
            PaymentApproval::from_step(doc, step, approver, round, at)
        })
        .collect();
    uow.insert_approvals(&rows)?;

    let chain = ChainState::new(&rows);
    if let Some(notice) = chain
        .current_level()
        .and_then(|level| level_notice(doc, &chain, level))
    {
        fx.notify(notice);
    }
    fx.audit(
        AuditEntry::new(
            doc.organization_id,
            "approval.round_started",
            "payment_document",
            doc.id,
            ctx.actor,
            at,
        )
        .with_change(None, Some(&json!({ "round": round, "rows": rows.len() })))
        .describe(format!("{} for {}, round {round}", rule.describe(), doc.number)),
    );
    info!(
        document_id = %doc.id,
        round,
        rows = rows.len(),
        rule = %rule.describe(),
        "approval round started"
    );
    Ok(rows)
}

/// Route a submitted document into approval, or approve it outright when the
/// selected rule needs no signer.
pub(crate) fn initiate_in(
    env: &Env,
    uow: &mut dyn UnitOfWork,
    fx: &mut Effects,
    ctx: &OperationContext,
    doc: &mut PaymentDocument,
) -> DomainResult<()> {
    if !doc.can_transition(DocumentStatus::PendingApproval) {
        return Err(DomainError::InvalidTransition {
            from: doc.status().as_str(),
            to: DocumentStatus::PendingApproval.as_str(),
        });
    }
    let rules = uow.approval_rules(doc.organization_id)?;
    let rule = select_rule(&rules, doc, &env.config.tiers());
    if !rule.requires_approval() {
        info!(document_id = %doc.id, rule = %rule.describe(), "approval not required");
        return apply_transition(uow, fx, ctx, doc, DocumentStatus::Approved, None);
    }
    start_round(env, uow, fx, ctx, doc, &rule)?;
    apply_transition(uow, fx, ctx, doc, DocumentStatus::PendingApproval, None)
}

pub struct ApprovalEngine<S> {
    shared: Arc<Shared<S>>,
}

impl<S: PaymentStore> ApprovalEngine<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    fn env(&self) -> &Env {
        &self.shared.env
    }

    #[instrument(skip(self, ctx), fields(document_id = %id), err)]
    pub fn initiate_approval(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
    ) -> DomainResult<PaymentDocument> {
        self.shared.run(|uow, fx| {
            let mut doc = uow.lock_document(id)?;
            initiate_in(self.env(), uow, fx, ctx, &mut doc)?;
            Ok(doc)
        })
    }

    /// Approve on behalf of `ctx.actor`.
    #[instrument(skip(self, ctx, comment), fields(document_id = %id, user = %ctx.actor), err)]
    pub fn approve_by_user(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        comment: Option<String>,
    ) -> DomainResult<ApprovalDecision> {
        self.shared.run(|uow, fx| {
            let at = ctx.now();
            let user = ctx.actor;
            let mut doc = uow.lock_document(id)?;
            let is_admin = is_approval_admin(self.env().authz(), user, doc.organization_id);
            let rows = uow.approvals_for_document(id)?;
            let chain = ChainState::new(&rows);

            let (row_id, proxy) = match resolve(&chain, user, is_admin)? {
                Resolution::Row { id, proxy } => (id, proxy),
                Resolution::Force => {
                    let round = chain.next_round();
                    let comment = annotate(comment, OVERRIDE_NOTE);
                    let status = ApprovalStatus::Approved;
                    return self.force(uow, fx, ctx, &mut doc, status, comment, round);
                }
            };
            let current_level = chain.current_level();

            let mut row = uow.lock_approval(row_id)?;
            if !row.is_pending() {
                return Err(DomainError::conflict(format!(
                    "approval {} was already decided",
                    row.id
                )));
            }
            if !is_admin {
                check_signer(&row, &doc)?;
                check_level(&row, current_level)?;
            }
            let comment = if proxy { annotate(comment, OVERRIDE_NOTE) } else { comment };
            row.approve(user, comment, at)?;
            uow.update_approval(&row)?;
            fx.audit(approval_audit(ctx, &doc, "approval.approved", &row));

            let mut overridden = 0;
            if is_admin {
                let siblings: Vec<ApprovalId> = chain
                    .pending_at_level(row.approval_level)
                    .iter()
                    .filter(|r| r.id != row.id)
                    .map(|r| r.id)
                    .collect();
                for sibling_id in siblings {
                    let mut sibling = uow.lock_approval(sibling_id)?;
                    if sibling.is_pending() {
                        sibling.approve(user, Some(OVERRIDE_NOTE.to_string()), at)?;
                        uow.update_approval(&sibling)?;
                        fx.audit(approval_audit(ctx, &doc, "approval.approved", &sibling));
                        overridden += 1;
                    }
                }
            }

            let rows = uow.approvals_for_document(id)?;
            let chain = ChainState::new(&rows);
            let completed = chain.is_fully_approved();
            if completed {
                apply_transition(uow, fx, ctx, &mut doc, DocumentStatus::Approved, None)?;
            } else if chain.is_level_complete(row.approval_level)
                && chain.current_level() != current_level
            {
                if let Some(notice) = chain
                    .current_level()
                    .and_then(|level| level_notice(&doc, &chain, level))
                {
                    fx.notify(notice);
                }
            }

            info!(
                document_id = %doc.id,
                level = row.approval_level,
                proxy,
                overridden,
                completed,
                "approval recorded"
            );
            Ok(ApprovalDecision {
                document: doc,
                approval: row,
                admin_override: proxy || overridden > 0,
                document_completed: completed,
            })
        })
    }

    /// Reject on behalf of `ctx.actor`. One rejection ends the chain.
    #[instrument(skip(self, ctx, reason), fields(document_id = %id, user = %ctx.actor), err)]
    pub fn reject_by_user(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        reason: impl Into<String>,
    ) -> DomainResult<ApprovalDecision> {
        let reason = reason.into().trim().to_string();
        if reason.is_empty() {
            return Err(DomainError::rule("a reason is required to reject a document"));
        }
        self.shared.run(|uow, fx| {
            let user = ctx.actor;
            let mut doc = uow.lock_document(id)?;
            let is_admin = is_approval_admin(self.env().authz(), user, doc.organization_id);
            let rows = uow.approvals_for_document(id)?;
            let chain = ChainState::new(&rows);

            let (row_id, proxy) = match resolve(&chain, user, is_admin)? {
                Resolution::Row { id, proxy } => (id, proxy),
                Resolution::Force => {
                    let round = chain.next_round();
                    return self.force(
                        uow,
                        fx,
                        ctx,
                        &mut doc,
                        ApprovalStatus::Rejected,
                        Some(reason.clone()),
                        round,
                    );
                }
            };
            let current_level = chain.current_level();

            let mut row = uow.lock_approval(row_id)?;
            if !row.is_pending() {
                return Err(DomainError::conflict(format!(
                    "approval {} was already decided",
                    row.id
                )));
            }
            if !is_admin {
                check_level(&row, current_level)?;
            }
            let note = if proxy {
                format!("{reason} ({OVERRIDE_NOTE})")
            } else {
                reason.clone()
            };
            row.reject(user, note, ctx.now())?;
            uow.update_approval(&row)?;
            fx.audit(approval_audit(ctx, &doc, "approval.rejected", &row));

            let to = DocumentStatus::Rejected;
            apply_transition(uow, fx, ctx, &mut doc, to, Some(reason.clone()))?;
            info!(document_id = %doc.id, level = row.approval_level, proxy, "approval rejected");
            Ok(ApprovalDecision {
                document: doc,
                approval: row,
                admin_override: proxy,
                document_completed: true,
            })
        })
    }

    /// Direct admin decision on a document without a row to act on.
    #[allow(clippy::too_many_arguments)]
    fn force(
        &self,
        uow: &mut dyn UnitOfWork,
        fx: &mut Effects,
        ctx: &OperationContext,
        doc: &mut PaymentDocument,
        status: ApprovalStatus,
        comment: Option<String>,
        round: u32,
    ) -> DomainResult<ApprovalDecision> {
        if !matches!(
            doc.status(),
            DocumentStatus::Submitted | DocumentStatus::PendingApproval
        ) {
            return Err(DomainError::rule(format!(
                "document {} is in wrong status '{}' for an approval decision",
                doc.number,
                doc.status()
            )));
        }
        let row = PaymentApproval::admin_decision(
            doc,
            status,
            ctx.actor,
            comment.clone(),
            round,
            ctx.now(),
        );
        uow.insert_approvals(std::slice::from_ref(&row))?;

        let (action, to, reason) = match status {
            ApprovalStatus::Rejected => ("approval.rejected", DocumentStatus::Rejected, comment),
            _ => ("approval.approved", DocumentStatus::Approved, None),
        };
        fx.audit(approval_audit(ctx, doc, action, &row));
        apply_transition(uow, fx, ctx, doc, to, reason)?;
        warn!(
            document_id = %doc.id,
            actor = %ctx.actor,
            status = status.as_str(),
            "administrator decided document directly"
        );
        Ok(ApprovalDecision {
            document: doc.clone(),
            approval: row,
            admin_override: true,
            document_completed: true,
        })
    }

    /// Replace the live round with a fresh batch built from the currently
    /// matching rule. Approval administrators only.
    #[instrument(skip(self, ctx), fields(document_id = %id), err)]
    pub fn regenerate_approvals(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
    ) -> DomainResult<ApprovalStatusReport> {
        self.shared.run(|uow, fx| {
            let mut doc = uow.lock_document(id)?;
            if !is_approval_admin(self.env().authz(), ctx.actor, doc.organization_id) {
                return Err(DomainError::forbidden(format!(
                    "user {} may not regenerate approvals",
                    ctx.actor
                )));
            }
            match doc.status() {
                DocumentStatus::Submitted => initiate_in(self.env(), uow, fx, ctx, &mut doc)?,
                DocumentStatus::PendingApproval => {
                    let rules = uow.approval_rules(doc.organization_id)?;
                    let rule = select_rule(&rules, &doc, &self.env().config.tiers());
                    if rule.requires_approval() {
                        start_round(self.env(), uow, fx, ctx, &doc, &rule)?;
                    } else {
                        apply_transition(uow, fx, ctx, &mut doc, DocumentStatus::Approved, None)?;
                    }
                }
                other => {
                    return Err(DomainError::rule(format!(
                        "approvals cannot be regenerated for a document in status '{other}'"
                    )));
                }
            }
            let rows = uow.approvals_for_document(id)?;
            Ok(ChainState::new(&rows).report(id))
        })
    }

    pub fn get_approval_status(&self, id: DocumentId) -> DomainResult<ApprovalStatusReport> {
        self.shared.read(|uow| {
            if uow.get_document(id)?.is_none() {
                return Err(DomainError::not_found("document", id));
            }
            let rows = uow.approvals_for_document(id)?;
            Ok(ChainState::new(&rows).report(id))
        })
    }

    /// Whether [`approve_by_user`](Self::approve_by_user) would currently
    /// accept a decision from `user`.
    pub fn can_user_approve(&self, id: DocumentId, user: UserId) -> DomainResult<bool> {
        self.shared.read(|uow| {
            let doc = uow
                .get_document(id)?
                .ok_or_else(|| DomainError::not_found("document", id))?;
            let rows = uow.approvals_for_document(id)?;
            let chain = ChainState::new(&rows);
            let is_admin = is_approval_admin(self.env().authz(), user, doc.organization_id);

            Ok(match resolve(&chain, user, is_admin) {
                Ok(Resolution::Row { id: row_id, .. }) => {
                    is_admin
                        || rows.iter().find(|r| r.id == row_id).is_some_and(|row| {
                            check_signer(row, &doc).is_ok()
                                && check_level(row, chain.current_level()).is_ok()
                        })
                }
                Ok(Resolution::Force) => matches!(
                    doc.status(),
                    DocumentStatus::Submitted | DocumentStatus::PendingApproval
                ),
                Err(_) => false,
            })
        })
    }
}
