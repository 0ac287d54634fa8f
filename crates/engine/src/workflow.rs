//! Document lifecycle service.
//!
//! Wraps the pure state machine of `payflow-documents` in storage
//! transactions: every operation locks the document row, validates where
//! required, transitions, recomputes the counterparty ledger and queues the
//! audit entry and milestone event for dispatch after commit.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};

use payflow_auth::is_approval_admin;
use payflow_core::{DocumentId, DomainError, DomainResult, OperationContext, money};
use payflow_documents::{
    DocumentAction, DocumentPatch, DocumentStatus, NewDocument, PaymentDocument,
};
use payflow_infra::{AuditEntry, PaymentStore, UnitOfWork};
use payflow_ledger::{NewPayment, PaymentMethod, PaymentTransaction};

use crate::approval;
use crate::context::{Effects, Env, Shared, today};
use crate::ledger;
use crate::numbering::DocumentNumberGenerator;

/// A registered payment and the document it settled.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub document: PaymentDocument,
    pub transaction: PaymentTransaction,
}

/// Move `doc` along one edge and persist everything that follows from it.
///
/// Leaving `pending_approval`, or landing in `rejected`/`cancelled`, retires
/// the document's pending approval rows.
pub(crate) fn apply_transition(
    uow: &mut dyn UnitOfWork,
    fx: &mut Effects,
    ctx: &OperationContext,
    doc: &mut PaymentDocument,
    to: DocumentStatus,
    reason: Option<String>,
) -> DomainResult<()> {
    let from = doc.status();
    let at = ctx.now();
    let event = doc.transition(to, at, ctx.actor, reason.clone())?;
    uow.update_document(doc)?;

    if from == DocumentStatus::PendingApproval
        || matches!(to, DocumentStatus::Rejected | DocumentStatus::Cancelled)
    {
        approval::retire_pending(uow, doc.id, &format!("document moved to {to}"), at)?;
    }
    ledger::refresh_for(uow, doc, at)?;

    fx.audit(
        AuditEntry::new(
            doc.organization_id,
            format!("document.{}", to.as_str()),
            "payment_document",
            doc.id,
            ctx.actor,
            at,
        )
        .with_change(
            Some(&json!({ "status": from })),
            Some(&json!({ "status": to, "reason": reason })),
        )
        .describe(format!("{} {}: {from} -> {to}", doc.document_type.as_str(), doc.number)),
    );
    fx.events(doc, [event]);
    info!(document_id = %doc.id, %from, %to, "document transitioned");
    Ok(())
}

fn require_reason(reason: Option<String>, action: &str) -> DomainResult<String> {
    match reason.map(|r| r.trim().to_string()) {
        Some(reason) if !reason.is_empty() => Ok(reason),
        _ => Err(DomainError::rule(format!("a reason is required to {action} a document"))),
    }
}

pub struct DocumentWorkflow<S> {
    shared: Arc<Shared<S>>,
}

impl<S: PaymentStore> DocumentWorkflow<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    fn env(&self) -> &Env {
        &self.shared.env
    }

    /// Create a draft. A missing number is generated; a generated number
    /// that loses a race is regenerated with backoff.
    #[instrument(
        skip(self, ctx, input),
        fields(
            organization_id = %input.organization_id,
            document_type = input.document_type.as_str()
        ),
        err
    )]
    pub fn create(
        &self,
        ctx: &OperationContext,
        input: NewDocument,
    ) -> DomainResult<PaymentDocument> {
        if input.number.is_some() {
            return self.create_once(ctx, input);
        }
        self.env().numbers.retry(|| self.create_once(ctx, input.clone()))
    }

    fn create_once(
        &self,
        ctx: &OperationContext,
        input: NewDocument,
    ) -> DomainResult<PaymentDocument> {
        self.shared.run(|uow, fx| {
            let number = match &input.number {
                Some(number) => number.trim().to_string(),
                None => DocumentNumberGenerator::next_number(
                    uow,
                    input.organization_id,
                    input.document_type,
                    input.document_date,
                )?,
            };
            let doc =
                PaymentDocument::draft(DocumentId::new(), input, number, ctx.actor, ctx.now());
            self.env()
                .validator(uow.lookup(), today(ctx))
                .validate_fast(&doc)??;
            uow.insert_document(&doc)?;
            ledger::refresh_for(uow, &doc, ctx.now())?;

            fx.audit(
                AuditEntry::new(
                    doc.organization_id,
                    "document.created",
                    "payment_document",
                    doc.id,
                    ctx.actor,
                    ctx.now(),
                )
                .with_change(None, Some(&doc))
                .describe(format!("{} {} created", doc.document_type.as_str(), doc.number)),
            );
            info!(document_id = %doc.id, number = %doc.number, "document created");
            Ok(doc)
        })
    }

    /// Edit a draft.
    #[instrument(skip(self, ctx, patch), fields(document_id = %id), err)]
    pub fn update(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        patch: DocumentPatch,
    ) -> DomainResult<PaymentDocument> {
        self.shared.run(|uow, fx| {
            let mut doc = uow.lock_document(id)?;
            let before = doc.clone();
            doc.apply_patch(patch, ctx.now())?;
            self.env()
                .validator(uow.lookup(), today(ctx))
                .validate_fast(&doc)??;
            uow.update_document(&doc)?;
            ledger::refresh_for(uow, &doc, ctx.now())?;
            match before.counterparty() {
                Some(previous) if before.counterparty() != doc.counterparty() => {
                    ledger::recompute_in(uow, doc.organization_id, previous, ctx.now())?;
                }
                _ => {}
            }

            fx.audit(
                AuditEntry::new(
                    doc.organization_id,
                    "document.updated",
                    "payment_document",
                    doc.id,
                    ctx.actor,
                    ctx.now(),
                )
                .with_change(Some(&before), Some(&doc)),
            );
            Ok(doc)
        })
    }

    /// `draft -> submitted` after the full validation report passes.
    ///
    /// Warning-level findings (suspected duplicates) block submission unless
    /// `acknowledge_warnings` is set.
    #[instrument(skip(self, ctx), fields(document_id = %id), err)]
    pub fn submit(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        acknowledge_warnings: bool,
    ) -> DomainResult<PaymentDocument> {
        self.step(id, |uow, fx, doc| {
            if doc.status() == DocumentStatus::Draft {
                self.env()
                    .validator(uow.lookup(), today(ctx))
                    .validate_for_submission(doc, acknowledge_warnings)??;
            }
            apply_transition(uow, fx, ctx, doc, DocumentStatus::Submitted, None)
        })
    }

    /// Start the approval chain, or approve outright when no approval is
    /// required for this document.
    #[instrument(skip(self, ctx), fields(document_id = %id), err)]
    pub fn send_for_approval(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
    ) -> DomainResult<PaymentDocument> {
        self.step(id, |uow, fx, doc| {
            approval::initiate_in(self.env(), uow, fx, ctx, doc)
        })
    }

    /// Direct approval, limited to approval administrators. Refused while
    /// approval rows are pending: those are decided through the approval
    /// engine.
    #[instrument(skip(self, ctx), fields(document_id = %id), err)]
    pub fn approve(&self, ctx: &OperationContext, id: DocumentId) -> DomainResult<PaymentDocument> {
        self.step(id, |uow, fx, doc| {
            let pending = uow
                .approvals_for_document(doc.id)?
                .iter()
                .filter(|a| a.is_pending())
                .count();
            if pending > 0 {
                return Err(DomainError::rule(format!(
                    "document {} has {pending} pending approval(s)",
                    doc.number
                )));
            }
            if !is_approval_admin(self.env().authz(), ctx.actor, doc.organization_id) {
                return Err(DomainError::forbidden(format!(
                    "user {} may not approve document {} directly",
                    ctx.actor, doc.number
                )));
            }
            apply_transition(uow, fx, ctx, doc, DocumentStatus::Approved, None)
        })
    }

    #[instrument(skip(self, ctx, reason), fields(document_id = %id), err)]
    pub fn reject(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        reason: Option<String>,
    ) -> DomainResult<PaymentDocument> {
        let reason = require_reason(reason, "reject")?;
        self.step(id, |uow, fx, doc| {
            apply_transition(uow, fx, ctx, doc, DocumentStatus::Rejected, Some(reason))
        })
    }

    #[instrument(skip(self, ctx), fields(document_id = %id), err)]
    pub fn schedule(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
    ) -> DomainResult<PaymentDocument> {
        self.step(id, |uow, fx, doc| {
            apply_transition(uow, fx, ctx, doc, DocumentStatus::Scheduled, None)
        })
    }

    /// Settle `payment.amount` and append the matching ledger transaction.
    #[instrument(skip(self, ctx, payment), fields(document_id = %id, amount = payment.amount), err)]
    pub fn register_payment(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        payment: NewPayment,
    ) -> DomainResult<PaymentReceipt> {
        if payment.method == PaymentMethod::Offset {
            return Err(DomainError::rule(
                "offset settlements are performed by the offset engine",
            ));
        }
        self.shared.run(|uow, fx| {
            let at = ctx.now();
            let mut doc = uow.lock_document(id)?;
            let before = doc.lifecycle();
            let events = doc.register_partial_payment(payment.amount, at, ctx.actor)?;
            uow.update_document(&doc)?;

            let transaction = PaymentTransaction::payment(
                doc.organization_id,
                doc.id,
                doc.currency.clone(),
                payment,
                ctx.actor,
                at,
            );
            uow.insert_transactions(std::slice::from_ref(&transaction))?;
            ledger::refresh_for(uow, &doc, at)?;

            fx.audit(
                AuditEntry::new(
                    doc.organization_id,
                    "payment.registered",
                    "payment_document",
                    doc.id,
                    ctx.actor,
                    at,
                )
                .with_change(Some(&before), Some(&doc.lifecycle()))
                .describe(format!(
                    "{:.2} {} via {} ({})",
                    transaction.amount,
                    transaction.currency,
                    transaction.method.as_str(),
                    transaction.reference
                )),
            );
            fx.events(&doc, events);
            info!(
                document_id = %doc.id,
                amount = transaction.amount,
                status = %doc.status(),
                "payment registered"
            );
            Ok(PaymentReceipt {
                document: doc,
                transaction,
            })
        })
    }

    /// [`register_payment`](Self::register_payment) by bank transfer.
    pub fn register_partial_payment(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        amount: f64,
    ) -> DomainResult<PaymentDocument> {
        let payment = NewPayment {
            amount,
            method: PaymentMethod::BankTransfer,
            reference: None,
            notes: None,
        };
        self.register_payment(ctx, id, payment).map(|r| r.document)
    }

    /// Close the document; any unpaid remainder is booked as a bank transfer.
    #[instrument(skip(self, ctx), fields(document_id = %id), err)]
    pub fn mark_paid(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
    ) -> DomainResult<PaymentDocument> {
        self.step(id, |uow, fx, doc| {
            let remaining = doc.remaining_amount();
            apply_transition(uow, fx, ctx, doc, DocumentStatus::Paid, None)?;
            if !money::is_settled(remaining) {
                let transaction = PaymentTransaction::payment(
                    doc.organization_id,
                    doc.id,
                    doc.currency.clone(),
                    NewPayment {
                        amount: remaining,
                        method: PaymentMethod::BankTransfer,
                        reference: None,
                        notes: Some("remaining balance settled on close".into()),
                    },
                    ctx.actor,
                    ctx.now(),
                );
                uow.insert_transactions(&[transaction])?;
            }
            Ok(())
        })
    }

    #[instrument(skip(self, ctx, reason), fields(document_id = %id), err)]
    pub fn cancel(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        reason: Option<String>,
    ) -> DomainResult<PaymentDocument> {
        let reason = require_reason(reason, "cancel")?;
        self.step(id, |uow, fx, doc| {
            apply_transition(uow, fx, ctx, doc, DocumentStatus::Cancelled, Some(reason))
        })
    }

    /// Generic edge. Edges with a named operation are routed to it so their
    /// side conditions (validation, approvals, reasons, ledger rows) apply.
    pub fn transition(
        &self,
        ctx: &OperationContext,
        id: DocumentId,
        to: DocumentStatus,
        reason: Option<String>,
    ) -> DomainResult<PaymentDocument> {
        match to {
            DocumentStatus::Submitted => self.submit(ctx, id, false),
            DocumentStatus::PendingApproval => self.send_for_approval(ctx, id),
            DocumentStatus::Approved => self.approve(ctx, id),
            DocumentStatus::Rejected => self.reject(ctx, id, reason),
            DocumentStatus::Cancelled => self.cancel(ctx, id, reason),
            DocumentStatus::Paid => self.mark_paid(ctx, id),
            DocumentStatus::PartiallyPaid => Err(DomainError::rule(
                "partial payments are registered with an amount",
            )),
            DocumentStatus::Draft | DocumentStatus::Scheduled => self.step(id, |uow, fx, doc| {
                apply_transition(uow, fx, ctx, doc, to, reason)
            }),
        }
    }

    pub fn can_transition(&self, id: DocumentId, to: DocumentStatus) -> DomainResult<bool> {
        Ok(self.get_document(id)?.can_transition(to))
    }

    pub fn get_available_actions(&self, id: DocumentId) -> DomainResult<Vec<DocumentAction>> {
        Ok(self.get_document(id)?.status().available_actions())
    }

    pub fn get_document(&self, id: DocumentId) -> DomainResult<PaymentDocument> {
        self.shared.read(|uow| {
            uow.get_document(id)?
                .ok_or_else(|| DomainError::not_found("document", id))
        })
    }

    /// Ledger transactions of a document, oldest first.
    pub fn transactions(&self, id: DocumentId) -> DomainResult<Vec<PaymentTransaction>> {
        self.shared.read(|uow| {
            if uow.get_document(id)?.is_none() {
                return Err(DomainError::not_found("document", id));
            }
            uow.transactions_for_document(id)
        })
    }

    fn step(
        &self,
        id: DocumentId,
        work: impl FnOnce(
            &mut dyn UnitOfWork,
            &mut Effects,
            &mut PaymentDocument,
        ) -> DomainResult<()>,
    ) -> DomainResult<PaymentDocument> {
        self.shared.run(|uow, fx| {
            let mut doc = uow.lock_document(id)?;
            work(uow, fx, &mut doc)?;
            Ok(doc)
        })
    }
}
