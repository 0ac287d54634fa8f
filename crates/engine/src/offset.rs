//! Bilateral netting of receivables against payables.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use payflow_core::{
    ContractorId, DocumentId, DomainError, DomainResult, OperationContext, OrganizationId, Party,
    ValidationError, ValidationErrors, money,
};
use payflow_documents::PaymentDocument;
use payflow_infra::{AuditEntry, PaymentStore};
use payflow_ledger::{PaymentTransaction, offset_reference};

use crate::context::Shared;
use crate::ledger;

/// Result of one successful offset.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetResult {
    pub receivable: PaymentDocument,
    pub payable: PaymentDocument,
    /// Receivable row first.
    pub transactions: [PaymentTransaction; 2],
    pub reference: String,
}

/// A pairing proposed by the greedy planner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetCandidate {
    pub receivable_id: DocumentId,
    pub receivable_number: String,
    pub payable_id: DocumentId,
    pub payable_number: String,
    pub currency: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPair {
    pub receivable_id: DocumentId,
    pub payable_id: DocumentId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoOffsetReport {
    pub offsets: Vec<OffsetResult>,
    pub skipped: Vec<SkippedPair>,
    pub total_amount: f64,
}

fn is_open(doc: &PaymentDocument) -> bool {
    doc.status().is_settleable() && doc.remaining_amount() > money::MIN_OFFSET_AMOUNT
}

/// Open receivables and payables per currency, oldest due date first.
fn open_by_currency(
    documents: Vec<PaymentDocument>,
) -> BTreeMap<String, (Vec<PaymentDocument>, Vec<PaymentDocument>)> {
    let mut grouped: BTreeMap<String, (Vec<PaymentDocument>, Vec<PaymentDocument>)> =
        BTreeMap::new();
    for doc in documents.into_iter().filter(is_open) {
        let sides = grouped.entry(doc.currency.to_uppercase()).or_default();
        if doc.is_receivable() {
            sides.0.push(doc);
        } else {
            sides.1.push(doc);
        }
    }
    for (receivables, payables) in grouped.values_mut() {
        receivables.sort_by_key(settlement_order);
        payables.sort_by_key(settlement_order);
    }
    grouped
}

fn settlement_order(
    doc: &PaymentDocument,
) -> (bool, Option<chrono::NaiveDate>, chrono::NaiveDate, DocumentId) {
    (doc.due_date.is_none(), doc.due_date, doc.document_date, doc.id)
}

/// Greedy pairing over a snapshot: each step nets the smaller of the two
/// heads and advances past whichever side is exhausted.
pub fn plan_offsets(documents: Vec<PaymentDocument>) -> Vec<OffsetCandidate> {
    let mut plan = Vec::new();
    for (currency, (receivables, payables)) in open_by_currency(documents) {
        let mut recv_left: Vec<f64> = receivables.iter().map(|d| d.remaining_amount()).collect();
        let mut pay_left: Vec<f64> = payables.iter().map(|d| d.remaining_amount()).collect();
        let (mut i, mut j) = (0, 0);
        while i < receivables.len() && j < payables.len() {
            let amount = recv_left[i].min(pay_left[j]);
            if amount > money::MIN_OFFSET_AMOUNT {
                plan.push(OffsetCandidate {
                    receivable_id: receivables[i].id,
                    receivable_number: receivables[i].number.clone(),
                    payable_id: payables[j].id,
                    payable_number: payables[j].number.clone(),
                    currency: currency.clone(),
                    amount,
                });
                recv_left[i] -= amount;
                pay_left[j] -= amount;
            }
            if recv_left[i] <= money::MIN_OFFSET_AMOUNT {
                i += 1;
            }
            if pay_left[j] <= money::MIN_OFFSET_AMOUNT {
                j += 1;
            }
        }
    }
    plan
}

/// Every reason the pair cannot be netted for `amount`, as one list.
fn check_pair(
    receivable: &PaymentDocument,
    payable: &PaymentDocument,
    amount: f64,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if !receivable.is_receivable() {
        errors.push(ValidationError::new(
            "receivable_id",
            "offset.receivable_direction",
            format!("document {} is not a receivable", receivable.number),
        ));
    }
    if !payable.is_payable() {
        errors.push(ValidationError::new(
            "payable_id",
            "offset.payable_direction",
            format!("document {} is not a payable", payable.number),
        ));
    }
    if receivable.organization_id != payable.organization_id {
        errors.push(ValidationError::new(
            "payable_id",
            "offset.organization_mismatch",
            "documents belong to different organizations",
        ));
    }
    if receivable.counterparty().is_none() || receivable.counterparty() != payable.counterparty() {
        errors.push(ValidationError::new(
            "payable_id",
            "offset.counterparty_mismatch",
            "documents must share the same counterparty",
        ));
    }
    for (field, doc) in [("receivable_id", receivable), ("payable_id", payable)] {
        if !doc.status().is_settleable() {
            errors.push(ValidationError::new(
                field,
                "offset.status",
                format!("document {} cannot be settled in status '{}'", doc.number, doc.status()),
            ));
        } else if amount > doc.remaining_amount() + money::OFFSET_EPSILON {
            errors.push(ValidationError::new(
                "amount",
                "offset.amount_exceeds_remaining",
                format!(
                    "offset amount {amount:.2} exceeds remaining {:.2} of document {}",
                    doc.remaining_amount(),
                    doc.number
                ),
            ));
        }
    }
    if !receivable.currency.eq_ignore_ascii_case(&payable.currency) {
        errors.push(ValidationError::new(
            "payable_id",
            "offset.currency_mismatch",
            format!("currencies differ: {} vs {}", receivable.currency, payable.currency),
        ));
    }
    errors.into_result()
}

fn check_amount(amount: f64) -> DomainResult<()> {
    if !amount.is_finite() || amount <= money::MIN_OFFSET_AMOUNT {
        return Err(DomainError::validation(ValidationError::new(
            "amount",
            "offset.amount_min",
            format!("offset amount must exceed {:.3}", money::MIN_OFFSET_AMOUNT),
        )));
    }
    Ok(())
}

pub struct OffsetEngine<S> {
    shared: Arc<Shared<S>>,
}

impl<S: PaymentStore> OffsetEngine<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    /// Net `amount` between a receivable and a payable of the same
    /// counterparty in one transaction.
    ///
    /// Both rows are locked in ascending id order, so concurrent offsets of
    /// the same pair serialize instead of deadlocking. Roles are taken from
    /// the documents' directions once locked; the arguments may come in
    /// either order.
    #[instrument(
        skip(self, ctx, notes),
        fields(receivable = %receivable_id, payable = %payable_id),
        err
    )]
    pub fn perform_offset(
        &self,
        ctx: &OperationContext,
        receivable_id: DocumentId,
        payable_id: DocumentId,
        amount: f64,
        notes: Option<String>,
    ) -> DomainResult<OffsetResult> {
        if receivable_id == payable_id {
            return Err(DomainError::validation(ValidationError::new(
                "payable_id",
                "offset.same_document",
                "a document cannot be offset against itself",
            )));
        }

        self.shared.run(|uow, fx| {
            let first = receivable_id.min(payable_id);
            let second = receivable_id.max(payable_id);
            let first_doc = uow.lock_document(first)?;
            let second_doc = uow.lock_document(second)?;
            let (mut receivable, mut payable) =
                if first_doc.is_payable() && second_doc.is_receivable() {
                    (second_doc, first_doc)
                } else if first_doc.is_receivable() && second_doc.is_payable() {
                    (first_doc, second_doc)
                } else if first == receivable_id {
                    (first_doc, second_doc)
                } else {
                    (second_doc, first_doc)
                };

            check_amount(amount)?;
            check_pair(&receivable, &payable, amount).map_err(DomainError::Validation)?;

            let at = ctx.now();
            let reference = offset_reference(at);
            let transactions = PaymentTransaction::offset_pair(
                receivable.organization_id,
                receivable.id,
                payable.id,
                amount,
                &receivable.currency,
                &reference,
                notes,
                ctx.actor,
                at,
            );
            uow.insert_transactions(&transactions)?;

            let receivable_events = receivable.register_partial_payment(amount, at, ctx.actor)?;
            let payable_events = payable.register_partial_payment(amount, at, ctx.actor)?;
            uow.update_document(&receivable)?;
            uow.update_document(&payable)?;
            ledger::refresh_for(uow, &receivable, at)?;

            fx.audit(
                AuditEntry::new(
                    receivable.organization_id,
                    "offset.performed",
                    "payment_offset",
                    &reference,
                    ctx.actor,
                    at,
                )
                .with_change(
                    None,
                    Some(&json!({
                        "receivable_id": receivable.id,
                        "payable_id": payable.id,
                        "amount": amount,
                        "currency": receivable.currency,
                    })),
                )
                .describe(format!(
                    "offset {amount:.2} {} between {} and {}",
                    receivable.currency, receivable.number, payable.number
                )),
            );
            fx.events(&receivable, receivable_events);
            fx.events(&payable, payable_events);
            info!(
                %reference,
                receivable = %receivable.number,
                payable = %payable.number,
                amount,
                "offset performed"
            );

            Ok(OffsetResult {
                receivable,
                payable,
                transactions,
                reference,
            })
        })
    }

    /// Net every open receivable against every open payable of a contractor.
    ///
    /// Each pairing is its own transaction; a failed pairing is logged,
    /// recorded in the report and skipped.
    #[instrument(
        skip(self, ctx),
        fields(organization_id = %organization_id, contractor = %contractor),
        err
    )]
    pub fn auto_offset_for_contractor(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        contractor: ContractorId,
    ) -> DomainResult<AutoOffsetReport> {
        let party = Party::Contractor(contractor);
        let snapshot = self
            .shared
            .read(|uow| uow.documents_for_counterparty(organization_id, party))?;

        let mut report = AutoOffsetReport::default();
        for (currency, (mut receivables, mut payables)) in open_by_currency(snapshot) {
            let (mut i, mut j) = (0, 0);
            while i < receivables.len() && j < payables.len() {
                let amount = receivables[i]
                    .remaining_amount()
                    .min(payables[j].remaining_amount());
                if amount > money::MIN_OFFSET_AMOUNT {
                    match self.perform_offset(
                        ctx,
                        receivables[i].id,
                        payables[j].id,
                        amount,
                        Some("automatic offset".into()),
                    ) {
                        Ok(result) => {
                            report.total_amount += amount;
                            receivables[i] = result.receivable.clone();
                            payables[j] = result.payable.clone();
                            report.offsets.push(result);
                        }
                        Err(err) => {
                            warn!(
                                %currency,
                                receivable = %receivables[i].number,
                                payable = %payables[j].number,
                                %err,
                                "offset skipped"
                            );
                            report.skipped.push(SkippedPair {
                                receivable_id: receivables[i].id,
                                payable_id: payables[j].id,
                                reason: err.to_string(),
                            });
                            // Blame the receivable only if it is no longer open.
                            let id = receivables[i].id;
                            let fresh = self.shared.read(|uow| uow.get_document(id))?;
                            match fresh {
                                Some(doc) if is_open(&doc) => {
                                    receivables[i] = doc;
                                    j += 1;
                                }
                                _ => i += 1,
                            }
                            continue;
                        }
                    }
                }
                if !is_open(&receivables[i]) {
                    i += 1;
                }
                if !is_open(&payables[j]) {
                    j += 1;
                }
            }
        }

        report.total_amount = money::round_minor(report.total_amount);
        info!(
            offsets = report.offsets.len(),
            skipped = report.skipped.len(),
            total = report.total_amount,
            "automatic offset finished"
        );
        Ok(report)
    }

    /// Read-only preview of the greedy pairing for a counterparty.
    pub fn offset_candidates(
        &self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Vec<OffsetCandidate>> {
        let documents = self
            .shared
            .read(|uow| uow.documents_for_counterparty(organization_id, counterparty))?;
        Ok(plan_offsets(documents))
    }

    /// Offset transactions of a document, oldest first.
    pub fn offset_history(&self, document_id: DocumentId) -> DomainResult<Vec<PaymentTransaction>> {
        self.shared.read(|uow| {
            if uow.get_document(document_id)?.is_none() {
                return Err(DomainError::not_found("document", document_id));
            }
            Ok(uow
                .transactions_for_document(document_id)?
                .into_iter()
                .filter(PaymentTransaction::is_offset)
                .collect())
        })
    }
}
