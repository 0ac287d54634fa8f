//! Individual check categories.
//!
//! Each returns every finding of its category; the validator decides whether
//! to stop at the first error or collect them all.

use chrono::{Days, NaiveDate};

use payflow_core::{DomainResult, Party, ValidationError, money};
use payflow_documents::{Direction, DocumentType, PaymentDocument, PaymentKind, SourceLink};

use crate::bank;
use crate::lookup::ValidationLookup;

pub fn required_fields(doc: &PaymentDocument) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let missing = |field: &str| {
        ValidationError::new(field, "field.required", format!("{field} is required"))
    };

    if doc.number.trim().is_empty() {
        errors.push(missing("number"));
    }
    if doc.purpose.trim().is_empty() {
        errors.push(missing("purpose"));
    }
    if doc.payer.is_none() {
        errors.push(missing("payer"));
    }
    if doc.payee.is_none() {
        errors.push(missing("payee"));
    }
    if doc.currency.is_empty() {
        errors.push(missing("currency"));
    } else if doc.currency.len() != 3 || !doc.currency.bytes().all(|b| b.is_ascii_uppercase()) {
        errors.push(ValidationError::new(
            "currency",
            "currency.format",
            "currency must be a three-letter ISO 4217 code",
        ));
    }
    errors
}

pub fn amounts(doc: &PaymentDocument) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !doc.amount().is_finite() || doc.amount() <= 0.0 {
        errors.push(ValidationError::new(
            "amount",
            "amount.positive",
            "amount must be greater than zero",
        ));
    }
    if let Some(vat) = doc.vat_rate {
        if !(0.0..=100.0).contains(&vat) {
            errors.push(ValidationError::new(
                "vat_rate",
                "vat.range",
                "VAT rate must be between 0 and 100",
            ));
        }
    }
    if doc.paid_amount() < 0.0 || doc.paid_amount() > doc.amount() + money::EPSILON {
        errors.push(ValidationError::new(
            "paid_amount",
            "paid.range",
            "paid amount must be between zero and the document amount",
        ));
    }
    errors
}

pub fn dates(doc: &PaymentDocument, today: NaiveDate, future_days: u64) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let horizon = today.checked_add_days(Days::new(future_days)).unwrap_or(NaiveDate::MAX);
    if doc.document_date > horizon {
        errors.push(ValidationError::new(
            "document_date",
            "date.too_far_in_future",
            format!("document date may be at most {future_days} days in the future"),
        ));
    }
    if let Some(due) = doc.due_date {
        if due < doc.document_date {
            errors.push(ValidationError::new(
                "due_date",
                "date.due_before_document",
                "due date cannot precede the document date",
            ));
        }
    }
    errors
}

/// Payer and payee differ, and the owning organization sits on its side.
pub fn party_consistency(doc: &PaymentDocument) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if let (Some(payer), Some(payee)) = (doc.payer, doc.payee) {
        if payer == payee {
            errors.push(ValidationError::new(
                "payee",
                "party.same",
                "payer and payee must be different parties",
            ));
        }
    }

    let (field, own) = match doc.direction {
        Direction::Outgoing => ("payer", doc.payer),
        Direction::Incoming => ("payee", doc.payee),
    };
    if let Some(party) = own {
        if !party.is_organization(doc.organization_id) {
            errors.push(ValidationError::new(
                field,
                "party.owner_mismatch",
                format!(
                    "the owning organization must be the {field} of an {} document",
                    doc.direction.as_str()
                ),
            ));
        }
    }
    errors
}

pub fn party_existence(
    doc: &PaymentDocument,
    lookup: &dyn ValidationLookup,
) -> DomainResult<Vec<ValidationError>> {
    let mut errors = Vec::new();
    for (field, party) in [("payer", doc.payer), ("payee", doc.payee)] {
        let Some(party) = party else { continue };
        let exists = match party {
            Party::Organization(id) => lookup.organization_exists(id)?,
            Party::Contractor(id) => lookup.contractor_exists(id)?,
        };
        if !exists {
            errors.push(ValidationError::new(
                field,
                "party.not_found",
                format!("{} {} does not exist", party.kind(), field),
            ));
        }
    }
    Ok(errors)
}

pub fn bank_details(doc: &PaymentDocument) -> Vec<ValidationError> {
    match &doc.payee_bank {
        Some(details) => bank::check_details(details),
        None if doc.document_type == DocumentType::PaymentOrder => vec![ValidationError::new(
            "payee_bank",
            "bank.required",
            "payment orders require payee bank details",
        )],
        None => Vec::new(),
    }
}

pub fn number_uniqueness(
    doc: &PaymentDocument,
    lookup: &dyn ValidationLookup,
) -> DomainResult<Vec<ValidationError>> {
    if doc.number.trim().is_empty() {
        return Ok(Vec::new());
    }
    if lookup.number_taken(doc.organization_id, &doc.number, doc.id)? {
        return Ok(vec![ValidationError::new(
            "number",
            "number.duplicate",
            format!("document number '{}' is already used in this organization", doc.number),
        )]);
    }
    Ok(Vec::new())
}

/// Warning-level: a live document of the same type and amount for the same
/// payee dated within the window.
pub fn duplicates(
    doc: &PaymentDocument,
    lookup: &dyn ValidationLookup,
    window_days: u64,
) -> DomainResult<Vec<ValidationError>> {
    let Some(payee) = doc.payee else {
        return Ok(Vec::new());
    };
    let window = Days::new(window_days);
    let from = doc.document_date.checked_sub_days(window).unwrap_or(NaiveDate::MIN);
    let to = doc.document_date.checked_add_days(window).unwrap_or(NaiveDate::MAX);

    Ok(lookup
        .documents_for_payee(doc.organization_id, payee, from, to)?
        .iter()
        .filter(|other| {
            other.id != doc.id
                && other.document_type == doc.document_type
                && other.status().counts_as_live()
                && money::approx_eq(other.amount(), doc.amount())
        })
        .map(|other| {
            ValidationError::warning(
                "amount",
                "duplicate.suspected",
                format!(
                    "possible duplicate of document {} dated {}",
                    other.number, other.document_date
                ),
            )
        })
        .collect())
}

/// Counterparty not blocked; new receivables stay within the credit limit.
pub fn counterparty_standing(
    doc: &PaymentDocument,
    lookup: &dyn ValidationLookup,
) -> DomainResult<Vec<ValidationError>> {
    let Some(counterparty) = doc.counterparty() else {
        return Ok(Vec::new());
    };
    let Some(account) = lookup.counterparty_account(doc.organization_id, counterparty)? else {
        return Ok(Vec::new());
    };

    let mut errors = Vec::new();
    if account.blocked {
        errors.push(ValidationError::new(
            "counterparty",
            "counterparty.blocked",
            match &account.blocked_reason {
                Some(reason) => format!("counterparty is blocked: {reason}"),
                None => "counterparty is blocked".to_string(),
            },
        ));
    }
    if doc.is_receivable() && account.would_exceed_credit_with(doc) {
        errors.push(ValidationError::new(
            "amount",
            "counterparty.credit_limit",
            format!(
                "receivable balance would exceed the credit limit (available {:.2})",
                account.available_credit().unwrap_or(0.0)
            ),
        ));
    }
    Ok(errors)
}

/// Payments against a contract or act stay within its amount; advances stay
/// within the advance limit; at most one live final payment per scope.
pub fn spend_cap(
    doc: &PaymentDocument,
    lookup: &dyn ValidationLookup,
) -> DomainResult<Vec<ValidationError>> {
    let Some(source) = doc.source else {
        return Ok(Vec::new());
    };
    let linked: Vec<PaymentDocument> = lookup
        .documents_for_source(&source)?
        .into_iter()
        .filter(|d| d.id != doc.id && d.status().counts_as_live())
        .collect();

    let mut errors = Vec::new();
    match source {
        SourceLink::Contract {
            contract_id,
            project_id,
        } => {
            let Some(contract) = lookup.contract(contract_id)? else {
                errors.push(ValidationError::new(
                    "source",
                    "source.contract_not_found",
                    format!("contract {contract_id} does not exist"),
                ));
                return Ok(errors);
            };
            if contract.organization_id != doc.organization_id {
                errors.push(ValidationError::new(
                    "source",
                    "source.organization_mismatch",
                    "contract belongs to another organization",
                ));
            }
            if !contract.currency.eq_ignore_ascii_case(&doc.currency) {
                errors.push(ValidationError::new(
                    "currency",
                    "source.currency_mismatch",
                    format!("contract is denominated in {}", contract.currency),
                ));
            }

            let (cap, advance_cap, scoped): (f64, Option<f64>, Vec<&PaymentDocument>) =
                if contract.is_multi_project() {
                    let Some(project_id) = project_id else {
                        errors.push(ValidationError::new(
                            "source.project_id",
                            "source.project_required",
                            "multi-project contracts require a project",
                        ));
                        return Ok(errors);
                    };
                    let Some(budget) = contract.project(project_id) else {
                        errors.push(ValidationError::new(
                            "source.project_id",
                            "source.project_unknown",
                            format!(
                                "project {project_id} is not part of contract {}",
                                contract.number
                            ),
                        ));
                        return Ok(errors);
                    };
                    let scoped: Vec<&PaymentDocument> = linked
                        .iter()
                        .filter(|d| {
                            matches!(
                                d.source,
                                Some(SourceLink::Contract { project_id: Some(p), .. })
                                    if p == project_id
                            )
                        })
                        .collect();
                    (budget.amount, budget.advance_limit, scoped)
                } else {
                    (contract.total_amount, contract.advance_limit, linked.iter().collect())
                };

            errors.extend(cap_findings(doc, cap, advance_cap, &scoped, "contract"));
        }
        SourceLink::Act { act_id } => {
            let Some(act) = lookup.act(act_id)? else {
                errors.push(ValidationError::new(
                    "source",
                    "source.act_not_found",
                    format!("act {act_id} does not exist"),
                ));
                return Ok(errors);
            };
            if act.organization_id != doc.organization_id {
                errors.push(ValidationError::new(
                    "source",
                    "source.organization_mismatch",
                    "act belongs to another organization",
                ));
            }
            if doc.payment_kind == PaymentKind::Advance {
                errors.push(ValidationError::new(
                    "payment_kind",
                    "source.advance_against_act",
                    "advance payments cannot be made against an act of completed work",
                ));
            }
            let scoped: Vec<&PaymentDocument> = linked.iter().collect();
            errors.extend(cap_findings(doc, act.amount, None, &scoped, "act"));
        }
    }
    Ok(errors)
}

fn cap_findings(
    doc: &PaymentDocument,
    cap: f64,
    advance_cap: Option<f64>,
    linked: &[&PaymentDocument],
    what: &str,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let committed: f64 = linked.iter().map(|d| d.amount()).sum();

    match doc.payment_kind {
        PaymentKind::Advance => {
            if let Some(limit) = advance_cap {
                let advanced: f64 = linked
                    .iter()
                    .filter(|d| d.payment_kind == PaymentKind::Advance)
                    .map(|d| d.amount())
                    .sum();
                if advanced + doc.amount() > limit + money::EPSILON {
                    errors.push(ValidationError::new(
                        "amount",
                        "source.advance_limit_exceeded",
                        format!(
                            "advance payments would exceed the {what} advance limit \
                             (available {:.2})",
                            (limit - advanced).max(0.0)
                        ),
                    ));
                }
            }
        }
        PaymentKind::Final => {
            if linked.iter().any(|d| d.payment_kind == PaymentKind::Final) {
                errors.push(ValidationError::new(
                    "payment_kind",
                    "source.final_already_exists",
                    format!("a final payment already exists for this {what}"),
                ));
            }
        }
        PaymentKind::Regular => {}
    }

    if committed + doc.amount() > cap + money::EPSILON {
        errors.push(ValidationError::new(
            "amount",
            "source.cap_exceeded",
            format!(
                "payments would exceed the {what} amount (available {:.2})",
                (cap - committed).max(0.0)
            ),
        ));
    }
    errors
}
