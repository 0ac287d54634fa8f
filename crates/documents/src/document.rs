use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{
    ActId, ContractId, DocumentId, DomainError, DomainResult, OrganizationId, Party, ProjectId,
    UserId, money,
};

use crate::status::DocumentStatus;

/// Which way money flows for the owning organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The organization expects to receive money (a receivable).
    Incoming,
    /// The organization owes money (a payable).
    Outgoing,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incoming" => Some(Direction::Incoming),
            "outgoing" => Some(Direction::Outgoing),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    PaymentRequest,
    PaymentOrder,
    OffsetAct,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Invoice,
        DocumentType::PaymentRequest,
        DocumentType::PaymentOrder,
        DocumentType::OffsetAct,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::PaymentRequest => "payment_request",
            DocumentType::PaymentOrder => "payment_order",
            DocumentType::OffsetAct => "offset_act",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Prefix used by generated document numbers.
    pub fn number_prefix(self) -> &'static str {
        match self {
            DocumentType::Invoice => "INV",
            DocumentType::PaymentRequest => "PRQ",
            DocumentType::PaymentOrder => "PO",
            DocumentType::OffsetAct => "OFA",
        }
    }
}

/// How a payment relates to its source contract, for spend-cap checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    #[default]
    Regular,
    Advance,
    Final,
}

impl PaymentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentKind::Regular => "regular",
            PaymentKind::Advance => "advance",
            PaymentKind::Final => "final",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "regular" => Some(PaymentKind::Regular),
            "advance" => Some(PaymentKind::Advance),
            "final" => Some(PaymentKind::Final),
            _ => None,
        }
    }
}

/// Payee bank requisites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub bank_name: String,
    /// Bank identification code, 9 digits.
    pub bik: String,
    /// Settlement account, 20 digits.
    pub account: String,
    /// Correspondent account, 20 digits when present.
    pub correspondent_account: Option<String>,
}

/// Entity a document is paid against (drives spend-cap validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLink {
    Contract {
        contract_id: ContractId,
        project_id: Option<ProjectId>,
    },
    Act {
        act_id: ActId,
    },
}

/// Per-transition milestone timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// The state-machine owned part of a document, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub status: DocumentStatus,
    pub paid_amount: f64,
    pub timestamps: Timestamps,
    pub status_reason: Option<String>,
}

/// Input for creating a draft document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub organization_id: OrganizationId,
    pub direction: Direction,
    pub document_type: DocumentType,
    #[serde(default)]
    pub payment_kind: PaymentKind,
    /// Generated when absent.
    pub number: Option<String>,
    pub document_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub purpose: String,
    pub amount: f64,
    pub vat_rate: Option<f64>,
    pub currency: String,
    pub payer: Option<Party>,
    pub payee: Option<Party>,
    pub payee_bank: Option<BankDetails>,
    pub source: Option<SourceLink>,
}

/// Field edits allowed while a document is still a draft.
///
/// `None` leaves a field untouched; nested options clear optional fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatch {
    pub number: Option<String>,
    pub payment_kind: Option<PaymentKind>,
    pub document_date: Option<NaiveDate>,
    pub due_date: Option<Option<NaiveDate>>,
    pub purpose: Option<String>,
    pub amount: Option<f64>,
    pub vat_rate: Option<Option<f64>>,
    pub currency: Option<String>,
    pub payer: Option<Option<Party>>,
    pub payee: Option<Option<Party>>,
    pub payee_bank: Option<Option<BankDetails>>,
    pub source: Option<Option<SourceLink>>,
}

/// A money claim between two parties.
///
/// Descriptive fields are public. Status, settlement amounts and milestone
/// timestamps are private: they change only through the state machine
/// (`transition`, `register_partial_payment`) so that
/// `remaining_amount == max(0, amount - paid_amount)` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDocument {
    pub id: DocumentId,
    pub organization_id: OrganizationId,
    pub number: String,
    pub direction: Direction,
    pub document_type: DocumentType,
    pub payment_kind: PaymentKind,
    pub document_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub purpose: String,
    amount: f64,
    pub vat_rate: Option<f64>,
    pub currency: String,
    pub payer: Option<Party>,
    pub payee: Option<Party>,
    pub payee_bank: Option<BankDetails>,
    pub source: Option<SourceLink>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    status: DocumentStatus,
    paid_amount: f64,
    remaining_amount: f64,
    timestamps: Timestamps,
    status_reason: Option<String>,
}

impl PaymentDocument {
    /// A fresh draft. `number` must already be assigned.
    pub fn draft(
        id: DocumentId,
        input: NewDocument,
        number: String,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            organization_id: input.organization_id,
            number,
            direction: input.direction,
            document_type: input.document_type,
            payment_kind: input.payment_kind,
            document_date: input.document_date,
            due_date: input.due_date,
            purpose: input.purpose,
            amount: input.amount,
            vat_rate: input.vat_rate,
            currency: input.currency.trim().to_uppercase(),
            payer: input.payer,
            payee: input.payee,
            payee_bank: input.payee_bank,
            source: input.source,
            created_by,
            created_at: at,
            updated_at: at,
            status: DocumentStatus::Draft,
            paid_amount: 0.0,
            remaining_amount: money::remaining(input.amount, 0.0),
            timestamps: Timestamps::default(),
            status_reason: None,
        }
    }

    /// Re-attach a persisted lifecycle (storage rehydration only).
    pub fn with_lifecycle(mut self, amount: f64, lifecycle: Lifecycle) -> Self {
        self.amount = amount;
        self.status = lifecycle.status;
        self.paid_amount = lifecycle.paid_amount;
        self.remaining_amount = money::remaining(amount, lifecycle.paid_amount);
        self.timestamps = lifecycle.timestamps;
        self.status_reason = lifecycle.status_reason;
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle {
            status: self.status,
            paid_amount: self.paid_amount,
            timestamps: self.timestamps,
            status_reason: self.status_reason.clone(),
        }
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn paid_amount(&self) -> f64 {
        self.paid_amount
    }

    pub fn remaining_amount(&self) -> f64 {
        self.remaining_amount
    }

    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    /// Reason recorded with the last rejection/cancellation.
    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn is_receivable(&self) -> bool {
        self.direction == Direction::Incoming
    }

    pub fn is_payable(&self) -> bool {
        self.direction == Direction::Outgoing
    }

    /// The side that is not the owning organization.
    pub fn counterparty(&self) -> Option<Party> {
        match self.direction {
            Direction::Incoming => self.payer,
            Direction::Outgoing => self.payee,
        }
    }

    /// The side the owning organization is expected to occupy.
    pub fn own_side(&self) -> Option<Party> {
        match self.direction {
            Direction::Incoming => self.payee,
            Direction::Outgoing => self.payer,
        }
    }

    /// Apply draft-only field edits.
    pub fn apply_patch(&mut self, patch: DocumentPatch, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DocumentStatus::Draft {
            return Err(DomainError::rule(format!(
                "document can only be edited in draft (current status: {})",
                self.status
            )));
        }

        if let Some(number) = patch.number {
            self.number = number;
        }
        if let Some(kind) = patch.payment_kind {
            self.payment_kind = kind;
        }
        if let Some(date) = patch.document_date {
            self.document_date = date;
        }
        if let Some(due) = patch.due_date {
            self.due_date = due;
        }
        if let Some(purpose) = patch.purpose {
            self.purpose = purpose;
        }
        if let Some(amount) = patch.amount {
            self.amount = amount;
            self.remaining_amount = money::remaining(amount, self.paid_amount);
        }
        if let Some(vat) = patch.vat_rate {
            self.vat_rate = vat;
        }
        if let Some(currency) = patch.currency {
            self.currency = currency.trim().to_uppercase();
        }
        if let Some(payer) = patch.payer {
            self.payer = payer;
        }
        if let Some(payee) = patch.payee {
            self.payee = payee;
        }
        if let Some(bank) = patch.payee_bank {
            self.payee_bank = bank;
        }
        if let Some(source) = patch.source {
            self.source = source;
        }
        self.updated_at = at;
        Ok(())
    }

    pub(crate) fn set_status(&mut self, status: DocumentStatus) {
        self.status = status;
    }

    pub(crate) fn timestamps_mut(&mut self) -> &mut Timestamps {
        &mut self.timestamps
    }

    pub(crate) fn set_status_reason(&mut self, reason: Option<String>) {
        self.status_reason = reason;
    }

    pub(crate) fn set_paid_amount(&mut self, paid: f64) {
        self.paid_amount = paid;
        self.remaining_amount = money::remaining(self.amount, paid);
    }

    /// Close the document out exactly: remaining becomes 0, paid becomes amount.
    pub(crate) fn settle_exactly(&mut self) {
        self.paid_amount = self.amount;
        self.remaining_amount = 0.0;
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn draft_starts_unpaid_with_normalised_currency() {
        let doc = draft(Direction::Outgoing, 1500.0);
        assert_eq!(doc.status(), DocumentStatus::Draft);
        assert_eq!(doc.paid_amount(), 0.0);
        assert_eq!(doc.remaining_amount(), 1500.0);
        assert_eq!(doc.currency, "RUB");
    }

    #[test]
    fn counterparty_depends_on_direction() {
        let out = draft(Direction::Outgoing, 10.0);
        assert_eq!(out.counterparty(), out.payee);
        assert!(out.own_side().unwrap().is_organization(out.organization_id));

        let inc = draft(Direction::Incoming, 10.0);
        assert_eq!(inc.counterparty(), inc.payer);
        assert!(inc.own_side().unwrap().is_organization(inc.organization_id));
    }

    #[test]
    fn patch_recomputes_remaining_and_is_draft_only() {
        let mut doc = draft(Direction::Outgoing, 100.0);
        doc.apply_patch(
            DocumentPatch {
                amount: Some(250.0),
                due_date: Some(None),
                ..DocumentPatch::default()
            },
            at(),
        )
        .unwrap();
        assert_eq!(doc.amount(), 250.0);
        assert_eq!(doc.remaining_amount(), 250.0);

        doc.set_status(DocumentStatus::Submitted);
        let err = doc
            .apply_patch(DocumentPatch::default(), at())
            .unwrap_err();
        assert!(matches!(err, DomainError::Rule(msg) if msg.contains("draft")));
    }

    #[test]
    fn lifecycle_round_trip_restores_derived_remaining() {
        let mut doc = draft(Direction::Incoming, 100.0);
        doc.set_status(DocumentStatus::PartiallyPaid);
        doc.set_paid_amount(30.0);

        let restored = draft(Direction::Incoming, 1.0).with_lifecycle(100.0, doc.lifecycle());
        assert_eq!(restored.status(), DocumentStatus::PartiallyPaid);
        assert_eq!(restored.remaining_amount(), 70.0);
    }
}
