use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use payflow_core::{DocumentId, OrganizationId, TransactionId, UserId};

/// How money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Cash,
    Card,
    /// Bilateral netting against another document.
    Offset,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Offset => "offset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "offset" => Some(PaymentMethod::Offset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
        }
    }
}

/// Input for recording a direct payment against a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub amount: f64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Immutable ledger entry.
///
/// Amounts are signed: a negative amount is a refund. Rows are never edited;
/// corrections are new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub document_id: DocumentId,
    pub amount: f64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub reference: String,
    /// The other side of an offset.
    pub paired_document_id: Option<DocumentId>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn payment(
        organization_id: OrganizationId,
        document_id: DocumentId,
        currency: impl Into<String>,
        payment: NewPayment,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        let id = TransactionId::new();
        let reference = payment
            .reference
            .unwrap_or_else(|| format!("PAY-{}-{}", at.format("%Y%m%d"), short_code(id.as_uuid())));
        Self {
            id,
            organization_id,
            document_id,
            amount: payment.amount,
            currency: currency.into(),
            method: payment.method,
            status: TransactionStatus::Completed,
            reference,
            paired_document_id: None,
            notes: payment.notes,
            created_by,
            created_at: at,
        }
    }

    /// Two linked rows settling `amount` on both documents of an offset.
    ///
    /// Both rows share `reference` and point at each other's document.
    #[allow(clippy::too_many_arguments)]
    pub fn offset_pair(
        organization_id: OrganizationId,
        receivable: DocumentId,
        payable: DocumentId,
        amount: f64,
        currency: &str,
        reference: &str,
        notes: Option<String>,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> [Self; 2] {
        let row = |document_id: DocumentId, paired: DocumentId| Self {
            id: TransactionId::new(),
            organization_id,
            document_id,
            amount,
            currency: currency.to_string(),
            method: PaymentMethod::Offset,
            status: TransactionStatus::Completed,
            reference: reference.to_string(),
            paired_document_id: Some(paired),
            notes: notes.clone(),
            created_by,
            created_at: at,
        };
        [row(receivable, payable), row(payable, receivable)]
    }

    pub fn is_refund(&self) -> bool {
        self.amount < 0.0
    }

    pub fn is_offset(&self) -> bool {
        self.method == PaymentMethod::Offset
    }
}

/// `OFS-YYYYMMDD-XXXXXXXX`.
pub fn offset_reference(at: DateTime<Utc>) -> String {
    format!("OFS-{}-{}", at.format("%Y%m%d"), short_code(&Uuid::now_v7()))
}

// Last eight hex digits: the random tail of a v7 uuid.
fn short_code(uuid: &Uuid) -> String {
    let hex = uuid.simple().to_string();
    hex[hex.len() - 8..].to_uppercase()
}
