use chrono::{DateTime, NaiveDate, Utc};

use payflow_core::{ContractorId, DocumentId, OrganizationId, Party, UserId};
use payflow_documents::{Direction, DocumentType, NewDocument, PaymentDocument, PaymentKind};

pub fn at() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-10T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn document(direction: Direction, amount: f64) -> PaymentDocument {
    let org = OrganizationId::new();
    let contractor = Party::Contractor(ContractorId::new());
    let (payer, payee) = match direction {
        Direction::Outgoing => (Party::Organization(org), contractor),
        Direction::Incoming => (contractor, Party::Organization(org)),
    };
    let input = NewDocument {
        organization_id: org,
        direction,
        document_type: DocumentType::Invoice,
        payment_kind: PaymentKind::Regular,
        number: None,
        document_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
        due_date: None,
        purpose: "supplies".into(),
        amount,
        vat_rate: None,
        currency: "RUB".into(),
        payer: Some(payer),
        payee: Some(payee),
        payee_bank: None,
        source: None,
    };
    PaymentDocument::draft(DocumentId::new(), input, "T-1".into(), UserId::new(), at())
}
